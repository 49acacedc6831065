//! Transport seam: the component that actually puts requests on the wire

use async_trait::async_trait;
use reqwest::{Request, Response};

/// Sends a fully prepared request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, reqwest::Error>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send(&self, request: Request) -> Result<Response, reqwest::Error> {
        self.execute(request).await
    }
}
