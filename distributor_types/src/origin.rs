use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

/// Failure talking to an origin endpoint
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("request to {url} failed: {message}")]
    Request { url: Url, message: String },

    #[error("{url} responded with status {status}")]
    Status { url: Url, status: u16 },

    #[error("reading body from {url} failed: {message}")]
    Body { url: Url, message: String },
}

/// The head of a successful origin response and its body
pub struct OriginResponse {
    pub content_type: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, OriginError>>,
}

impl Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests against storage node endpoints
#[async_trait]
pub trait OriginClient: Debug + Send + Sync + 'static {
    /// Resolves once the response head arrived; non-success statuses are errors.
    async fn get(&self, url: &Url) -> Result<OriginResponse, OriginError>;
}
