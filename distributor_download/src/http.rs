use async_trait::async_trait;
use distributor_types::{OriginClient, OriginError, OriginResponse};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// [`OriginClient`] talking to storage nodes over HTTP
#[derive(Debug, Clone)]
pub struct HttpOriginClient {
    client: reqwest::Client,
}

impl HttpOriginClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn get(&self, url: &Url) -> Result<OriginResponse, OriginError> {
        let response =
            self.client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| OriginError::Request {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OriginError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body_url = url.clone();
        let body = response
            .bytes_stream()
            .map_err(move |e| OriginError::Body {
                url: body_url.clone(),
                message: e.to_string(),
            })
            .boxed();

        Ok(OriginResponse { content_type, body })
    }
}
