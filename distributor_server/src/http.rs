//! HTTP API of the distributor node
use std::{convert::Infallible, sync::Arc};

use distributor_download::DownloadError;
use distributor_resolver::BucketSelection;
use distributor_types::{
    DEFAULT_CONTENT_TYPE, InvalidId, ObjectId,
    http::{BucketObjects, BucketsResponse, ErrorResponse, StatusResponse},
};
use hyper::{
    HeaderMap, Method, Request, StatusCode,
    body::Incoming,
    header::{
        ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_DISPOSITION,
        CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue, RANGE,
    },
};
use iox_time::TimeProvider;
use observability_deps::tracing::{debug, error};
use thiserror::Error;

use crate::{
    CommonServerState,
    all_paths::{API_HEALTH, API_METRICS, API_V1_ASSETS, API_V1_BUCKETS, API_V1_STATUS},
    body::{
        Response, ResponseBuilder, bytes_to_response_body, empty_response_body,
        stream_to_response_body,
    },
    range::RangeRequest,
    service::{Asset, AssetService, HeadStatus, ServeError},
};

const X_CACHE: &str = "x-cache";
const TIMING_ALLOW_ORIGIN: &str = "timing-allow-origin";

/// Cached payloads never change under their id
const CACHE_CONTROL_HIT: &str = "max-age=31536000";
const CACHE_CONTROL_MISS: &str = "max-age=180, must-revalidate";

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("invalid object id: {0}")]
    InvalidObjectId(#[from] InvalidId),

    #[error("http error: {0}")]
    Http(#[from] http::Error),

    #[error("failed to serialize response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no handler for this path")]
    NoHandler,

    #[error("method not allowed")]
    MethodNotAllowed,
}

type Result<T, E = Error> = std::result::Result<T, E>;

trait IntoResponse {
    fn into_response(self) -> Response;
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    let body = ErrorResponse {
        kind: kind.to_string(),
        message,
    };
    let body = serde_json::to_vec(&body).unwrap_or_default();
    ResponseBuilder::new()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(bytes_to_response_body(body))
        .unwrap()
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Self::Download(e) if e.all_timed_out() => {
                (StatusCode::GATEWAY_TIMEOUT, "source_timeout")
            }
            Self::Download(DownloadError::NoViableSource { .. }) => {
                (StatusCode::BAD_GATEWAY, "no_viable_source")
            }
            Self::Metadata(_) => (StatusCode::SERVICE_UNAVAILABLE, "metadata_unavailable"),
            Self::RangeNotSatisfiable { size, .. } => {
                let mut response = error_response(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "range_not_satisfiable",
                    self.to_string(),
                );
                if let Ok(value) = HeaderValue::try_from(format!("bytes */{size}")) {
                    response.headers_mut().insert(CONTENT_RANGE, value);
                }
                return response;
            }
            Self::Download(_) | Self::Storage { .. } | Self::Cache(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        error_response(status, kind, self.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        debug!(error = ?self, "API error");
        match self {
            Self::Serve(e) => e.into_response(),
            Self::InvalidObjectId(e) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_object_id", e.to_string())
            }
            Self::NoHandler => {
                error_response(StatusCode::NOT_FOUND, "not_found", self.to_string())
            }
            Self::MethodNotAllowed => ResponseBuilder::new()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body(bytes_to_response_body(self.to_string()))
                .unwrap(),
            Self::Http(_) | Self::Json(_) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                self.to_string(),
            ),
        }
    }
}

#[derive(Debug)]
pub(crate) struct HttpApi {
    common_state: CommonServerState,
    assets: Arc<AssetService>,
    time_provider: Arc<dyn TimeProvider>,
}

impl HttpApi {
    pub(crate) fn new(
        common_state: CommonServerState,
        assets: Arc<AssetService>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            common_state,
            assets,
            time_provider,
        }
    }

    async fn get_asset(&self, id: ObjectId, range: Option<RangeRequest>) -> Result<Response> {
        let Asset {
            size,
            content_type,
            cache_status,
            range,
            body,
        } = self.assets.serve_range(&id, range).await?;
        let mut headers = asset_headers(size, &content_type, cache_status.as_str())?;
        let status = match range {
            None => StatusCode::OK,
            Some(range) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(range.len()));
                headers.insert(
                    CONTENT_RANGE,
                    HeaderValue::from_str(&range.content_range(size))
                        .map_err(http::Error::from)?,
                );
                StatusCode::PARTIAL_CONTENT
            }
        };
        let mut response = ResponseBuilder::new()
            .status(status)
            .body(stream_to_response_body(body))?;
        response.headers_mut().extend(headers);
        Ok(response)
    }

    async fn head_asset(&self, id: ObjectId) -> Result<Response> {
        let (size, content_type, cache_status) = match self.assets.head(&id).await? {
            HeadStatus::Hit { size, content_type } => (size, content_type, "hit"),
            HeadStatus::Pending { size } => {
                (size, DEFAULT_CONTENT_TYPE.to_string(), "pending")
            }
            HeadStatus::Miss { size } => {
                (size, DEFAULT_CONTENT_TYPE.to_string(), "miss")
            }
        };
        let headers = asset_headers(size, &content_type, cache_status)?;
        let mut response = ResponseBuilder::new()
            .status(StatusCode::OK)
            .body(empty_response_body())?;
        response.headers_mut().extend(headers);
        Ok(response)
    }

    fn status(&self) -> Result<Response> {
        let cache = self.assets.cache();
        let uptime = self
            .time_provider
            .now()
            .checked_duration_since(self.common_state.started_at)
            .unwrap_or_default()
            .as_secs();
        let status = StatusResponse {
            id: self.common_state.node_id.to_string(),
            objects_in_cache: cache.len(),
            storage_limit: cache.capacity(),
            storage_used: cache.size(),
            uptime,
            downloads_in_progress: self.assets.coordinator().in_flight(),
        };
        json_response(&status)
    }

    fn buckets(&self) -> Result<Response> {
        let locator = self.assets.locator();
        let buckets = BucketsResponse {
            buckets: locator
                .served_buckets()
                .buckets
                .iter()
                .map(|b| BucketObjects {
                    bucket_id: b.bucket_id.clone(),
                    object_ids: b.object_ids.clone(),
                })
                .collect(),
            all_by_worker_id: match locator.selection() {
                BucketSelection::AllByWorkerId(worker) => Some(*worker),
                BucketSelection::Ids(_) => None,
            },
        };
        json_response(&buckets)
    }

    fn health(&self) -> Result<Response> {
        let response_body = "OK";
        Ok(ResponseBuilder::new()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(bytes_to_response_body(response_body.to_string()))?)
    }

    fn handle_metrics(&self) -> Result<Response> {
        let mut body: Vec<u8> = Default::default();
        let mut reporter = metric_exporters::PrometheusTextEncoder::new(&mut body);
        self.common_state.metrics.report(&mut reporter);

        // Add required OpenMetrics EOF marker
        body.extend_from_slice(b"# EOF\n");

        Ok(ResponseBuilder::new()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
            .body(bytes_to_response_body(body))?)
    }
}

fn json_response(value: &impl serde::Serialize) -> Result<Response> {
    let body = serde_json::to_vec(value)?;
    Ok(ResponseBuilder::new()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(bytes_to_response_body(body))?)
}

fn asset_headers(size: u64, content_type: &str, cache_status: &'static str) -> Result<HeaderMap> {
    let cache_control = if cache_status == "hit" {
        CACHE_CONTROL_HIT
    } else {
        CACHE_CONTROL_MISS
    };
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type).map_err(http::Error::from)?,
    );
    headers.insert(X_CACHE, HeaderValue::from_static(cache_status));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    headers.insert(TIMING_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    Ok(headers)
}

pub(crate) async fn route_request(
    http_server: Arc<HttpApi>,
    req: Request<Incoming>,
) -> Result<Response, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match perform_routing(http_server, &method, &path, req.headers()).await {
        Ok(response) => {
            debug!(%method, %path, status = %response.status(), "processed request");
            response
        }
        Err(error) => {
            match &error {
                Error::Serve(ServeError::NotFound { .. })
                | Error::Serve(ServeError::RangeNotSatisfiable { .. })
                | Error::InvalidObjectId(_)
                | Error::NoHandler
                | Error::MethodNotAllowed => {
                    debug!(%error, %method, %path, "rejected request")
                }
                _ => error!(%error, %method, %path, "Error while handling request"),
            }
            error.into_response()
        }
    };
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    Ok(response)
}

async fn perform_routing(
    http_server: Arc<HttpApi>,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    if let Some(id) = path.strip_prefix(API_V1_ASSETS) {
        return match *method {
            Method::GET => {
                let range = headers
                    .get(RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(RangeRequest::parse);
                http_server.get_asset(id.parse()?, range).await
            }
            Method::HEAD => http_server.head_asset(id.parse()?).await,
            _ => Err(Error::MethodNotAllowed),
        };
    }

    match (method.clone(), path) {
        (Method::GET, API_V1_STATUS) => http_server.status(),
        (Method::GET, API_V1_BUCKETS) => http_server.buckets(),
        (Method::GET, API_HEALTH) => http_server.health(),
        (Method::GET, API_METRICS) => http_server.handle_metrics(),
        (_, API_V1_STATUS | API_V1_BUCKETS | API_HEALTH | API_METRICS) => {
            Err(Error::MethodNotAllowed)
        }
        _ => Err(Error::NoHandler),
    }
}
