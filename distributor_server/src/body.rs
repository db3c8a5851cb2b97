//! Response bodies served by the HTTP API
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use http_body_util::{BodyExt, Empty, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::body::Frame;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;
pub type Response = hyper::Response<ResponseBody>;
pub(crate) type ResponseBuilder = http::response::Builder;

pub(crate) fn bytes_to_response_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub(crate) fn empty_response_body() -> ResponseBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn stream_to_response_body(
    stream: BoxStream<'static, Result<Bytes, std::io::Error>>,
) -> ResponseBody {
    StreamBody::new(
        stream
            .map_ok(Frame::data)
            .map_err(|e| Box::new(e) as BoxError)
            .boxed(),
    )
    .boxed_unsync()
}
