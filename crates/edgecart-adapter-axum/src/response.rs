use axum::body::Body as AxumBody;
use axum::http::{header, HeaderValue, Response, StatusCode};
use futures::executor::block_on;
use tracing::error;

use edgecart_core::body::Body;
use edgecart_core::http::Response as CoreResponse;

/// Convert a core response into one consumable by Axum/Hyper.
///
/// Streaming bodies are buffered first: the core stream type is not `Send`, which Hyper
/// requires of response bodies.
pub fn into_axum_response(response: CoreResponse) -> Response<AxumBody> {
    let (parts, body) = response.into_parts();
    let body = match body {
        Body::Once(bytes) => AxumBody::from(bytes),
        stream @ Body::Stream(_) => match block_on(stream.collect()) {
            Ok(bytes) => AxumBody::from(bytes),
            Err(err) => {
                error!("streaming response error: {err}");
                return streaming_error_response();
            }
        },
    };

    Response::from_parts(parts, body)
}

fn streaming_error_response() -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from("streaming response error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
