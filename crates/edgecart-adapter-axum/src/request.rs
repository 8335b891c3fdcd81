use std::net::SocketAddr;

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use edgecart_core::body::Body;
use edgecart_core::http::{HeaderValue, Request as CoreRequest};
use http::header::CONTENT_TYPE;

/// Header the storefront client forwards as the buyer IP.
pub const BUYER_IP_HEADER: &str = "oxygen-buyer-ip";

/// Convert an Axum/Hyper request into a core request. JSON and form bodies are buffered so
/// handlers can parse them; anything else stays streaming. The peer address becomes the
/// buyer IP unless the request already carries one.
pub async fn into_core_request(request: Request<AxumBody>) -> Result<CoreRequest, String> {
    let (mut parts, body) = request.into_parts();

    let body = match parts.headers.get(CONTENT_TYPE) {
        Some(value) if is_buffered_content_type(value) => {
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(|e| format!("Failed to convert body into bytes: {e}"))?;
            Body::from_bytes(bytes)
        }
        _ => Body::from_stream(body.into_data_stream()),
    };

    if let Some(ConnectInfo(addr)) = parts.extensions.remove::<ConnectInfo<SocketAddr>>() {
        if !parts.headers.contains_key(BUYER_IP_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
                parts.headers.insert(BUYER_IP_HEADER, value);
            }
        }
    }

    Ok(CoreRequest::from_parts(parts, body))
}

fn is_buffered_content_type(value: &HeaderValue) -> bool {
    let Ok(raw) = value.to_str() else {
        return false;
    };

    let media_type = raw.split(';').next().map(str::trim).unwrap_or("");
    if media_type.eq_ignore_ascii_case("application/json")
        || media_type.eq_ignore_ascii_case("application/x-www-form-urlencoded")
    {
        return true;
    }

    let Some((ty, subtype)) = media_type.split_once('/') else {
        return false;
    };
    let subtype = subtype.trim();
    ty.eq_ignore_ascii_case("application")
        && subtype.len() >= 5
        && subtype[subtype.len() - 5..].eq_ignore_ascii_case("+json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecart_core::http::Method;

    fn with_peer(mut request: Request<AxumBody>, peer: &str) -> Request<AxumBody> {
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>(peer.parse().unwrap()));
        request
    }

    #[tokio::test]
    async fn peer_address_becomes_buyer_ip() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/products")
            .header("x-test", "1")
            .body(AxumBody::empty())
            .expect("request");

        let core_request = into_core_request(with_peer(request, "10.0.0.7:4000"))
            .await
            .expect("request conversion");
        assert_eq!(core_request.uri().path(), "/products");
        assert_eq!(core_request.headers()["x-test"], "1");
        assert_eq!(core_request.headers()[BUYER_IP_HEADER], "10.0.0.7");
        assert!(core_request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .is_none());
    }

    #[tokio::test]
    async fn existing_buyer_ip_is_kept() {
        let request = Request::builder()
            .uri("/products")
            .header(BUYER_IP_HEADER, "203.0.113.9")
            .body(AxumBody::empty())
            .expect("request");

        let core_request = into_core_request(with_peer(request, "10.0.0.7:4000"))
            .await
            .expect("request conversion");
        assert_eq!(core_request.headers()[BUYER_IP_HEADER], "203.0.113.9");
    }

    #[tokio::test]
    async fn form_bodies_are_buffered() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/cart")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(AxumBody::from("lineId=l1&quantity=2"))
            .expect("request");

        let core_request = into_core_request(request).await.expect("request conversion");
        match core_request.body() {
            Body::Once(bytes) => assert_eq!(bytes.as_ref(), b"lineId=l1&quantity=2"),
            Body::Stream(_) => panic!("form body should be buffered"),
        }
    }

    #[tokio::test]
    async fn other_bodies_stream() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header("content-type", "application/octet-stream")
            .body(AxumBody::from("binary data"))
            .expect("request");

        let core_request = into_core_request(request).await.expect("request conversion");
        assert!(core_request.body().is_stream());
    }

    #[test]
    fn buffered_content_types() {
        for value in [
            "application/json",
            "application/json; charset=utf-8",
            "application/vnd.api+json",
            "application/x-www-form-urlencoded",
        ] {
            assert!(is_buffered_content_type(&HeaderValue::from_static(value)), "{value}");
        }
        for value in ["text/json", "application/json+xml", "multipart/form-data"] {
            assert!(!is_buffered_content_type(&HeaderValue::from_static(value)), "{value}");
        }
    }
}
