//! Outbound HTTP seam. The storefront client talks to the commerce API through a
//! [`ProxyClient`], so each host plugs in its own fetch implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::body::Body;
use crate::error::EdgeError;
use crate::http::{HeaderMap, Method, StatusCode, Uri};

/// Outbound request description.
pub struct ProxyRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_parts(self) -> (Method, Uri, HeaderMap, Body) {
        (self.method, self.uri, self.headers, self.body)
    }
}

impl fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .finish()
    }
}

pub struct ProxyResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

impl fmt::Debug for ProxyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyResponse")
            .field("status", &self.status)
            .finish()
    }
}

/// Cloneable, process-wide handle to the outbound client.
#[derive(Clone)]
pub struct ProxyHandle {
    client: Arc<dyn ProxyClient>,
}

impl ProxyHandle {
    pub fn new(client: Arc<dyn ProxyClient>) -> Self {
        Self { client }
    }

    pub fn with_client<C>(client: C) -> Self
    where
        C: ProxyClient + 'static,
    {
        Self {
            client: Arc::new(client),
        }
    }

    pub async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        self.client.send(request).await
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle").finish_non_exhaustive()
    }
}

#[async_trait(?Send)]
pub trait ProxyClient: Send + Sync {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HeaderValue;
    use bytes::Bytes;
    use futures::executor::block_on;
    use futures_util::stream;

    struct EchoClient;

    #[async_trait(?Send)]
    impl ProxyClient for EchoClient {
        async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
            let (method, uri, headers, body) = request.into_parts();
            assert_eq!(method, Method::POST);
            assert_eq!(uri, Uri::from_static("https://shop.example/api/graphql.json"));
            assert_eq!(
                headers.get("x-shopify-storefront-access-token"),
                Some(&HeaderValue::from_static("public"))
            );
            let bytes = body.collect().await.map_err(EdgeError::internal)?;
            let chunks = stream::iter(vec![Ok::<_, std::io::Error>(bytes)]);
            Ok(ProxyResponse::new(StatusCode::OK, Body::from_stream(chunks)))
        }
    }

    struct FailingClient;

    #[async_trait(?Send)]
    impl ProxyClient for FailingClient {
        async fn send(&self, _request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
            Err(EdgeError::internal(anyhow::anyhow!("connection refused")))
        }
    }

    #[test]
    fn handle_sends_through_client() {
        let handle = ProxyHandle::with_client(EchoClient);
        let mut request = ProxyRequest::new(
            Method::POST,
            Uri::from_static("https://shop.example/api/graphql.json"),
        );
        request
            .headers_mut()
            .insert("x-shopify-storefront-access-token", HeaderValue::from_static("public"));
        *request.body_mut() = Body::from("{\"query\":\"{ shop { name } }\"}");

        let response = block_on(handle.send(request)).expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = block_on(response.into_body().collect()).expect("body");
        assert_eq!(bytes, Bytes::from_static(b"{\"query\":\"{ shop { name } }\"}"));
    }

    #[test]
    fn handle_propagates_client_errors() {
        let handle = ProxyHandle::with_client(FailingClient);
        let request = ProxyRequest::new(Method::GET, Uri::from_static("https://shop.example"));
        let err = block_on(handle.send(request)).expect_err("error");
        assert!(err.message().contains("connection refused"));
    }

    #[test]
    fn proxy_request_starts_empty() {
        let req = ProxyRequest::new(Method::GET, Uri::from_static("https://shop.example"));
        assert_eq!(req.method(), &Method::GET);
        assert!(req.headers().is_empty());
        assert!(req.body().buffered().is_some_and(|b| b.is_empty()));
    }

    #[test]
    fn debug_output_includes_method_and_status() {
        let req = ProxyRequest::new(Method::POST, Uri::from_static("https://shop.example"));
        assert!(format!("{:?}", req).contains("POST"));
        let res = ProxyResponse::new(StatusCode::BAD_GATEWAY, Body::empty());
        assert!(format!("{:?}", res).contains("502"));
    }
}
