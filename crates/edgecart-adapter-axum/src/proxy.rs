use std::time::Duration;

use async_trait::async_trait;
use edgecart_core::body::Body;
use edgecart_core::error::EdgeError;
use edgecart_core::http::{HeaderName, HeaderValue, Method, StatusCode};
use edgecart_core::proxy::{ProxyClient, ProxyRequest, ProxyResponse};
use reqwest::{header, Client};

const STOREFRONT_TIMEOUT: Duration = Duration::from_secs(30);

/// Storefront transport backed by `reqwest`.
pub struct ReqwestProxyClient {
    client: Client,
}

impl ReqwestProxyClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().timeout(STOREFRONT_TIMEOUT).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl ProxyClient for ReqwestProxyClient {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let (method, uri, headers, body) = request.into_parts();
        let mut builder = self.client.request(reqwest_method(&method)?, uri.to_string());

        for (name, value) in headers.iter() {
            let header_name = header::HeaderName::from_bytes(name.as_str().as_bytes())
                .map_err(EdgeError::internal)?;
            let header_value =
                header::HeaderValue::from_bytes(value.as_bytes()).map_err(EdgeError::internal)?;
            builder = builder.header(header_name, header_value);
        }

        let payload = body.collect().await.map_err(EdgeError::internal)?;
        let response = builder
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|err| EdgeError::bad_gateway(format!("storefront request failed: {err}")))?;

        let status =
            StatusCode::from_u16(response.status().as_u16()).map_err(EdgeError::internal)?;
        let mut proxy_response = ProxyResponse::new(status, Body::empty());
        for (name, value) in response.headers().iter() {
            let header_name =
                HeaderName::from_bytes(name.as_str().as_bytes()).map_err(EdgeError::internal)?;
            let header_value =
                HeaderValue::from_bytes(value.as_bytes()).map_err(EdgeError::internal)?;
            proxy_response.headers_mut().append(header_name, header_value);
        }

        let bytes = response.bytes().await.map_err(EdgeError::internal)?;
        *proxy_response.body_mut() = Body::from_bytes(bytes);
        Ok(proxy_response)
    }
}

fn reqwest_method(method: &Method) -> Result<reqwest::Method, EdgeError> {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(EdgeError::internal)
}
