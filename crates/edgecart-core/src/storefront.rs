//! Storefront API client.
//!
//! Queries and mutations are posted as GraphQL-over-HTTP through the request's
//! [`ProxyHandle`]. Successful query results can be cached in the request's cache handle;
//! the cache write is deferred through `wait_until` so it never delays the response.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::body::Body;
use crate::cache::CacheHandle;
use crate::env::{
    Environment, PRIVATE_STOREFRONT_API_TOKEN, PUBLIC_STOREFRONT_API_TOKEN,
    PUBLIC_STOREFRONT_API_VERSION, PUBLIC_STOREFRONT_ID, PUBLIC_STORE_DOMAIN,
};
use crate::error::EdgeError;
use crate::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use crate::i18n::I18n;
use crate::proxy::{ProxyHandle, ProxyRequest};
use crate::wait_until::WaitUntilHandle;

pub const DEFAULT_STORE_DOMAIN: &str = "mock.shop";
pub const DEFAULT_API_VERSION: &str = "2025-01";
const SDK_VARIANT: &str = "edgecart";

const PRIVATE_TOKEN_HEADER: &str = "shopify-storefront-private-token";
const PUBLIC_TOKEN_HEADER: &str = "x-shopify-storefront-access-token";
const STOREFRONT_ID_HEADER: &str = "shopify-storefront-id";
const BUYER_IP_HEADER: &str = "shopify-storefront-buyer-ip";
const INBOUND_BUYER_IP_HEADER: &str = "oxygen-buyer-ip";
const INBOUND_REQUEST_ID_HEADER: &str = "request-id";

#[derive(Debug, thiserror::Error)]
pub enum StorefrontError {
    #[error("{method} cannot execute a {found} document")]
    InvalidOperation {
        method: &'static str,
        found: &'static str,
    },
    #[error("invalid storefront configuration: {0}")]
    InvalidConfig(String),
    #[error("storefront transport failed: {0}")]
    Transport(#[from] EdgeError),
    #[error("storefront responded with {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("storefront response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("storefront returned errors: {}", join_messages(.errors))]
    GraphQl { errors: Vec<GraphQlError> },
    #[error("storefront response contained no data")]
    MissingData,
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|err| err.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StorefrontError> for EdgeError {
    fn from(err: StorefrontError) -> Self {
        match err {
            StorefrontError::Transport(inner) => inner,
            err @ (StorefrontError::Http { .. } | StorefrontError::GraphQl { .. }) => {
                EdgeError::bad_gateway(err.to_string())
            }
            other => EdgeError::internal(anyhow::Error::new(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

/// Storefront API connection settings, usually read from the worker environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorefrontConfig {
    pub store_domain: String,
    pub api_version: String,
    pub public_token: Option<String>,
    pub private_token: Option<String>,
    pub storefront_id: Option<String>,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            store_domain: DEFAULT_STORE_DOMAIN.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            public_token: None,
            private_token: None,
            storefront_id: None,
        }
    }
}

impl StorefrontConfig {
    pub fn from_env(env: &Environment) -> Self {
        let store_domain = match env.get_non_empty(PUBLIC_STORE_DOMAIN) {
            Some(domain) => domain.to_string(),
            None => {
                log::warn!(
                    "{PUBLIC_STORE_DOMAIN} is not set; falling back to {DEFAULT_STORE_DOMAIN}"
                );
                DEFAULT_STORE_DOMAIN.to_string()
            }
        };
        let owned = |key: &str| env.get_non_empty(key).map(str::to_string);
        Self {
            store_domain,
            api_version: owned(PUBLIC_STOREFRONT_API_VERSION)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            public_token: owned(PUBLIC_STOREFRONT_API_TOKEN),
            private_token: owned(PRIVATE_STOREFRONT_API_TOKEN),
            storefront_id: owned(PUBLIC_STOREFRONT_ID),
        }
    }

    pub fn endpoint(&self) -> Result<Uri, StorefrontError> {
        let domain = self.store_domain.trim_end_matches('/');
        let base = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };
        format!("{base}/api/{}/graphql.json", self.api_version)
            .parse()
            .map_err(|err| StorefrontError::InvalidConfig(format!("endpoint: {err}")))
    }
}

/// How long a query result may be served from cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    NoStore,
    #[default]
    Short,
    Long,
    Custom(Duration),
}

impl CachePolicy {
    pub fn ttl(self) -> Option<Duration> {
        match self {
            CachePolicy::NoStore => None,
            CachePolicy::Short => Some(Duration::from_secs(60)),
            CachePolicy::Long => Some(Duration::from_secs(60 * 60)),
            CachePolicy::Custom(ttl) if ttl.is_zero() => None,
            CachePolicy::Custom(ttl) => Some(ttl),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub variables: Map<String, Value>,
    pub cache: CachePolicy,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        // Serialising plain input values into `Value` cannot fail.
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.variables.insert(name.into(), value);
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    fn of(document: &str) -> Self {
        let first = document
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .unwrap_or("");
        if first.starts_with("mutation") {
            OperationKind::Mutation
        } else {
            OperationKind::Query
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

#[derive(Clone)]
struct QueryCache {
    handle: CacheHandle,
    wait_until: WaitUntilHandle,
}

/// Per-request storefront client.
#[derive(Clone)]
pub struct Storefront {
    config: Arc<StorefrontConfig>,
    i18n: I18n,
    transport: ProxyHandle,
    cache: Option<QueryCache>,
    forwarded: HeaderMap,
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("store_domain", &self.config.store_domain)
            .field("api_version", &self.config.api_version)
            .field("i18n", &self.i18n)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Storefront {
    pub fn new(config: StorefrontConfig, i18n: I18n, transport: ProxyHandle) -> Self {
        Self {
            config: Arc::new(config),
            i18n,
            transport,
            cache: None,
            forwarded: HeaderMap::new(),
        }
    }

    /// Enable query caching; cache writes are scheduled through `wait_until`.
    pub fn with_cache(mut self, handle: CacheHandle, wait_until: WaitUntilHandle) -> Self {
        self.cache = Some(QueryCache { handle, wait_until });
        self
    }

    /// Forward buyer metadata from the inbound request to the storefront.
    pub fn with_request_headers(mut self, headers: &HeaderMap) -> Self {
        let mut forwarded = HeaderMap::new();
        if let Some(ip) = headers.get(INBOUND_BUYER_IP_HEADER) {
            forwarded.insert(HeaderName::from_static(BUYER_IP_HEADER), ip.clone());
        }
        if let Some(id) = headers.get(INBOUND_REQUEST_ID_HEADER) {
            forwarded.insert(HeaderName::from_static("x-request-id"), id.clone());
        }
        self.forwarded = forwarded;
        self
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    pub fn i18n(&self) -> &I18n {
        &self.i18n
    }

    pub async fn query<T>(&self, document: &str, options: QueryOptions) -> Result<T, StorefrontError>
    where
        T: DeserializeOwned,
    {
        if OperationKind::of(document) != OperationKind::Query {
            return Err(StorefrontError::InvalidOperation {
                method: "storefront.query",
                found: OperationKind::Mutation.as_str(),
            });
        }

        let payload = self.payload(document, options.variables);
        let cache = match (&self.cache, options.cache.ttl()) {
            (Some(cache), Some(ttl)) => Some((cache, ttl, self.cache_key(&payload))),
            _ => None,
        };

        if let Some((cache, _, key)) = &cache {
            match cache.handle.get::<Value>(key).await {
                Ok(Some(data)) => {
                    log::debug!("storefront cache hit {key}");
                    return Ok(serde_json::from_value(data)?);
                }
                Ok(None) => log::debug!("storefront cache miss {key}"),
                Err(err) => log::warn!("storefront cache read failed for {key}: {err}"),
            }
        }

        let data = self.execute(&payload).await?;

        if let Some((cache, ttl, key)) = cache {
            let handle = cache.handle.clone();
            let stored = data.clone();
            cache.wait_until.wait_until(async move {
                if let Err(err) = handle.put_with_ttl(&key, &stored, ttl).await {
                    log::warn!("storefront cache write failed for {key}: {err}");
                }
            });
        }

        Ok(serde_json::from_value(data)?)
    }

    pub async fn mutate<T>(&self, document: &str, variables: Map<String, Value>) -> Result<T, StorefrontError>
    where
        T: DeserializeOwned,
    {
        if OperationKind::of(document) != OperationKind::Mutation {
            return Err(StorefrontError::InvalidOperation {
                method: "storefront.mutate",
                found: OperationKind::Query.as_str(),
            });
        }
        let payload = self.payload(document, variables);
        let data = self.execute(&payload).await?;
        Ok(serde_json::from_value(data)?)
    }

    fn payload(&self, document: &str, mut variables: Map<String, Value>) -> Value {
        if document.contains("$country") && !variables.contains_key("country") {
            variables.insert("country".into(), Value::String(self.i18n.country.clone()));
        }
        if document.contains("$language") && !variables.contains_key("language") {
            variables.insert("language".into(), Value::String(self.i18n.language.clone()));
        }
        json!({ "query": document, "variables": variables })
    }

    fn cache_key(&self, payload: &Value) -> String {
        let hash = Sha256::new()
            .chain_update(self.config.store_domain.as_bytes())
            .chain_update(b"|")
            .chain_update(self.config.api_version.as_bytes())
            .chain_update(b"|")
            .chain_update(payload.to_string().as_bytes())
            .finalize();
        format!("storefront:{}", hex::encode(hash))
    }

    fn headers(&self) -> Result<HeaderMap, StorefrontError> {
        let value = |raw: &str| {
            HeaderValue::from_str(raw)
                .map_err(|err| StorefrontError::InvalidConfig(format!("header value: {err}")))
        };

        let mut headers = self.forwarded.clone();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-sdk-variant"),
            HeaderValue::from_static(SDK_VARIANT),
        );
        headers.insert(
            HeaderName::from_static("x-sdk-version"),
            value(&self.config.api_version)?,
        );
        if let Some(token) = &self.config.private_token {
            headers.insert(HeaderName::from_static(PRIVATE_TOKEN_HEADER), value(token)?);
        } else if let Some(token) = &self.config.public_token {
            headers.insert(HeaderName::from_static(PUBLIC_TOKEN_HEADER), value(token)?);
        }
        if let Some(id) = &self.config.storefront_id {
            headers.insert(HeaderName::from_static(STOREFRONT_ID_HEADER), value(id)?);
        }
        Ok(headers)
    }

    async fn execute(&self, payload: &Value) -> Result<Value, StorefrontError> {
        let mut request = ProxyRequest::new(Method::POST, self.config.endpoint()?);
        *request.headers_mut() = self.headers()?;
        *request.body_mut() = Body::json(payload)?;

        let response = self.transport.send(request).await?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(EdgeError::internal)?;

        if !status.is_success() {
            return Err(StorefrontError::Http {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let parsed: GraphQlResponse = serde_json::from_slice(&bytes)?;
        if !parsed.errors.is_empty() {
            return Err(StorefrontError::GraphQl {
                errors: parsed.errors,
            });
        }
        parsed.data.ok_or(StorefrontError::MissingData)
    }
}
