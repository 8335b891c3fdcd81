//! Axum host for EdgeCart storefront handlers.

#[cfg(feature = "axum")]
mod cache;
#[cfg(feature = "axum")]
mod dev_server;
#[cfg(feature = "axum")]
mod proxy;
#[cfg(feature = "axum")]
mod request;
#[cfg(feature = "axum")]
mod response;
#[cfg(feature = "axum")]
mod service;

#[cfg(feature = "axum")]
pub use cache::MemoryCacheStore;
#[cfg(feature = "axum")]
pub use dev_server::{run_app, AxumDevServer, AxumDevServerConfig};
#[cfg(feature = "axum")]
pub use proxy::ReqwestProxyClient;
#[cfg(feature = "axum")]
pub use request::{into_core_request, BUYER_IP_HEADER};
#[cfg(feature = "axum")]
pub use response::into_axum_response;
#[cfg(feature = "axum")]
pub use service::{EdgeCartAxumService, StorefrontServices};
