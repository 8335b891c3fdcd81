use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body as AxumBody;
use axum::http::{Request, Response};
use futures::channel::oneshot;
use tokio::{runtime::Handle, task};
use tower::Service;

use edgecart_core::cache::CacheHandle;
use edgecart_core::context::RequestContext;
use edgecart_core::env::Environment;
use edgecart_core::error::EdgeError;
use edgecart_core::handler::BoxHandler;
use edgecart_core::http::{header::SET_COOKIE, Response as CoreResponse};
use edgecart_core::load_context::{create_app_load_context, ContextServices};
use edgecart_core::manifest::Manifest;
use edgecart_core::proxy::ProxyHandle;
use edgecart_core::response::IntoResponse;
use edgecart_core::session::{CacheSessionStorage, CookieSessionService};
use edgecart_core::wait_until::DeferredTasks;

use crate::cache::MemoryCacheStore;
use crate::proxy::ReqwestProxyClient;
use crate::request::into_core_request;
use crate::response::into_axum_response;

/// Process-wide services every request's load context is built from.
#[derive(Clone, Debug)]
pub struct StorefrontServices {
    context: ContextServices,
    env: Environment,
}

impl StorefrontServices {
    pub fn new(context: ContextServices, env: Environment) -> Self {
        Self { context, env }
    }

    /// In-memory caches and sessions, a `reqwest` storefront transport and an environment
    /// resolved from the manifest bindings against the process environment.
    pub fn from_manifest(manifest: &Manifest) -> anyhow::Result<Self> {
        let session_cache = CacheHandle::new("sessions", Arc::new(MemoryCacheStore::new()));
        let storage = Arc::new(CacheSessionStorage::new(session_cache));
        let sessions = CookieSessionService::with_cookie(storage, manifest.session_cookie());

        let context = ContextServices {
            cache: Arc::new(MemoryCacheStore::registry()),
            sessions: Arc::new(sessions),
            transport: ProxyHandle::with_client(ReqwestProxyClient::new()?),
            settings: manifest.context_settings(),
        };
        let env = manifest.resolve_environment(|key| std::env::var(key).ok());
        if env.session_secret().is_none() {
            log::warn!("SESSION_SECRET is not set; every request will fail until it is");
        }
        Ok(Self::new(context, env))
    }

    pub fn context(&self) -> &ContextServices {
        &self.context
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }
}

/// Tower service that builds a load context per request and runs the storefront handler.
#[derive(Clone)]
pub struct EdgeCartAxumService {
    handler: BoxHandler,
    services: StorefrontServices,
}

impl EdgeCartAxumService {
    pub fn new(handler: BoxHandler, services: StorefrontServices) -> Self {
        Self { handler, services }
    }
}

impl Service<Request<AxumBody>> for EdgeCartAxumService {
    type Response = Response<AxumBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<AxumBody>) -> Self::Future {
        let handler = self.handler.clone();
        let services = self.services.clone();
        let runtime = Handle::current();
        let (sender, receiver) = oneshot::channel();

        // Per-request state is `!Send`, so each request lives on one blocking thread. The
        // response is handed back before deferred work runs on that same thread.
        task::spawn_blocking(move || {
            runtime.block_on(async move {
                let tasks = DeferredTasks::new();
                let response = respond(handler, services, request, &tasks).await;
                if sender.send(response).is_err() {
                    log::debug!("connection closed before the response was ready");
                }
                let ran = tasks.drain().await;
                if ran > 0 {
                    log::debug!("ran {ran} deferred task(s)");
                }
            })
        });

        Box::pin(async move {
            Ok(receiver.await.unwrap_or_else(|_| {
                log::error!("request worker exited without a response");
                into_axum_response(
                    EdgeError::internal(anyhow::anyhow!("request worker stopped")).into_response(),
                )
            }))
        })
    }
}

/// Build the context, run the handler and attach the session cookie. Deferred work queued
/// on `tasks` is left for the caller.
async fn respond(
    handler: BoxHandler,
    services: StorefrontServices,
    request: Request<AxumBody>,
    tasks: &Rc<DeferredTasks>,
) -> Response<AxumBody> {
    let request = match into_core_request(request).await {
        Ok(request) => request,
        Err(e) => return into_axum_response(EdgeError::bad_request(e).into_response()),
    };

    let load_context = match create_app_load_context(
        &request,
        services.env.clone(),
        tasks.clone(),
        &services.context,
    )
    .await
    {
        Ok(ctx) => ctx,
        Err(err) => {
            log::error!("failed to create load context: {err}");
            return into_axum_response(EdgeError::from(err).into_response());
        }
    };

    let session = load_context.session().clone();
    let mut response: CoreResponse = match handler.call(RequestContext::new(request, load_context)).await {
        Ok(response) => response,
        Err(err) => {
            log::debug!("handler returned {}: {}", err.status(), err.message());
            err.into_response()
        }
    };

    if session.is_pending() {
        match session.commit().await {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(err) => log::warn!("failed to commit session: {err}"),
        }
    }

    into_axum_response(response)
}
