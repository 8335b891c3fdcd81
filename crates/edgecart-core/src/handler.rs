use std::future::Future;
use std::sync::Arc;

use futures_util::future::LocalBoxFuture;

use crate::context::RequestContext;
use crate::error::EdgeError;
use crate::http::Response;
use crate::response::IntoResponse;

pub type HandlerFuture = LocalBoxFuture<'static, Result<Response, EdgeError>>;

/// Request handler run against a fully built load context.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: RequestContext) -> HandlerFuture;
}

impl<F, Fut, Res> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, EdgeError>> + 'static,
    Res: IntoResponse,
{
    fn call(&self, ctx: RequestContext) -> HandlerFuture {
        let fut = (self)(ctx);
        Box::pin(async move {
            let response = fut.await?.into_response();
            Ok(response)
        })
    }
}

pub type BoxHandler = Arc<dyn Handler>;

pub trait IntoHandler {
    fn into_handler(self) -> BoxHandler;
}

impl<H> IntoHandler for H
where
    H: Handler + Sized + 'static,
{
    fn into_handler(self) -> BoxHandler {
        Arc::new(self)
    }
}
