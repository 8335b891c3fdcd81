use crate::body::Body;
use crate::cart::CartHandler;
use crate::error::EdgeError;
use crate::http::Request;
use crate::load_context::AppLoadContext;
use crate::session::Session;
use crate::storefront::Storefront;
use serde::de::DeserializeOwned;

/// Request context exposed to handlers: the inbound request plus its load context.
pub struct RequestContext {
    request: Request,
    load_context: AppLoadContext,
}

impl RequestContext {
    pub fn new(request: Request, load_context: AppLoadContext) -> Self {
        Self {
            request,
            load_context,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn into_parts(self) -> (Request, AppLoadContext) {
        (self.request, self.load_context)
    }

    pub fn load_context(&self) -> &AppLoadContext {
        &self.load_context
    }

    pub fn session(&self) -> &Session {
        self.load_context.session()
    }

    pub fn cart(&self) -> &CartHandler {
        self.load_context.cart()
    }

    pub fn storefront(&self) -> &Storefront {
        self.load_context.storefront()
    }

    pub fn query<T>(&self) -> Result<T, EdgeError>
    where
        T: DeserializeOwned,
    {
        let query = self.request.uri().query().unwrap_or("");
        serde_urlencoded::from_str(query)
            .map_err(|err| EdgeError::bad_request(format!("invalid query string: {}", err)))
    }

    pub fn json<T>(&self) -> Result<T, EdgeError>
    where
        T: DeserializeOwned,
    {
        self.request
            .body()
            .to_json()
            .map_err(|err| EdgeError::bad_request(format!("invalid JSON payload: {}", err)))
    }

    pub fn body(&self) -> &Body {
        self.request.body()
    }

    pub fn form<T>(&self) -> Result<T, EdgeError>
    where
        T: DeserializeOwned,
    {
        let Some(bytes) = self.request.body().buffered() else {
            return Err(EdgeError::bad_request(
                "streaming bodies are not supported for form extraction",
            ));
        };
        serde_urlencoded::from_bytes(bytes)
            .map_err(|err| EdgeError::bad_request(format!("invalid form payload: {}", err)))
    }
}
