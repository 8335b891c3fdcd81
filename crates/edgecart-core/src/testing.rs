//! Scripted storefront transport and context fixtures shared by the core's tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::executor::block_on;
use serde_json::Value;

use crate::body::Body;
use crate::cache::tests::{handle, TestStore};
use crate::cache::{CacheRegistry, CacheStore};
use crate::env::{Environment, SESSION_SECRET};
use crate::error::EdgeError;
use crate::http::{HeaderMap, Request, StatusCode, Uri};
use crate::load_context::{create_app_load_context, AppLoadContext, ContextServices, ContextSettings};
use crate::proxy::{ProxyClient, ProxyHandle, ProxyRequest, ProxyResponse};
use crate::session::{CacheSessionStorage, CookieSessionService};
use crate::wait_until::DeferredTasks;

#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Value,
}

impl RecordedRequest {
    pub fn query(&self) -> &str {
        self.body["query"].as_str().unwrap_or_default()
    }

    pub fn variables(&self) -> &Value {
        &self.body["variables"]
    }
}

enum Scripted {
    Reply(StatusCode, Value),
    Fail(String),
}

#[derive(Default)]
pub(crate) struct ScriptedClient {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handle(self: &Arc<Self>) -> ProxyHandle {
        ProxyHandle::new(self.clone())
    }

    pub fn reply(&self, body: Value) -> &Self {
        self.reply_with_status(StatusCode::OK, body)
    }

    pub fn reply_with_status(&self, status: StatusCode, body: Value) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(status, body));
        self
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl ProxyClient for ScriptedClient {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let (_method, uri, headers, body) = request.into_parts();
        let bytes = body.collect().await.map_err(EdgeError::internal)?;
        let body = serde_json::from_slice(&bytes).map_err(EdgeError::internal)?;
        self.requests.lock().unwrap().push(RecordedRequest { uri, headers, body });

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(status, value)) => Ok(ProxyResponse::new(
                status,
                Body::json(&value).map_err(EdgeError::internal)?,
            )),
            Some(Scripted::Fail(message)) => Err(EdgeError::internal(anyhow::anyhow!(message))),
            None => Err(EdgeError::internal(anyhow::anyhow!("no scripted reply left"))),
        }
    }
}

/// Context services backed by in-memory caches and the cookie session service.
pub(crate) fn services(client: &Arc<ScriptedClient>) -> ContextServices {
    let cache = CacheRegistry::new(|_| Ok(Arc::new(TestStore::default()) as Arc<dyn CacheStore>));
    let (session_cache, _) = handle("sessions");
    let storage = Arc::new(CacheSessionStorage::new(session_cache));
    ContextServices {
        cache: Arc::new(cache),
        sessions: Arc::new(CookieSessionService::new(storage)),
        transport: client.handle(),
        settings: ContextSettings::default(),
    }
}

pub(crate) fn load_context(request: &Request, client: &Arc<ScriptedClient>) -> AppLoadContext {
    let env = Environment::new().with(SESSION_SECRET, "abc123");
    let services = services(client);
    block_on(create_app_load_context(request, env, DeferredTasks::new(), &services))
        .expect("load context")
}
