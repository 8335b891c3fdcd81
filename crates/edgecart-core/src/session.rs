//! Cookie-bound sessions.
//!
//! The cookie carries only a session id and a keyed digest of it; the data lives in a
//! [`SessionStorage`]. New cookies are signed with the first usable secret, and every
//! usable secret is accepted when verifying, so secrets can be rotated by prepending.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::{CacheError, CacheHandle};
use crate::error::EdgeError;
use crate::http::{cookie_value, HeaderValue, Request};

pub type SessionData = BTreeMap<String, Value>;

const FLASH_PREFIX: &str = "__flash_";
const FLASH_SUFFIX: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no usable session secret configured")]
    NoUsableSecret,
    #[error("session storage error: {0}")]
    Storage(#[from] CacheError),
    #[error("session value error: {0}")]
    Value(#[from] serde_json::Error),
    #[error("invalid session cookie: {0}")]
    Cookie(String),
}

impl From<SessionError> for EdgeError {
    fn from(err: SessionError) -> Self {
        EdgeError::internal(anyhow::Error::new(err))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes of the session cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age: Option<Duration>,
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            path: "/".to_string(),
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
            max_age: None,
        }
    }
}

impl SessionCookie {
    fn serialize(&self, value: &str, max_age: Option<u64>) -> String {
        let mut cookie = format!("{}={}; Path={}", self.name, value, self.path);
        if let Some(seconds) = max_age {
            cookie.push_str(&format!("; Max-Age={seconds}"));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        cookie
    }
}

fn digest(secret: &str, id: &str) -> Vec<u8> {
    Sha256::new()
        .chain_update(secret.as_bytes())
        .chain_update(b":")
        .chain_update(id.as_bytes())
        .finalize()
        .to_vec()
}

fn sign(secret: &str, id: &str) -> String {
    format!("{id}.{}", hex::encode(digest(secret, id)))
}

/// Returns the session id when the cookie value verifies against any of `secrets`.
fn verify<'a>(value: &'a str, secrets: &[&str]) -> Option<&'a str> {
    let (id, signature) = value.rsplit_once('.')?;
    uuid::Uuid::parse_str(id).ok()?;
    let signature = hex::decode(signature).ok()?;
    secrets
        .iter()
        .any(|secret| constant_time_eq(&digest(secret, id), &signature))
        .then_some(id)
}

/// Compares every byte regardless of where the first mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Backing store for session data.
#[async_trait(?Send)]
pub trait SessionStorage: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError>;

    async fn save(
        &self,
        id: &str,
        data: &SessionData,
        ttl: Option<Duration>,
    ) -> Result<(), SessionError>;

    async fn remove(&self, id: &str) -> Result<(), SessionError>;
}

/// Session data stored in a named cache under `session:{id}`.
pub struct CacheSessionStorage {
    cache: CacheHandle,
}

impl CacheSessionStorage {
    pub fn new(cache: CacheHandle) -> Self {
        Self { cache }
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }
}

#[async_trait(?Send)]
impl SessionStorage for CacheSessionStorage {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        Ok(self.cache.get(&Self::key(id)).await?)
    }

    async fn save(
        &self,
        id: &str,
        data: &SessionData,
        ttl: Option<Duration>,
    ) -> Result<(), SessionError> {
        match ttl {
            Some(ttl) => self.cache.put_with_ttl(&Self::key(id), data, ttl).await?,
            None => self.cache.put(&Self::key(id), data).await?,
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SessionError> {
        Ok(self.cache.delete(&Self::key(id)).await?)
    }
}

/// Host capability that initialises a request's session.
#[async_trait(?Send)]
pub trait SessionService: Send + Sync {
    async fn init(&self, request: &Request, secrets: &[String]) -> Result<Session, SessionError>;
}

/// Default [`SessionService`]: reads the signed id cookie and loads data from storage.
pub struct CookieSessionService {
    storage: Arc<dyn SessionStorage>,
    cookie: SessionCookie,
}

impl CookieSessionService {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_cookie(storage, SessionCookie::default())
    }

    pub fn with_cookie(storage: Arc<dyn SessionStorage>, cookie: SessionCookie) -> Self {
        Self { storage, cookie }
    }

    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }
}

#[async_trait(?Send)]
impl SessionService for CookieSessionService {
    async fn init(&self, request: &Request, secrets: &[String]) -> Result<Session, SessionError> {
        let usable: Vec<&str> = secrets
            .iter()
            .map(String::as_str)
            .filter(|secret| !secret.is_empty())
            .collect();
        let signing_secret = *usable.first().ok_or(SessionError::NoUsableSecret)?;

        let existing = cookie_value(request.headers(), &self.cookie.name)
            .and_then(|value| verify(value, &usable));

        let (id, data) = match existing {
            Some(id) => {
                let data = self.storage.load(id).await?.unwrap_or_default();
                (id.to_string(), data)
            }
            None => (uuid::Uuid::new_v4().to_string(), SessionData::new()),
        };

        Ok(Session::new(id, signing_secret, self.storage.clone())
            .with_cookie(self.cookie.clone())
            .with_data(data))
    }
}

struct SessionState {
    id: String,
    data: SessionData,
    pending: bool,
    destroyed: bool,
}

/// Mutable per-request session. Clones share state, so a host can keep a clone to commit
/// after the handler has consumed the context.
#[derive(Clone)]
pub struct Session {
    state: Rc<RefCell<SessionState>>,
    signing_secret: Arc<str>,
    storage: Arc<dyn SessionStorage>,
    cookie: SessionCookie,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        signing_secret: impl Into<Arc<str>>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(SessionState {
                id: id.into(),
                data: SessionData::new(),
                pending: false,
                destroyed: false,
            })),
            signing_secret: signing_secret.into(),
            storage,
            cookie: SessionCookie::default(),
        }
    }

    pub fn with_cookie(mut self, cookie: SessionCookie) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_data(self, data: SessionData) -> Self {
        self.state.borrow_mut().data = data;
        self
    }

    pub fn id(&self) -> String {
        self.state.borrow().id.clone()
    }

    /// True once the session was changed and needs a `commit`.
    pub fn is_pending(&self) -> bool {
        self.state.borrow().pending
    }

    pub fn has(&self, key: &str) -> bool {
        let state = self.state.borrow();
        state.data.contains_key(key) || state.data.contains_key(&flash_key(key))
    }

    /// Read a value. Flash values are removed by the first read.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        let mut state = self.state.borrow_mut();
        let value = match state.data.remove(&flash_key(key)) {
            Some(flashed) => {
                state.pending = true;
                Some(flashed)
            }
            None => state.data.get(key).cloned(),
        };
        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(SessionError::from)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state.borrow_mut();
        state.data.insert(key.to_string(), value);
        state.pending = true;
        Ok(())
    }

    /// Store a value that is readable exactly once.
    pub fn flash<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state.borrow_mut();
        state.data.insert(flash_key(key), value);
        state.pending = true;
        Ok(())
    }

    pub fn unset(&self, key: &str) {
        let mut state = self.state.borrow_mut();
        state.data.remove(key);
        state.data.remove(&flash_key(key));
        state.pending = true;
    }

    /// Drop all data; the next `commit` removes the stored session and expires the cookie.
    pub fn destroy(&self) {
        let mut state = self.state.borrow_mut();
        state.data.clear();
        state.destroyed = true;
        state.pending = true;
    }

    /// Persist the session and return the `Set-Cookie` header value for the response.
    pub async fn commit(&self) -> Result<HeaderValue, SessionError> {
        let (id, data, destroyed) = {
            let state = self.state.borrow();
            (state.id.clone(), state.data.clone(), state.destroyed)
        };

        let cookie = if destroyed {
            self.storage.remove(&id).await?;
            self.cookie.serialize("", Some(0))
        } else {
            self.storage.save(&id, &data, self.cookie.max_age).await?;
            let max_age = self.cookie.max_age.map(|age| age.as_secs());
            self.cookie.serialize(&sign(&self.signing_secret, &id), max_age)
        };

        self.state.borrow_mut().pending = false;
        HeaderValue::from_str(&cookie).map_err(|err| SessionError::Cookie(err.to_string()))
    }
}

fn flash_key(key: &str) -> String {
    format!("{FLASH_PREFIX}{key}{FLASH_SUFFIX}")
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.state.borrow(), other.state.borrow());
        a.id == b.id
            && a.data == b.data
            && a.pending == b.pending
            && a.destroyed == b.destroyed
            && self.cookie == other.cookie
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("keys", &state.data.keys().collect::<Vec<_>>())
            .field("pending", &state.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::cache::tests::handle;
    use crate::http::{header, request_builder};
    use futures::executor::block_on;

    fn service() -> CookieSessionService {
        let (cache, _) = handle("sessions");
        CookieSessionService::new(Arc::new(CacheSessionStorage::new(cache)))
    }

    fn request(cookie: Option<&str>) -> Request {
        let mut builder = request_builder().uri("/cart");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).expect("request")
    }

    fn cookie_pair(set_cookie: &HeaderValue) -> String {
        let raw = set_cookie.to_str().expect("ascii");
        raw.split(';').next().expect("pair").to_string()
    }

    fn secrets(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn init_requires_a_usable_secret() {
        let err = block_on(service().init(&request(None), &secrets(&["", ""]))).unwrap_err();
        assert!(matches!(err, SessionError::NoUsableSecret));
    }

    #[test]
    fn new_session_round_trips_through_commit() {
        let service = service();
        block_on(async {
            let session = service.init(&request(None), &secrets(&["abc123"])).await.unwrap();
            assert!(!session.is_pending());
            session.set("customerAccessToken", &"tok").unwrap();
            assert!(session.is_pending());

            let set_cookie = session.commit().await.unwrap();
            assert!(!session.is_pending());
            let raw = set_cookie.to_str().unwrap();
            assert!(raw.starts_with("session="));
            assert!(raw.contains("Path=/"));
            assert!(raw.contains("HttpOnly"));
            assert!(raw.contains("SameSite=Lax"));

            let restored = service
                .init(&request(Some(&cookie_pair(&set_cookie))), &secrets(&["abc123"]))
                .await
                .unwrap();
            assert_eq!(restored.id(), session.id());
            assert_eq!(
                restored.get::<String>("customerAccessToken").unwrap(),
                Some("tok".to_string())
            );
        });
    }

    #[test]
    fn rotated_secret_still_verifies_old_cookie() {
        let service = service();
        block_on(async {
            let session = service.init(&request(None), &secrets(&["old"])).await.unwrap();
            session.set("k", &1).unwrap();
            let cookie = cookie_pair(&session.commit().await.unwrap());

            let rotated = service
                .init(&request(Some(&cookie)), &secrets(&["new", "old"]))
                .await
                .unwrap();
            assert_eq!(rotated.id(), session.id());

            let dropped = service
                .init(&request(Some(&cookie)), &secrets(&["new"]))
                .await
                .unwrap();
            assert_ne!(dropped.id(), session.id());
            assert!(!dropped.has("k"));
        });
    }

    #[test]
    fn tampered_cookie_starts_fresh_session() {
        let service = service();
        let id = uuid::Uuid::new_v4().to_string();
        let cookie = format!("session={id}.deadbeef");
        let session =
            block_on(service.init(&request(Some(&cookie)), &secrets(&["abc123"]))).unwrap();
        assert_ne!(session.id(), id);
    }

    #[test]
    fn verify_rejects_same_length_forgeries_and_bad_hex() {
        let id = uuid::Uuid::new_v4().to_string();
        let signed = sign("abc123", &id);
        assert_eq!(verify(&signed, &["old", "abc123"]), Some(id.as_str()));

        let mut forged = signed.clone().into_bytes();
        let last = forged.len() - 1;
        forged[last] = if forged[last] == b'0' { b'1' } else { b'0' };
        let forged = String::from_utf8(forged).unwrap();
        assert_eq!(verify(&forged, &["abc123"]), None);

        assert_eq!(verify(&format!("{id}.not-hex"), &["abc123"]), None);
        assert!(constant_time_eq(b"cart", b"cart"));
        assert!(!constant_time_eq(b"cart", b"car"));
    }

    #[test]
    fn flash_values_are_read_once() {
        let session = block_on(service().init(&request(None), &secrets(&["s"]))).unwrap();
        session.flash("notice", &"Added to cart").unwrap();
        assert!(session.has("notice"));
        assert_eq!(
            session.get::<String>("notice").unwrap(),
            Some("Added to cart".to_string())
        );
        assert_eq!(session.get::<String>("notice").unwrap(), None);
    }

    #[test]
    fn unset_removes_value_and_marks_pending() {
        let session = block_on(service().init(&request(None), &secrets(&["s"]))).unwrap();
        session.set("k", &"v").unwrap();
        block_on(session.commit()).unwrap();
        session.unset("k");
        assert!(session.is_pending());
        assert!(!session.has("k"));
    }

    #[test]
    fn destroy_expires_cookie_and_removes_storage() {
        let service = service();
        block_on(async {
            let session = service.init(&request(None), &secrets(&["s"])).await.unwrap();
            session.set("k", &"v").unwrap();
            let cookie = cookie_pair(&session.commit().await.unwrap());

            session.destroy();
            let expired = session.commit().await.unwrap();
            assert!(expired.to_str().unwrap().contains("Max-Age=0"));

            let again = service
                .init(&request(Some(&cookie)), &secrets(&["s"]))
                .await
                .unwrap();
            assert_eq!(again.id(), session.id());
            assert!(!again.has("k"));
        });
    }

    #[test]
    fn max_age_is_written_to_cookie() {
        let (cache, _) = handle("sessions");
        let cookie = SessionCookie {
            max_age: Some(Duration::from_secs(3600)),
            secure: true,
            ..SessionCookie::default()
        };
        let service =
            CookieSessionService::with_cookie(Arc::new(CacheSessionStorage::new(cache)), cookie);
        let session = block_on(service.init(&request(None), &secrets(&["s"]))).unwrap();
        let raw = block_on(session.commit()).unwrap();
        let raw = raw.to_str().unwrap();
        assert!(raw.contains("Max-Age=3600"));
        assert!(raw.contains("Secure"));
    }

    #[test]
    fn clones_share_state() {
        let session = block_on(service().init(&request(None), &secrets(&["s"]))).unwrap();
        let clone = session.clone();
        clone.set("k", &true).unwrap();
        assert!(session.is_pending());
        assert_eq!(session, clone);
    }
}
