use std::fmt;

use crate::cache::CacheHandle;
use crate::cart::{CartConfig, CartHandler};
use crate::env::Environment;
use crate::http::HeaderMap;
use crate::i18n::I18n;
use crate::proxy::ProxyHandle;
use crate::session::Session;
use crate::storefront::{Storefront, StorefrontConfig};
use crate::wait_until::WaitUntilHandle;

/// Everything needed to assemble a [`CommerceContext`] for one request.
pub struct CommerceContextOptions {
    pub env: Environment,
    pub request_headers: HeaderMap,
    pub cache: CacheHandle,
    pub wait_until: WaitUntilHandle,
    pub session: Session,
    pub i18n: I18n,
    pub transport: ProxyHandle,
    pub cart: CartConfig,
}

/// Per-request commerce services: storefront client, cart handler and the resources they
/// were built from.
pub struct CommerceContext {
    env: Environment,
    cache: CacheHandle,
    wait_until: WaitUntilHandle,
    session: Session,
    i18n: I18n,
    storefront: Storefront,
    cart: CartHandler,
}

impl CommerceContext {
    pub fn create(options: CommerceContextOptions) -> Self {
        let CommerceContextOptions {
            env,
            request_headers,
            cache,
            wait_until,
            session,
            i18n,
            transport,
            cart,
        } = options;

        let storefront = Storefront::new(StorefrontConfig::from_env(&env), i18n.clone(), transport)
            .with_cache(cache.clone(), wait_until.clone())
            .with_request_headers(&request_headers);
        let cart = CartHandler::new(storefront.clone(), request_headers, cart);

        Self {
            env,
            cache,
            wait_until,
            session,
            i18n,
            storefront,
            cart,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    pub fn wait_until(&self) -> &WaitUntilHandle {
        &self.wait_until
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn i18n(&self) -> &I18n {
        &self.i18n
    }

    pub fn storefront(&self) -> &Storefront {
        &self.storefront
    }

    pub fn cart(&self) -> &CartHandler {
        &self.cart
    }
}

impl PartialEq for CommerceContext {
    fn eq(&self, other: &Self) -> bool {
        self.env == other.env
            && self.cache == other.cache
            && self.session == other.session
            && self.i18n == other.i18n
            && self.storefront.config() == other.storefront.config()
            && self.cart.get_cart_id() == other.cart.get_cart_id()
    }
}

impl fmt::Debug for CommerceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommerceContext")
            .field("cache", &self.cache)
            .field("session", &self.session)
            .field("i18n", &self.i18n)
            .field("storefront", &self.storefront)
            .finish_non_exhaustive()
    }
}
