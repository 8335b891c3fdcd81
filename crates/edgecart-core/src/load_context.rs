//! Per-request application context factory.
//!
//! [`create_app_load_context`] validates the session secret, opens the shared cache and the
//! request's session concurrently, and wires both into a [`CommerceContext`]. The cart handler
//! is registered with [`StorefrontCartMethods`], which adds the update-line-by-options
//! operation on top of the default cart routines.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use validator::Validate;

use crate::cache::{CacheError, CacheService};
use crate::cart::{
    cart_get_id_default, cart_lines_update_default, CartConfig, CartCustomMethods,
    CartLineUpdateInput, CartQueryOptions, CartResult, CartScope, SelectedOptionInput,
};
use crate::commerce::{CommerceContext, CommerceContextOptions};
use crate::env::Environment;
use crate::error::EdgeError;
use crate::fragments::{CART_QUERY_FRAGMENT, PRODUCT_VARIANT_QUERY};
use crate::http::Request;
use crate::i18n::I18n;
use crate::proxy::ProxyHandle;
use crate::session::{SessionError, SessionService};
use crate::storefront::QueryOptions;
use crate::wait_until::{ExecutionContext, WaitUntilHandle};

pub const DEFAULT_CACHE_NAME: &str = "hydrogen";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("SESSION_SECRET environment variable is not set")]
    MissingSessionSecret,
    #[error("failed to open cache: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to initialize session: {0}")]
    Session(#[from] SessionError),
    #[error("invalid context settings: {0}")]
    Config(String),
}

impl From<ContextError> for EdgeError {
    fn from(err: ContextError) -> Self {
        EdgeError::internal(anyhow::Error::new(err))
    }
}

/// Static settings applied to every context.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextSettings {
    pub cache_name: String,
    pub i18n: I18n,
    pub cart_fragment: Arc<str>,
    pub cart_cookie_max_age: Option<Duration>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            i18n: I18n::default(),
            cart_fragment: Arc::from(CART_QUERY_FRAGMENT),
            cart_cookie_max_age: None,
        }
    }
}

/// Process-wide collaborators shared by every request.
#[derive(Clone)]
pub struct ContextServices {
    pub cache: Arc<dyn CacheService>,
    pub sessions: Arc<dyn SessionService>,
    pub transport: ProxyHandle,
    pub settings: ContextSettings,
}

impl fmt::Debug for ContextServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextServices")
            .field("transport", &self.transport)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Context handed to request handlers. Currently adds nothing to [`CommerceContext`].
#[derive(Debug, PartialEq)]
pub struct AppLoadContext {
    commerce: CommerceContext,
}

impl AppLoadContext {
    pub fn commerce(&self) -> &CommerceContext {
        &self.commerce
    }
}

impl Deref for AppLoadContext {
    type Target = CommerceContext;

    fn deref(&self) -> &Self::Target {
        &self.commerce
    }
}

pub async fn create_app_load_context(
    request: &Request,
    env: Environment,
    execution_context: Rc<dyn ExecutionContext>,
    services: &ContextServices,
) -> Result<AppLoadContext, ContextError> {
    let secret = env
        .session_secret()
        .ok_or(ContextError::MissingSessionSecret)?
        .to_string();
    let settings = &services.settings;
    settings
        .i18n
        .validate()
        .map_err(|err| ContextError::Config(err.to_string()))?;

    // Both calls always start; a failed cache open does not cancel session init.
    let secrets = [secret];
    let (cache, session) = futures::join!(
        services.cache.open(&settings.cache_name),
        services.sessions.init(request, &secrets),
    );
    let (cache, session) = (cache?, session?);
    log::debug!(
        "load context ready: cache `{}`, session {}",
        cache.name(),
        session.id()
    );

    let commerce = CommerceContext::create(CommerceContextOptions {
        env,
        request_headers: request.headers().clone(),
        cache,
        wait_until: WaitUntilHandle::new(execution_context),
        session,
        i18n: settings.i18n.clone(),
        transport: services.transport.clone(),
        cart: CartConfig {
            query_fragment: Arc::clone(&settings.cart_fragment),
            custom_methods: Rc::new(StorefrontCartMethods),
            cookie_max_age: settings.cart_cookie_max_age,
        },
    });

    Ok(AppLoadContext { commerce })
}

/// Custom cart operations registered on every context.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorefrontCartMethods;

#[derive(Deserialize)]
struct VariantLookup {
    product: Option<VariantProduct>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantProduct {
    selected_variant: Option<VariantRef>,
}

#[derive(Deserialize)]
struct VariantRef {
    id: String,
}

#[async_trait(?Send)]
impl CartCustomMethods for StorefrontCartMethods {
    async fn update_line_by_options(
        &self,
        scope: &CartScope<'_>,
        product_id: &str,
        selected_options: Vec<SelectedOptionInput>,
        line: CartLineUpdateInput,
    ) -> CartResult {
        let query = QueryOptions::new()
            .variable("productId", product_id)
            .variable("selectedOptions", &selected_options);
        let lookup: VariantLookup = scope.storefront().query(PRODUCT_VARIANT_QUERY, query).await?;

        let merchandise_id = lookup
            .product
            .and_then(|product| product.selected_variant)
            .map(|variant| variant.id);
        if merchandise_id.is_none() {
            log::warn!(
                "no variant of {product_id} matches the selected options; updating line {} without merchandise",
                line.id
            );
        }

        let options = CartQueryOptions {
            storefront: scope.storefront(),
            get_cart_id: cart_get_id_default(scope.request_headers()),
            cart_fragment: scope.cart_fragment(),
        };
        let lines = vec![CartLineUpdateInput {
            merchandise_id,
            ..line
        }];
        cart_lines_update_default(&options, lines).await
    }
}
