//! Cart value types, default cart routines and the per-request cart handler.
//!
//! Default routines are free functions over [`CartQueryOptions`], which bind a storefront
//! client, a cart id lookup and the cart fragment. [`CartHandler`] wires them to the current
//! request and exposes application-specific operations through [`CartCustomMethods`].

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fragments;
use crate::http::{cookie_value, HeaderMap, HeaderValue};
use crate::storefront::{CachePolicy, QueryOptions, Storefront, StorefrontError};

pub const CART_COOKIE: &str = "cart";
pub const CART_ID_PREFIX: &str = "gid://shopify/Cart/";

pub type CartResult = Result<CartQueryDataReturn, StorefrontError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedOptionInput {
    pub name: String,
    pub value: String,
}

impl SelectedOptionInput {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInput {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineInput {
    pub merchandise_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<AttributeInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selling_plan_id: Option<String>,
}

/// Partial update of an existing cart line. An absent `merchandise_id` is omitted from the
/// request entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineUpdateInput {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchandise_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<AttributeInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selling_plan_id: Option<String>,
}

impl CartLineUpdateInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<CartLineInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_codes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<AttributeInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_identity: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartUserError {
    pub message: String,
    #[serde(default)]
    pub field: Option<Vec<String>>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartWarning {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

/// Outcome of a cart mutation: the cart as selected by the fragment plus API feedback.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartQueryDataReturn {
    #[serde(default)]
    pub cart: Option<Value>,
    #[serde(default)]
    pub user_errors: Vec<CartUserError>,
    #[serde(default)]
    pub warnings: Vec<CartWarning>,
}

/// Deferred cart id lookup. Resolution happens when a routine runs, not when it is bound.
#[derive(Clone)]
pub struct CartIdLookup(Rc<dyn Fn() -> Option<String>>);

impl CartIdLookup {
    pub fn new<F>(lookup: F) -> Self
    where
        F: Fn() -> Option<String> + 'static,
    {
        Self(Rc::new(lookup))
    }

    pub fn get(&self) -> Option<String> {
        (self.0)()
    }
}

impl fmt::Debug for CartIdLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CartIdLookup").finish()
    }
}

/// Cart id lookup reading the `cart` cookie from `headers`.
pub fn cart_get_id_default(headers: &HeaderMap) -> CartIdLookup {
    let headers = headers.clone();
    CartIdLookup::new(move || {
        cookie_value(&headers, CART_COOKIE)
            .filter(|id| !id.is_empty())
            .map(|id| format!("{CART_ID_PREFIX}{id}"))
    })
}

/// `Set-Cookie` value persisting `cart_id` (stored without its gid prefix).
pub fn cart_set_id_default(
    cart_id: &str,
    max_age: Option<Duration>,
) -> Result<HeaderValue, StorefrontError> {
    let id = cart_id.rsplit('/').next().unwrap_or(cart_id);
    let mut cookie = format!("{CART_COOKIE}={id}; Path=/; SameSite=Lax");
    if let Some(age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", age.as_secs()));
    }
    HeaderValue::from_str(&cookie)
        .map_err(|err| StorefrontError::InvalidConfig(format!("cart cookie: {err}")))
}

/// Bindings shared by the default cart routines.
#[derive(Clone, Debug)]
pub struct CartQueryOptions<'a> {
    pub storefront: &'a Storefront,
    pub get_cart_id: CartIdLookup,
    pub cart_fragment: &'a str,
}

impl CartQueryOptions<'_> {
    fn cart_id(&self) -> Value {
        self.get_cart_id.get().map(Value::String).unwrap_or(Value::Null)
    }

    async fn mutate(
        &self,
        field: &str,
        document: String,
        variables: Map<String, Value>,
    ) -> CartResult {
        let mut data: Map<String, Value> = self.storefront.mutate(&document, variables).await?;
        match data.remove(field) {
            Some(Value::Null) | None => Ok(CartQueryDataReturn::default()),
            Some(payload) => Ok(serde_json::from_value(payload)?),
        }
    }
}

fn variables<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Fetch the current cart. Returns `None` without any request when there is no cart id.
pub async fn cart_get_default(options: &CartQueryOptions<'_>) -> Result<Option<Value>, StorefrontError> {
    let Some(cart_id) = options.get_cart_id.get() else {
        return Ok(None);
    };
    let document = fragments::cart_query(options.cart_fragment);
    let query = QueryOptions::new()
        .variable("cartId", cart_id)
        .cache(CachePolicy::NoStore);
    let mut data: Map<String, Value> = options.storefront.query(&document, query).await?;
    Ok(data.remove("cart").filter(|cart| !cart.is_null()))
}

pub async fn cart_create_default(options: &CartQueryOptions<'_>, input: CartInput) -> CartResult {
    let vars = variables([("input", serde_json::to_value(input)?)]);
    options
        .mutate("cartCreate", fragments::cart_create_mutation(options.cart_fragment), vars)
        .await
}

pub async fn cart_lines_add_default(
    options: &CartQueryOptions<'_>,
    lines: Vec<CartLineInput>,
) -> CartResult {
    let vars = variables([
        ("cartId", options.cart_id()),
        ("lines", serde_json::to_value(lines)?),
    ]);
    options
        .mutate("cartLinesAdd", fragments::cart_lines_add_mutation(options.cart_fragment), vars)
        .await
}

pub async fn cart_lines_update_default(
    options: &CartQueryOptions<'_>,
    lines: Vec<CartLineUpdateInput>,
) -> CartResult {
    let vars = variables([
        ("cartId", options.cart_id()),
        ("lines", serde_json::to_value(lines)?),
    ]);
    options
        .mutate(
            "cartLinesUpdate",
            fragments::cart_lines_update_mutation(options.cart_fragment),
            vars,
        )
        .await
}

pub async fn cart_lines_remove_default(
    options: &CartQueryOptions<'_>,
    line_ids: Vec<String>,
) -> CartResult {
    let vars = variables([
        ("cartId", options.cart_id()),
        ("lineIds", serde_json::to_value(line_ids)?),
    ]);
    options
        .mutate(
            "cartLinesRemove",
            fragments::cart_lines_remove_mutation(options.cart_fragment),
            vars,
        )
        .await
}

pub async fn cart_note_update_default(options: &CartQueryOptions<'_>, note: String) -> CartResult {
    let vars = variables([("cartId", options.cart_id()), ("note", Value::String(note))]);
    options
        .mutate(
            "cartNoteUpdate",
            fragments::cart_note_update_mutation(options.cart_fragment),
            vars,
        )
        .await
}

pub async fn cart_discount_codes_update_default(
    options: &CartQueryOptions<'_>,
    discount_codes: Vec<String>,
) -> CartResult {
    let vars = variables([
        ("cartId", options.cart_id()),
        ("discountCodes", serde_json::to_value(discount_codes)?),
    ]);
    options
        .mutate(
            "cartDiscountCodesUpdate",
            fragments::cart_discount_codes_update_mutation(options.cart_fragment),
            vars,
        )
        .await
}

/// What a custom cart operation may touch. Only [`CartHandler`] builds one, so custom
/// operations always run against a fully constructed storefront client.
pub struct CartScope<'a> {
    storefront: &'a Storefront,
    request_headers: &'a HeaderMap,
    cart_fragment: &'a str,
}

impl<'a> CartScope<'a> {
    pub fn storefront(&self) -> &'a Storefront {
        self.storefront
    }

    pub fn request_headers(&self) -> &'a HeaderMap {
        self.request_headers
    }

    pub fn cart_fragment(&self) -> &'a str {
        self.cart_fragment
    }
}

/// Application-specific cart operations registered when the context is built.
#[async_trait(?Send)]
pub trait CartCustomMethods {
    /// Replace a line's merchandise with the variant matching `selected_options`.
    async fn update_line_by_options(
        &self,
        scope: &CartScope<'_>,
        product_id: &str,
        selected_options: Vec<SelectedOptionInput>,
        line: CartLineUpdateInput,
    ) -> CartResult;
}

/// Cart settings passed to the commerce context.
#[derive(Clone)]
pub struct CartConfig {
    pub query_fragment: Arc<str>,
    pub custom_methods: Rc<dyn CartCustomMethods>,
    pub cookie_max_age: Option<Duration>,
}

impl CartConfig {
    pub fn new(query_fragment: impl Into<Arc<str>>, custom_methods: Rc<dyn CartCustomMethods>) -> Self {
        Self {
            query_fragment: query_fragment.into(),
            custom_methods,
            cookie_max_age: None,
        }
    }
}

impl fmt::Debug for CartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartConfig")
            .field("query_fragment_len", &self.query_fragment.len())
            .field("cookie_max_age", &self.cookie_max_age)
            .finish_non_exhaustive()
    }
}

/// Per-request cart API bound to the inbound request's cookies.
#[derive(Clone)]
pub struct CartHandler {
    storefront: Storefront,
    request_headers: HeaderMap,
    config: CartConfig,
}

impl fmt::Debug for CartHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartHandler")
            .field("cart_id", &self.get_cart_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CartHandler {
    pub fn new(storefront: Storefront, request_headers: HeaderMap, config: CartConfig) -> Self {
        Self {
            storefront,
            request_headers,
            config,
        }
    }

    fn options(&self) -> CartQueryOptions<'_> {
        CartQueryOptions {
            storefront: &self.storefront,
            get_cart_id: cart_get_id_default(&self.request_headers),
            cart_fragment: &self.config.query_fragment,
        }
    }

    pub fn get_cart_id(&self) -> Option<String> {
        cart_get_id_default(&self.request_headers).get()
    }

    pub fn set_cart_id(&self, cart_id: &str) -> Result<HeaderValue, StorefrontError> {
        cart_set_id_default(cart_id, self.config.cookie_max_age)
    }

    pub async fn get(&self) -> Result<Option<Value>, StorefrontError> {
        cart_get_default(&self.options()).await
    }

    pub async fn create(&self, input: CartInput) -> CartResult {
        cart_create_default(&self.options(), input).await
    }

    /// Add lines to the current cart, creating a cart when the request has none.
    pub async fn add_lines(&self, lines: Vec<CartLineInput>) -> CartResult {
        let options = self.options();
        if options.get_cart_id.get().is_none() {
            let input = CartInput {
                lines,
                ..CartInput::default()
            };
            return cart_create_default(&options, input).await;
        }
        cart_lines_add_default(&options, lines).await
    }

    pub async fn update_lines(&self, lines: Vec<CartLineUpdateInput>) -> CartResult {
        cart_lines_update_default(&self.options(), lines).await
    }

    pub async fn remove_lines(&self, line_ids: Vec<String>) -> CartResult {
        cart_lines_remove_default(&self.options(), line_ids).await
    }

    pub async fn update_note(&self, note: impl Into<String>) -> CartResult {
        cart_note_update_default(&self.options(), note.into()).await
    }

    pub async fn update_discount_codes(&self, discount_codes: Vec<String>) -> CartResult {
        cart_discount_codes_update_default(&self.options(), discount_codes).await
    }

    pub async fn update_line_by_options(
        &self,
        product_id: &str,
        selected_options: Vec<SelectedOptionInput>,
        line: CartLineUpdateInput,
    ) -> CartResult {
        let scope = CartScope {
            storefront: &self.storefront,
            request_headers: &self.request_headers,
            cart_fragment: &self.config.query_fragment,
        };
        self.config
            .custom_methods
            .update_line_by_options(&scope, product_id, selected_options, line)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::CART_QUERY_FRAGMENT;
    use crate::http::header;
    use crate::i18n::I18n;
    use crate::storefront::StorefrontConfig;
    use crate::testing::ScriptedClient;
    use futures::executor::block_on;
    use serde_json::json;

    struct EchoLineMethods;

    #[async_trait(?Send)]
    impl CartCustomMethods for EchoLineMethods {
        async fn update_line_by_options(
            &self,
            scope: &CartScope<'_>,
            product_id: &str,
            _selected_options: Vec<SelectedOptionInput>,
            mut line: CartLineUpdateInput,
        ) -> CartResult {
            line.merchandise_id = Some(format!("{product_id}/variant"));
            let options = CartQueryOptions {
                storefront: scope.storefront(),
                get_cart_id: cart_get_id_default(scope.request_headers()),
                cart_fragment: scope.cart_fragment(),
            };
            cart_lines_update_default(&options, vec![line]).await
        }
    }

    fn headers_with_cart(cart: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cart) = cart {
            headers.insert(header::COOKIE, HeaderValue::from_static(cart));
        }
        headers
    }

    fn handler(client: &Arc<ScriptedClient>, cookie: Option<&'static str>) -> CartHandler {
        let storefront = Storefront::new(StorefrontConfig::default(), I18n::default(), client.handle());
        CartHandler::new(
            storefront,
            headers_with_cart(cookie),
            CartConfig::new(CART_QUERY_FRAGMENT, Rc::new(EchoLineMethods)),
        )
    }

    fn mutation_reply(field: &str) -> Value {
        json!({"data": {field: {
            "cart": {"id": "gid://shopify/Cart/c1", "totalQuantity": 1},
            "userErrors": [],
            "warnings": []
        }}})
    }

    #[test]
    fn cart_id_is_read_from_cookie_lazily() {
        let lookup = cart_get_id_default(&headers_with_cart(Some("theme=x; cart=c1?key=abc")));
        assert_eq!(lookup.get().as_deref(), Some("gid://shopify/Cart/c1?key=abc"));
        assert_eq!(cart_get_id_default(&HeaderMap::new()).get(), None);
        assert_eq!(cart_get_id_default(&headers_with_cart(Some("cart="))).get(), None);
    }

    #[test]
    fn set_cart_id_strips_gid_prefix() {
        let value = cart_set_id_default("gid://shopify/Cart/c1?key=abc", None).unwrap();
        assert_eq!(value, "cart=c1?key=abc; Path=/; SameSite=Lax");
        let value = cart_set_id_default("c2", Some(Duration::from_secs(60))).unwrap();
        assert_eq!(value, "cart=c2; Path=/; SameSite=Lax; Max-Age=60");
    }

    #[test]
    fn update_line_serialises_without_absent_merchandise() {
        let line = CartLineUpdateInput::new("line1").quantity(2);
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"id": "line1", "quantity": 2})
        );
    }

    #[test]
    fn update_lines_sends_cart_id_and_lines() {
        let client = ScriptedClient::new();
        client.reply(mutation_reply("cartLinesUpdate"));
        let cart = handler(&client, Some("cart=c1"));

        let result = block_on(cart.update_lines(vec![CartLineUpdateInput::new("l1").quantity(3)]))
            .unwrap();
        assert_eq!(result.cart.unwrap()["totalQuantity"], 1);
        assert!(result.user_errors.is_empty());

        let sent = &client.requests()[0];
        assert!(sent.query().starts_with("mutation cartLinesUpdate("));
        assert_eq!(sent.variables()["cartId"], "gid://shopify/Cart/c1");
        assert_eq!(sent.variables()["lines"], json!([{"id": "l1", "quantity": 3}]));
        assert_eq!(sent.variables()["country"], "US");
    }

    #[test]
    fn mutations_without_cart_id_send_null() {
        let client = ScriptedClient::new();
        client.reply(json!({"data": {"cartLinesRemove": {
            "cart": null,
            "userErrors": [{"message": "The specified cart does not exist.", "field": ["cartId"], "code": "INVALID"}]
        }}}));
        let cart = handler(&client, None);

        let result = block_on(cart.remove_lines(vec!["l1".into()])).unwrap();
        assert_eq!(result.cart, None);
        assert_eq!(result.user_errors[0].code.as_deref(), Some("INVALID"));
        assert!(client.requests()[0].variables()["cartId"].is_null());
    }

    #[test]
    fn add_lines_creates_cart_when_missing() {
        let client = ScriptedClient::new();
        client.reply(mutation_reply("cartCreate"));
        let cart = handler(&client, None);
        let line = CartLineInput {
            merchandise_id: "gid://shopify/ProductVariant/9".into(),
            quantity: Some(1),
            ..CartLineInput::default()
        };

        block_on(cart.add_lines(vec![line])).unwrap();
        let sent = &client.requests()[0];
        assert!(sent.query().starts_with("mutation cartCreate("));
        assert_eq!(
            sent.variables()["input"],
            json!({"lines": [{"merchandiseId": "gid://shopify/ProductVariant/9", "quantity": 1}]})
        );
    }

    #[test]
    fn add_lines_appends_to_existing_cart() {
        let client = ScriptedClient::new();
        client.reply(mutation_reply("cartLinesAdd"));
        let cart = handler(&client, Some("cart=c1"));
        block_on(cart.add_lines(vec![CartLineInput::default()])).unwrap();
        assert!(client.requests()[0].query().starts_with("mutation cartLinesAdd("));
    }

    #[test]
    fn get_skips_request_without_cart_and_reads_cart_otherwise() {
        let client = ScriptedClient::new();
        assert_eq!(block_on(handler(&client, None).get()).unwrap(), None);
        assert!(client.requests().is_empty());

        client.reply(json!({"data": {"cart": {"id": "gid://shopify/Cart/c1"}}}));
        let cart = block_on(handler(&client, Some("cart=c1")).get()).unwrap();
        assert_eq!(cart.unwrap()["id"], "gid://shopify/Cart/c1");
        assert!(client.requests()[0].query().starts_with("query CartQuery("));
    }

    #[test]
    fn note_and_discount_codes_use_their_mutations() {
        let client = ScriptedClient::new();
        client
            .reply(mutation_reply("cartNoteUpdate"))
            .reply(mutation_reply("cartDiscountCodesUpdate"));
        let cart = handler(&client, Some("cart=c1"));
        block_on(async {
            cart.update_note("gift wrap").await.unwrap();
            cart.update_discount_codes(vec!["SPRING".into()]).await.unwrap();
        });
        let sent = client.requests();
        assert_eq!(sent[0].variables()["note"], "gift wrap");
        assert_eq!(sent[1].variables()["discountCodes"], json!(["SPRING"]));
    }

    #[test]
    fn null_mutation_payload_maps_to_empty_result() {
        let client = ScriptedClient::new();
        client.reply(json!({"data": {"cartNoteUpdate": null}}));
        let result = block_on(handler(&client, Some("cart=c1")).update_note("x")).unwrap();
        assert_eq!(result, CartQueryDataReturn::default());
    }

    #[test]
    fn custom_methods_receive_a_scope_bound_to_the_request() {
        let client = ScriptedClient::new();
        client.reply(mutation_reply("cartLinesUpdate"));
        let cart = handler(&client, Some("cart=c9"));

        block_on(cart.update_line_by_options(
            "gid://shopify/Product/1",
            vec![SelectedOptionInput::new("Size", "M")],
            CartLineUpdateInput::new("line1"),
        ))
        .unwrap();

        let sent = &client.requests()[0];
        assert_eq!(sent.variables()["cartId"], "gid://shopify/Cart/c9");
        assert_eq!(
            sent.variables()["lines"][0]["merchandiseId"],
            "gid://shopify/Product/1/variant"
        );
    }
}
