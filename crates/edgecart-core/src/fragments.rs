//! GraphQL documents sent to the Storefront API.

/// Cart fields returned by every cart routine.
pub const CART_QUERY_FRAGMENT: &str = r#"fragment Money on MoneyV2 {
  currencyCode
  amount
}
fragment CartLine on CartLine {
  id
  quantity
  attributes {
    key
    value
  }
  cost {
    totalAmount {
      ...Money
    }
    amountPerQuantity {
      ...Money
    }
  }
  merchandise {
    ... on ProductVariant {
      id
      availableForSale
      title
      selectedOptions {
        name
        value
      }
      product {
        handle
        title
        id
      }
    }
  }
}
fragment CartApiQuery on Cart {
  id
  checkoutUrl
  totalQuantity
  note
  buyerIdentity {
    countryCode
    email
  }
  lines(first: $numCartLines) {
    nodes {
      ...CartLine
    }
  }
  cost {
    subtotalAmount {
      ...Money
    }
    totalAmount {
      ...Money
    }
  }
  discountCodes {
    code
    applicable
  }
}
"#;

/// Resolves the variant matching a set of selected options.
pub const PRODUCT_VARIANT_QUERY: &str = r#"query ProductVariant(
  $country: CountryCode
  $language: LanguageCode
  $productId: ID!
  $selectedOptions: [SelectedOptionInput!]!
) @inContext(country: $country, language: $language) {
  product(id: $productId) {
    selectedVariant: variantBySelectedOptions(selectedOptions: $selectedOptions) {
      id
    }
  }
}
"#;

const USER_ERROR_FRAGMENT: &str = r#"fragment CartApiError on CartUserError {
  message
  field
  code
}
fragment CartApiWarning on CartWarning {
  message
  code
  target
}
"#;

pub(crate) fn cart_query(fragment: &str) -> String {
    format!(
        r#"query CartQuery(
  $cartId: ID!
  $numCartLines: Int = 100
  $country: CountryCode = ZZ
  $language: LanguageCode
) @inContext(country: $country, language: $language) {{
  cart(id: $cartId) {{
    ...CartApiQuery
  }}
}}
{fragment}"#
    )
}

/// Wraps a cart mutation field in the shared operation shape: every mutation returns the
/// cart, user errors and warnings.
fn cart_mutation(name: &str, arguments: &str, parameters: &str, fragment: &str) -> String {
    format!(
        r#"mutation {name}(
{parameters}
  $numCartLines: Int = 100
  $country: CountryCode = ZZ
  $language: LanguageCode
) @inContext(country: $country, language: $language) {{
  {name}({arguments}) {{
    cart {{
      ...CartApiQuery
    }}
    userErrors {{
      ...CartApiError
    }}
    warnings {{
      ...CartApiWarning
    }}
  }}
}}
{fragment}
{USER_ERROR_FRAGMENT}"#
    )
}

pub(crate) fn cart_create_mutation(fragment: &str) -> String {
    cart_mutation(
        "cartCreate",
        "input: $input",
        "  $input: CartInput!",
        fragment,
    )
}

pub(crate) fn cart_lines_add_mutation(fragment: &str) -> String {
    cart_mutation(
        "cartLinesAdd",
        "cartId: $cartId, lines: $lines",
        "  $cartId: ID!\n  $lines: [CartLineInput!]!",
        fragment,
    )
}

pub(crate) fn cart_lines_update_mutation(fragment: &str) -> String {
    cart_mutation(
        "cartLinesUpdate",
        "cartId: $cartId, lines: $lines",
        "  $cartId: ID!\n  $lines: [CartLineUpdateInput!]!",
        fragment,
    )
}

pub(crate) fn cart_lines_remove_mutation(fragment: &str) -> String {
    cart_mutation(
        "cartLinesRemove",
        "cartId: $cartId, lineIds: $lineIds",
        "  $cartId: ID!\n  $lineIds: [ID!]!",
        fragment,
    )
}

pub(crate) fn cart_note_update_mutation(fragment: &str) -> String {
    cart_mutation(
        "cartNoteUpdate",
        "cartId: $cartId, note: $note",
        "  $cartId: ID!\n  $note: String!",
        fragment,
    )
}

pub(crate) fn cart_discount_codes_update_mutation(fragment: &str) -> String {
    cart_mutation(
        "cartDiscountCodesUpdate",
        "cartId: $cartId, discountCodes: $discountCodes",
        "  $cartId: ID!\n  $discountCodes: [String!]",
        fragment,
    )
}
