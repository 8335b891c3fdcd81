use serde::{Deserialize, Serialize};
use validator::Validate;

/// Locale used for storefront `@inContext` directives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct I18n {
    #[validate(length(min = 2, max = 5))]
    pub language: String,
    #[validate(length(equal = 2))]
    pub country: String,
}

impl I18n {
    pub fn new(language: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            language: language.into().to_ascii_uppercase(),
            country: country.into().to_ascii_uppercase(),
        }
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::new("EN", "US")
    }
}
