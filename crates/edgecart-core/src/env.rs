use std::collections::BTreeMap;

/// Variable holding the session signing secret.
pub const SESSION_SECRET: &str = "SESSION_SECRET";
pub const PUBLIC_STORE_DOMAIN: &str = "PUBLIC_STORE_DOMAIN";
pub const PUBLIC_STOREFRONT_API_TOKEN: &str = "PUBLIC_STOREFRONT_API_TOKEN";
pub const PRIVATE_STOREFRONT_API_TOKEN: &str = "PRIVATE_STOREFRONT_API_TOKEN";
pub const PUBLIC_STOREFRONT_ID: &str = "PUBLIC_STOREFRONT_ID";
pub const PUBLIC_STOREFRONT_API_VERSION: &str = "PUBLIC_STOREFRONT_API_VERSION";

/// Configuration bindings handed to a worker for one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    values: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(key, value);
        self
    }

    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`Environment::get`] but treats empty values as unset.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn session_secret(&self) -> Option<&str> {
        self.get_non_empty(SESSION_SECRET)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { values }
    }
}
