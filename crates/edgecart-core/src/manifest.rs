use log::LevelFilter;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::env::{Environment, PUBLIC_STOREFRONT_API_VERSION};
use crate::i18n::I18n;
use crate::load_context::{ContextSettings, DEFAULT_CACHE_NAME};
use crate::session::SessionCookie;

pub const DEFAULT_MANIFEST: &str = "edgecart.toml";

pub struct ManifestLoader {
    manifest: Arc<Manifest>,
}

impl ManifestLoader {
    pub fn load_from_str(contents: &str) -> Result<Self, io::Error> {
        let manifest: Manifest = toml::from_str(contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Self::finish(manifest)
    }

    pub fn from_path(path: &Path) -> Result<Self, io::Error> {
        let contents = std::fs::read_to_string(path)?;
        let mut manifest: Manifest = toml::from_str(&contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let cwd = std::env::current_dir()?;
        manifest.root = Some(resolve_root_path(path, &cwd));
        Self::finish(manifest)
    }

    fn finish(manifest: Manifest) -> Result<Self, io::Error> {
        manifest
            .validate()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        Ok(Self {
            manifest: Arc::new(manifest),
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn shared(&self) -> Arc<Manifest> {
        Arc::clone(&self.manifest)
    }
}

fn resolve_root_path(path: &Path, cwd: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => cwd.to_path_buf(),
        Some(parent) if parent.is_relative() => cwd.join(parent),
        Some(parent) => parent.to_path_buf(),
        None => cwd.to_path_buf(),
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct Manifest {
    #[serde(default)]
    #[validate(nested)]
    pub app: ManifestApp,
    #[serde(default)]
    #[validate(nested)]
    pub storefront: ManifestStorefront,
    #[serde(default)]
    #[validate(nested)]
    pub i18n: ManifestI18n,
    #[serde(default)]
    #[validate(nested)]
    pub session: ManifestSession,
    #[serde(default)]
    #[validate(nested)]
    pub environment: ManifestEnvironment,
    #[serde(default)]
    pub logging: ManifestLogging,
    #[serde(skip)]
    pub(crate) root: Option<PathBuf>,
}

impl Manifest {
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            cache_name: self.storefront.cache_name.clone(),
            i18n: I18n::new(&self.i18n.language, &self.i18n.country),
            cart_cookie_max_age: self.storefront.cart_cookie_max_age.map(Duration::from_secs),
            ..ContextSettings::default()
        }
    }

    pub fn session_cookie(&self) -> SessionCookie {
        SessionCookie {
            name: self.session.cookie_name.clone(),
            secure: self.session.secure,
            max_age: self.session.max_age.map(Duration::from_secs),
            ..SessionCookie::default()
        }
    }

    /// Build the worker environment from the declared bindings. `lookup` is consulted with
    /// each binding's `env` key (its name when unset); a literal `value` is the fallback.
    pub fn resolve_environment<F>(&self, lookup: F) -> Environment
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = Environment::new();
        let bindings = self
            .environment
            .variables
            .iter()
            .chain(self.environment.secrets.iter());
        for binding in bindings {
            match lookup(binding.env_key()).or_else(|| binding.value.clone()) {
                Some(value) => env.insert(binding.name.as_str(), value),
                None => log::debug!("environment binding `{}` is not set", binding.name),
            }
        }
        if let Some(version) = &self.storefront.api_version {
            if env.get(PUBLIC_STOREFRONT_API_VERSION).is_none() {
                env.insert(PUBLIC_STOREFRONT_API_VERSION, version.as_str());
            }
        }
        env
    }

    pub fn environment(&self) -> &ManifestEnvironment {
        &self.environment
    }

    pub fn logging(&self) -> &ManifestLogging {
        &self.logging
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ManifestApp {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManifestStorefront {
    #[serde(default = "default_cache_name")]
    #[validate(length(min = 1))]
    pub cache_name: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub api_version: Option<String>,
    #[serde(default)]
    pub cart_cookie_max_age: Option<u64>,
}

impl Default for ManifestStorefront {
    fn default() -> Self {
        Self {
            cache_name: default_cache_name(),
            api_version: None,
            cart_cookie_max_age: None,
        }
    }
}

fn default_cache_name() -> String {
    DEFAULT_CACHE_NAME.to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManifestI18n {
    #[serde(default = "default_language")]
    #[validate(length(min = 2, max = 5))]
    pub language: String,
    #[serde(default = "default_country")]
    #[validate(length(equal = 2))]
    pub country: String,
}

impl Default for ManifestI18n {
    fn default() -> Self {
        Self {
            language: default_language(),
            country: default_country(),
        }
    }
}

fn default_language() -> String {
    I18n::default().language
}

fn default_country() -> String {
    I18n::default().country
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManifestSession {
    #[serde(default = "default_cookie_name")]
    #[validate(length(min = 1))]
    pub cookie_name: String,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub secure: bool,
}

impl Default for ManifestSession {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_age: None,
            secure: false,
        }
    }
}

fn default_cookie_name() -> String {
    SessionCookie::default().name
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ManifestEnvironment {
    #[serde(default)]
    #[validate(nested)]
    pub variables: Vec<ManifestBinding>,
    #[serde(default)]
    #[validate(nested)]
    pub secrets: Vec<ManifestBinding>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManifestBinding {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub env: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl ManifestBinding {
    fn env_key(&self) -> &str {
        self.env.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ManifestLogging {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub echo_stdout: Option<bool>,
}

impl ManifestLogging {
    /// Level the host logger should run at; `echo_stdout = false` silences it.
    pub fn effective_level(&self) -> LevelFilter {
        match self.echo_stdout {
            Some(false) => LevelFilter::Off,
            _ => self.level.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            other => Err(serde::de::Error::custom(format!(
                "logging level must be trace, debug, info, warn, error, or off (got `{}`)",
                other
            ))),
        }
    }
}
