//! Client configuration.
//!
//! Configuration comes from, in order of precedence from highest to lowest:
//! 1. Environment variables ([`Config::from_env`])
//! 2. A TOML file ([`Config::from_file`])
//! 3. Hard coded defaults
//!
//! # Example file
//!
//! ```toml
//! api_base = "https://api.snipurl.example"
//! short_url_base = "https://snip.example"
//! timeout = 10
//! form_max_retries = 3
//!
//! [routes]
//! sign_in = "/login"
//! landing = "/dashboard"
//!
//! [retry]
//! max_attempts = 3
//! base_delay = 1000
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::{error::Result, navigation::Routes, retry::RetryPolicy};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of every service call.
    pub api_base: Url,

    /// Prefix of human-visible short links. Presentation only.
    pub short_url_base: Url,

    /// Timeout of a single HTTP request, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,

    #[serde(skip)]
    pub user_agent: String,

    pub routes: Routes,

    /// Policy for operations wrapped in the retry engine.
    pub retry: RetryPolicy,

    /// Retry budget of a single form.
    pub form_max_retries: u32,
}

impl Config {
    /// Development loopback origin of the service.
    pub const DEFAULT_API_BASE: &'static str = "http://localhost:5000";

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub const DEFAULT_FORM_MAX_RETRIES: u32 = 3;

    /// Environment variable overriding [`Config::api_base`].
    pub const ENV_API_BASE: &'static str = "SNIPURL_API_BASE";

    /// Environment variable overriding [`Config::short_url_base`].
    pub const ENV_SHORT_URL_BASE: &'static str = "SNIPURL_SHORT_URL_BASE";

    /// Environment variable overriding [`Config::timeout`], in seconds.
    pub const ENV_TIMEOUT_SECS: &'static str = "SNIPURL_TIMEOUT_SECS";

    /// Creates a configuration for the given service.
    ///
    /// Short links are displayed under the same origin.
    #[must_use]
    pub fn with_api_base(api_base: Url) -> Self {
        Self {
            short_url_base: api_base.clone(),
            api_base,
            ..Self::default()
        }
    }

    /// Loads a TOML configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file cannot be read or is not valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        config.user_agent = user_agent();
        Ok(config)
    }

    /// Applies environment overrides on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Applies environment overrides on top of this configuration.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a variable is set but holds an invalid URL or
    /// number.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base) = lookup(Self::ENV_API_BASE) {
            self.api_base = api_base.parse()?;
        }
        if let Some(short_url_base) = lookup(Self::ENV_SHORT_URL_BASE) {
            self.short_url_base = short_url_base.parse()?;
        }
        if let Some(timeout) = lookup(Self::ENV_TIMEOUT_SECS) {
            let seconds = timeout.trim().parse::<u64>().map_err(|e| {
                crate::error::Error::validation(format!(
                    "{} is not a number of seconds: {e}",
                    Self::ENV_TIMEOUT_SECS
                ))
            })?;
            self.timeout = Duration::from_secs(seconds);
        }

        debug!("service at {}", self.api_base);
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        let api_base =
            Url::parse(Self::DEFAULT_API_BASE).expect("default service origin is a valid URL");

        Self {
            short_url_base: api_base.clone(),
            api_base,
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: user_agent(),
            routes: Routes::default(),
            retry: RetryPolicy::default(),
            form_max_retries: Self::DEFAULT_FORM_MAX_RETRIES,
        }
    }
}

/// Builds the `User-Agent` header value.
///
/// Falls back to the bare application name and version when the operating
/// system cannot be described.
fn user_agent() -> String {
    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");

    let os_name = match std::env::consts::OS {
        "macos" => "osx",
        other => other,
    };
    let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));

    // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
    let illegal_chars = |chr| chr == '/' || chr == ';' || chr == '(' || chr == ')';
    let user_agent = if os_name.is_empty()
        || os_name.contains(illegal_chars)
        || os_version.is_empty()
        || os_version.contains(illegal_chars)
    {
        warn!("os name and/or version invalid (\"{os_name}\"; \"{os_version}\")");
        format!("{app_name}/{app_version}")
    } else {
        format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})")
    };
    trace!("user agent: {user_agent}");

    user_agent
}
