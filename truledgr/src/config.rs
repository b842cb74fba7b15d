//! Client configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `truledgr.yaml` but can be specified via the `-f` flag or the `TRULEDGR_CONFIG`
//! environment variable. A missing file is not an error; every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration
//! 2. **Environment variables** - Variables prefixed with `TRULEDGR_` override YAML values
//!
//! Nested values use double underscores, e.g. `TRULEDGR_HEALTH__INTERVAL=1m`.
//!
//! ## Example
//!
//! ```yaml
//! api_url: api.truledgr.app        # https:// is added when no scheme is given
//! request_timeout: 30s
//! fallback_endpoints:
//!   - url: https://203.0.113.10
//!     host: api.truledgr.app
//! health:
//!   timeout: 5s
//!   debounce: 500ms
//!   interval: 30s
//! auth:
//!   unknown_identifier: proceed_to_password
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Production API used when nothing else is configured
pub const DEFAULT_API_URL: &str = "https://api.truledgr.app";

/// Command-line arguments for the `truledgr` client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "TRULEDGR_CONFIG", default_value = "truledgr.yaml")]
    pub config: String,

    /// Use this API URL for this invocation, ignoring the saved one
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Check the API health endpoint once
    Health {
        /// Probe this URL instead of the configured API
        #[arg(long)]
        url: Option<String>,
    },
    /// Probe the API health endpoint periodically until interrupted
    Watch,
    /// Ask the API whether an account exists for an email address
    CheckEmail { email: String },
    /// Sign in using the identifier-first flow
    Login {
        #[arg(long)]
        email: String,
        /// Read from TRULEDGR_PASSWORD when not passed explicitly
        #[arg(long, env = "TRULEDGR_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the saved session
    Logout {
        /// Revoke every session of this account, not only this one
        #[arg(long)]
        all: bool,
    },
    /// Show the signed-in user
    Whoami,
    /// Save a custom API URL for future invocations
    SetUrl { url: String },
    /// Validate configuration and exit
    Validate,
}

/// Root client configuration.
///
/// All fields have defaults, so an empty or missing file yields a working configuration
/// pointed at the production API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the TruLedgr API. A scheme-less value is treated as https.
    pub api_url: String,
    /// Endpoints tried in order after `api_url` fails at the transport level
    pub fallback_endpoints: Vec<FallbackEndpoint>,
    /// Timeout applied to auth and resource requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Health probing configuration
    pub health: HealthConfig,
    /// Identifier-first login flow configuration
    pub auth: AuthFlowConfig,
    /// Where the custom API URL and access token are persisted.
    /// Defaults to `$XDG_CONFIG_HOME/truledgr/state.json` (or `~/.config/...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            fallback_endpoints: Vec::new(),
            request_timeout: Duration::from_secs(30),
            health: HealthConfig::default(),
            auth: AuthFlowConfig::default(),
            state_file: None,
        }
    }
}

/// A secondary endpoint, typically a literal IP used when DNS for the primary host fails.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FallbackEndpoint {
    pub url: Url,
    /// Explicit `Host` header to send, needed when `url` is an IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Timeout for a single `/health` request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Quiet period before a candidate URL is probed while it is being edited
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
    /// Interval between periodic probes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            interval: Duration::from_secs(30),
        }
    }
}

/// What the login flow does when the server reports no account for an email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownIdentifierPolicy {
    /// Continue to the password step as if the account existed
    #[default]
    ProceedToPassword,
    /// Continue to the password step but report the identifier as a signup candidate
    JitSignup,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthFlowConfig {
    pub unknown_identifier: UnknownIdentifierPolicy,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // TRULEDGR_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("TRULEDGR_").ignore(&["config", "password"]).split("__"))
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        normalize_api_url(&self.api_url).map_err(|e| Error::Config {
            message: format!("api_url: {}", e.user_message()),
        })?;

        for endpoint in &self.fallback_endpoints {
            if !matches!(endpoint.url.scheme(), "http" | "https") {
                return Err(Error::Config {
                    message: format!("fallback endpoint {} must use http or https", endpoint.url),
                });
            }
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request_timeout must be greater than zero".to_string(),
            });
        }

        if self.health.timeout.is_zero() || self.health.interval.is_zero() {
            return Err(Error::Config {
                message: "health.timeout and health.interval must be greater than zero".to_string(),
            });
        }

        if self.health.interval < self.health.timeout {
            return Err(Error::Config {
                message: format!(
                    "health.interval ({}) cannot be shorter than health.timeout ({})",
                    humantime::format_duration(self.health.interval),
                    humantime::format_duration(self.health.timeout)
                ),
            });
        }

        Ok(())
    }

    /// Resolve the API base URL.
    ///
    /// An explicit override wins, then the URL the user saved, then `api_url` from config.
    pub fn effective_api_url(&self, explicit: Option<&str>, saved: Option<&str>) -> Result<Url, Error> {
        let raw = explicit.or(saved).unwrap_or(self.api_url.as_str());
        normalize_api_url(raw)
    }

    /// Path of the persisted client state file
    pub fn state_file_path(&self) -> PathBuf {
        if let Some(path) = &self.state_file {
            return path.clone();
        }
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("truledgr").join("state.json")
    }
}

/// Parse a user-supplied API URL, prefixing `https://` when no scheme is given.
pub fn normalize_api_url(input: &str) -> Result<Url, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("API URL cannot be empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| Error::validation(format!("Invalid API URL '{trimmed}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation(format!("API URL must use http or https, got '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation(format!("API URL '{trimmed}' has no host")));
    }

    Ok(url)
}
