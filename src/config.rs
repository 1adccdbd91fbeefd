use clap::{Parser, Subcommand};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment selector variable
pub const ENV_SELECTOR: &str = "API_ENV";

/// Minimum accepted request timeout
const MIN_TIMEOUT_MS: u64 = 1000;

/// API Harness - authenticated REST API test client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Target environment (dev, staging, prod)
    #[arg(short, long, env = "API_ENV", default_value = "dev")]
    pub env: String,

    /// Log level (trace, debug, info, warn, error); defaults to debug in debug mode
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and report the token expiry
    Login {
        /// Username (falls back to the environment)
        #[arg(short, long)]
        username: Option<String>,

        /// Password (falls back to the environment)
        #[arg(short, long, conflicts_with = "prompt")]
        password: Option<String>,

        /// Read the password interactively
        #[arg(long)]
        prompt: bool,
    },

    /// Send an authenticated request
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Endpoint path, starting with '/'
        endpoint: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Extra header as 'Name: value' (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Validate the selected environment and print a summary
    Check,

    /// Run the mock API server until Ctrl-C
    Mock {
        /// Port to listen on (0 for random)
        #[arg(long, default_value = "4001")]
        port: u16,

        /// Accepted username
        #[arg(long, default_value = "admin")]
        username: String,

        /// Accepted password
        #[arg(long, default_value = "admin")]
        password: String,
    },
}

/// Named target environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentName {
    Dev,
    Staging,
    Prod,
}

impl EnvironmentName {
    /// Variable prefix for per-environment settings
    pub fn prefix(&self) -> &'static str {
        match self {
            EnvironmentName::Dev => "DEV",
            EnvironmentName::Staging => "STAGING",
            EnvironmentName::Prod => "PROD",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            EnvironmentName::Dev => "Development",
            EnvironmentName::Staging => "Staging",
            EnvironmentName::Prod => "Production",
        }
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentName::Dev => write!(f, "dev"),
            EnvironmentName::Staging => write!(f, "staging"),
            EnvironmentName::Prod => write!(f, "prod"),
        }
    }
}

/// Parse environment name; unknown values fall back to dev
pub fn parse_environment_name(s: &str) -> EnvironmentName {
    match s.trim().to_lowercase().as_str() {
        "dev" | "development" | "" => EnvironmentName::Dev,
        "staging" => EnvironmentName::Staging,
        "prod" | "production" => EnvironmentName::Prod,
        other => {
            tracing::warn!("Unknown environment '{}', using 'dev'", other);
            EnvironmentName::Dev
        }
    }
}

/// Immutable settings for one target environment
#[derive(Clone)]
pub struct Environment {
    pub name: String,
    pub kind: EnvironmentName,
    pub base_url: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub api_key: Option<String>,
    pub static_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_production: bool,
    pub debug_mode: bool,
}

impl Environment {
    /// Build an environment from an arbitrary variable lookup
    pub fn from_lookup<F>(kind: EnvironmentName, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let scoped = |suffix: &str| get(&format!("{}_{}", kind.prefix(), suffix));

        let (default_url, default_timeout, default_retries, default_debug) = match kind {
            EnvironmentName::Dev => ("http://localhost:4001", 30_000, 2, true),
            EnvironmentName::Staging => ("https://api-staging.example.com", 30_000, 3, false),
            EnvironmentName::Prod => ("https://api.example.com", 60_000, 3, false),
        };

        let base_url = scoped("BASE_URL").unwrap_or_else(|| default_url.to_string());

        let timeout_ms = get("API_TIMEOUT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default_timeout);

        let retry_count = get("RETRY_COUNT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default_retries);

        // Never debug against production
        let debug_mode = match kind {
            EnvironmentName::Prod => false,
            _ => get("DEBUG_MODE")
                .map(|s| parse_bool(&s))
                .unwrap_or(default_debug),
        };

        Self {
            name: kind.display_name().to_string(),
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(timeout_ms),
            retry_count,
            api_key: scoped("API_KEY"),
            static_token: scoped("AUTH_TOKEN").or_else(|| scoped("JWT_TOKEN")),
            username: scoped("USERNAME"),
            password: scoped("PASSWORD"),
            is_production: kind == EnvironmentName::Prod,
            debug_mode,
        }
    }

    /// Build an environment from process variables
    pub fn from_env(kind: EnvironmentName) -> Self {
        Self::from_lookup(kind, |key| std::env::var(key).ok())
    }

    /// Load `.env`, read the selector variable and build the current environment
    pub fn current() -> Self {
        dotenvy::dotenv().ok();

        let selected = std::env::var(ENV_SELECTOR).unwrap_or_default();
        Self::from_env(parse_environment_name(&selected))
    }

    /// Validate settings once at startup
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config("Base URL must not be empty".to_string()));
        }

        reqwest::Url::parse(&self.base_url).map_err(|e| {
            Error::Config(format!("Invalid base URL '{}': {}", self.base_url, e))
        })?;

        if self.timeout < Duration::from_millis(MIN_TIMEOUT_MS) {
            return Err(Error::Config(format!(
                "Timeout must be at least {}ms (got {}ms)",
                MIN_TIMEOUT_MS,
                self.timeout.as_millis()
            )));
        }

        if self.is_production && self.api_key.is_none() {
            tracing::warn!("No API key configured for the production environment");
        }

        Ok(())
    }

    /// Whether both username and password are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("api_key", &redact(&self.api_key))
            .field("static_token", &redact(&self.static_token))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("is_production", &self.is_production)
            .field("debug_mode", &self.debug_mode)
            .finish()
    }
}

fn redact(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

/// Parse boolean flag ("true" is the only truthy spelling besides "1")
fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "1")
}
