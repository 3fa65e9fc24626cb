//! Sender configuration.
//!
//! `SenderConfig` holds the defaults every [`Sender`](crate::Sender) starts
//! from: timeouts, user agent, the constant table used for `{{name}}`
//! substitution, and the post-processor chain seeded into each request.
//!
//! A process-wide snapshot is available through [`SenderConfig::global`]. It
//! is created on first use and can be swapped with [`SenderConfig::set_global`]
//! at configuration time; senders already built keep the snapshot they took.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use courier::config::SenderConfig;
//! let cfg = SenderConfig::default();
//! assert_eq!(cfg.read_timeout.as_secs(), 30);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use courier::config::SenderConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = SenderConfig::builder()
//!     .connect_timeout(Duration::from_secs(2))
//!     .read_timeout(Duration::from_secs(5))
//!     .user_agent("inventory-sync/2.1")
//!     .log_failures_only(true)
//!     .build()?; // returns Result<SenderConfig, ConfigError>
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! Builder validation returns [`ConfigError`] for zero timeouts or an empty
//! user agent.
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use lazy_static::lazy_static;

use crate::constants::ConstantTable;
use crate::processor::{ProcessorChain, ProcessorHandle};

const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Arc<SenderConfig>> =
        RwLock::new(Arc::new(SenderConfig::default()));
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed for the response (head and body) once the request is issued.
    pub read_timeout: Duration,
    /// Sent as `User-Agent` unless the request sets one. `None` sends nothing.
    pub user_agent: Option<String>,
    /// Table used for `{{name}}` substitution in URLs and header values.
    pub constants: ConstantTable,
    /// Processors every sender starts with.
    pub processors: ProcessorChain,
    /// Default for [`Sender::log_failures_only`](crate::Sender::log_failures_only).
    pub log_failures_only: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            constants: ConstantTable::global(),
            processors: ProcessorChain::with_default_logging(),
            log_failures_only: false,
        }
    }
}

impl SenderConfig {
    pub fn builder() -> SenderConfigBuilder {
        SenderConfigBuilder::default()
    }

    /// Current process-wide snapshot.
    pub fn global() -> Arc<SenderConfig> {
        GLOBAL_CONFIG
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the process-wide snapshot used by senders created afterwards.
    pub fn set_global(config: SenderConfig) {
        *GLOBAL_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}

/// Builder for [`SenderConfig`].
#[derive(Debug, Clone, Default)]
pub struct SenderConfigBuilder {
    inner: SenderConfig,
}

impl SenderConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut SenderConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn connect_timeout(self, d: Duration) -> Self { self.map(|c| c.connect_timeout = d) }
    pub fn read_timeout(self, d: Duration) -> Self { self.map(|c| c.read_timeout = d) }
    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self {
        self.map(|c| c.user_agent = Some(ua.into()))
    }
    pub fn no_user_agent(self) -> Self { self.map(|c| c.user_agent = None) }
    pub fn constants(self, table: ConstantTable) -> Self { self.map(|c| c.constants = table) }
    pub fn processors(self, chain: ProcessorChain) -> Self { self.map(|c| c.processors = chain) }
    pub fn add_processor(self, p: ProcessorHandle) -> Self { self.map(|c| c.processors.push(p)) }
    pub fn log_failures_only(self, on: bool) -> Self { self.map(|c| c.log_failures_only = on) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut SenderConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<SenderConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroConnectTimeout,
    ZeroReadTimeout,
    EmptyUserAgent,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroConnectTimeout => {
                write!(f, "connect_timeout must be greater than zero")
            }
            ConfigError::ZeroReadTimeout => write!(f, "read_timeout must be greater than zero"),
            ConfigError::EmptyUserAgent => {
                write!(f, "user_agent must not be empty (use no_user_agent())")
            }
        }
    }
}
impl std::error::Error for ConfigError {}

fn validate(c: &SenderConfig) -> Result<(), ConfigError> {
    if c.connect_timeout.is_zero() {
        return Err(ConfigError::ZeroConnectTimeout);
    }
    if c.read_timeout.is_zero() {
        return Err(ConfigError::ZeroReadTimeout);
    }
    if c.user_agent.as_deref().is_some_and(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::EmptyUserAgent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SenderConfig::builder().build().unwrap();
        assert_eq!(cfg.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(cfg.read_timeout, DEFAULT_READ_TIMEOUT);
        assert!(cfg.user_agent.unwrap().starts_with("courier/"));
        assert_eq!(cfg.processors.len(), 1);
        assert!(!cfg.log_failures_only);
    }

    #[test]
    fn builder_rejects_invalid_values() {
        let err = SenderConfig::builder().connect_timeout(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroConnectTimeout);

        let err = SenderConfig::builder().read_timeout(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroReadTimeout);

        let err = SenderConfig::builder().user_agent("  ").build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyUserAgent);
        assert!(err.to_string().contains("no_user_agent"));
    }

    #[test]
    fn builder_applies_overrides() {
        let table = ConstantTable::new();
        table.set("env", "staging");

        let cfg = SenderConfig::builder()
            .read_timeout(Duration::from_secs(3))
            .no_user_agent()
            .constants(table)
            .processors(ProcessorChain::new())
            .with(|c| c.log_failures_only = true)
            .build()
            .unwrap();

        assert_eq!(cfg.read_timeout, Duration::from_secs(3));
        assert!(cfg.user_agent.is_none());
        assert_eq!(cfg.constants.get("env").as_deref(), Some("staging"));
        assert!(cfg.processors.is_empty());
        assert!(cfg.log_failures_only);
    }

    #[test]
    fn default_config_shares_the_global_constant_table() {
        let key = "config-test-shared-key";
        ConstantTable::global().set(key, "v");
        assert_eq!(SenderConfig::default().constants.get(key).as_deref(), Some("v"));
        ConstantTable::global().remove(key);
    }
}
