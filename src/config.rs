use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Cdb2Error;
use crate::native::Driver;
use crate::session::Session;
use crate::transaction::TransactionMode;
use crate::types::ConnectionFlags;

pub const DEFAULT_TIER: &str = "default";
pub const DEFAULT_TIMEZONE: &str = "UTC";

fn default_tier() -> String {
    DEFAULT_TIER.to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_timezone() -> Option<String> {
    Some(DEFAULT_TIMEZONE.to_string())
}

/// Options for opening a Comdb2 handle.
///
/// ```rust
/// use comdb2_session::prelude::*;
///
/// let opts: ConnectOptions = serde_json::from_str(r#"{"database_name": "mattdb"}"#)?;
/// assert_eq!(opts.tier, "default");
/// assert_eq!(opts.timezone.as_deref(), Some("UTC"));
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub database_name: String,
    /// Cluster tier, or `"default"` for the machine-wide default.
    #[serde(default = "default_tier")]
    pub tier: String,
    /// Connect to one named host instead of a tier.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub flags: ConnectionFlags,
    /// Sent as `set timezone` right after connecting; `None` sends nothing.
    #[serde(default = "default_timezone")]
    pub timezone: Option<String>,
    /// Selects [`TransactionMode::Autocommit`] for connections.
    #[serde(default)]
    pub autocommit: bool,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            tier: default_tier(),
            host: None,
            flags: ConnectionFlags::NONE,
            timezone: default_timezone(),
            autocommit: false,
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = tier.into();
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn transaction_mode(&self) -> TransactionMode {
        if self.autocommit {
            TransactionMode::Autocommit
        } else {
            TransactionMode::Implicit
        }
    }

    /// The tier argument and flags to pass to `cdb2_open`.
    ///
    /// A host is passed in place of the tier, with `DIRECT_CPU` added.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when both a host and a non-default tier are set.
    pub fn target(&self) -> Result<(&str, ConnectionFlags), Cdb2Error> {
        match &self.host {
            Some(_) if self.tier != DEFAULT_TIER => Err(Cdb2Error::interface(
                "Connecting to a host by name and to a cluster by tier are mutually exclusive",
            )),
            Some(host) => Ok((host, self.flags | ConnectionFlags::DIRECT_CPU)),
            None => Ok((&self.tier, self.flags)),
        }
    }
}

/// Fluent builder for [`ConnectOptions`].
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    opts: ConnectOptions,
}

impl ConnectOptionsBuilder {
    #[must_use]
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            opts: ConnectOptions::new(database_name),
        }
    }

    #[must_use]
    pub fn tier(mut self, tier: impl Into<String>) -> Self {
        self.opts.tier = tier.into();
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.opts.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: ConnectionFlags) -> Self {
        self.opts.flags = flags;
        self
    }

    /// `None` keeps the client machine's zone and skips `set timezone`.
    #[must_use]
    pub fn timezone(mut self, timezone: Option<&str>) -> Self {
        self.opts.timezone = timezone.map(str::to_string);
        self
    }

    #[must_use]
    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.opts.autocommit = autocommit;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectOptions {
        self.opts
    }

    /// Open a bare [`Session`].
    ///
    /// # Errors
    ///
    /// See [`Session::open`].
    pub fn open<D: Driver>(self, driver: &D) -> Result<Session<D::Handle>, Cdb2Error> {
        Session::open(driver, &self.finish())
    }

    /// Open a DB-API style [`Connection`].
    ///
    /// # Errors
    ///
    /// See [`crate::connection::connect`].
    pub fn connect<D: Driver>(self, driver: &D) -> Result<Connection<D::Handle>, Cdb2Error> {
        crate::connection::connect(driver, &self.finish())
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn builder(database_name: impl Into<String>) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(database_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn host_implies_direct_cpu() {
        let opts = ConnectOptions::builder("mattdb")
            .host("db-host-1")
            .flags(ConnectionFlags::RANDOM)
            .finish();
        let (tier, flags) = opts.target().unwrap();
        assert_eq!(tier, "db-host-1");
        assert_eq!(flags, ConnectionFlags::RANDOM | ConnectionFlags::DIRECT_CPU);
    }

    #[test]
    fn host_and_tier_conflict() {
        let opts = ConnectOptions::new("mattdb").with_tier("dev").with_host("h");
        assert_eq!(opts.target().unwrap_err().kind(), ErrorKind::Interface);
    }

    #[test]
    fn serde_defaults() {
        let opts: ConnectOptions =
            serde_json::from_str(r#"{"database_name": "x", "flags": 8, "timezone": null}"#)
                .unwrap();
        assert_eq!(opts.tier, DEFAULT_TIER);
        assert_eq!(opts.flags, ConnectionFlags::RANDOM);
        assert_eq!(opts.timezone, None);
        assert_eq!(opts.transaction_mode(), TransactionMode::Implicit);
    }
}
