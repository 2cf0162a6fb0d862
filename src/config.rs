//! Port configuration.
//!
//! A [`PortConfig`] names the device to connect to and how long to wait
//! between reconnect attempts. It mirrors the shape of the external config
//! node (`btAddress`, `serialReconnectTime` in seconds), so it can be loaded
//! straight from that JSON.
//!
//! # Example
//!
//! ```ignore
//! use bt_serial_pool::PortConfig;
//!
//! let config = PortConfig::new("00:11:22:33:44:55").with_reconnect_secs(5.0);
//! assert_eq!(config.reconnect_interval().as_secs(), 5);
//!
//! let config = PortConfig::from_json(r#"{"btAddress":"00:11:22:33:44:55"}"#)?;
//! assert_eq!(config.reconnect_interval().as_secs(), 30);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::identifiers::Address;

// ============================================================================
// Constants
// ============================================================================

/// Reconnect interval used when none (or zero) is configured.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// PortConfig
// ============================================================================

/// Connection settings for one serial link.
///
/// Only the first configuration seen for an address takes effect; later
/// callers of [`SerialPool::get`](crate::SerialPool::get) share the
/// supervisor built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Device address.
    address: Address,

    /// Fixed delay between a failure and the next connect attempt.
    reconnect_interval: Duration,
}

// ============================================================================
// Constructors
// ============================================================================

impl PortConfig {
    /// Creates a configuration with the default 30 second reconnect interval.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }

    /// Parses the config-node JSON shape.
    ///
    /// ```json
    /// { "btAddress": "00:11:22:33:44:55", "serialReconnectTime": 5 }
    /// ```
    ///
    /// `serialReconnectTime` is in seconds, may be a number or a numeric
    /// string, and falls back to 30 when absent, zero or unparsable.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is not valid JSON
    /// - [`Error::Config`] if `btAddress` is missing or blank
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawPortConfig = serde_json::from_str(json)?;
        raw.try_into()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl PortConfig {
    /// Sets the reconnect interval in seconds.
    ///
    /// Zero, negative or non-finite values select the default.
    #[inline]
    #[must_use]
    pub fn with_reconnect_secs(mut self, secs: f64) -> Self {
        self.reconnect_interval = interval_from_secs(secs);
        self
    }

    /// Sets the reconnect interval.
    ///
    /// A zero duration selects the default.
    #[inline]
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = if interval.is_zero() {
            DEFAULT_RECONNECT_INTERVAL
        } else {
            interval
        };
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl PortConfig {
    /// Returns the device address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the reconnect interval (never zero).
    #[inline]
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }
}

// ============================================================================
// Raw Config Node
// ============================================================================

/// Wire shape of the config node.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPortConfig {
    bt_address: Option<String>,
    #[serde(default)]
    serial_reconnect_time: Option<ReconnectTime>,
}

/// Reconnect time as stored by the editor: number or numeric text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReconnectTime {
    Seconds(f64),
    Text(String),
}

impl ReconnectTime {
    fn seconds(&self) -> f64 {
        match self {
            Self::Seconds(secs) => *secs,
            Self::Text(text) => text.trim().parse().unwrap_or(0.0),
        }
    }
}

impl TryFrom<RawPortConfig> for PortConfig {
    type Error = Error;

    fn try_from(raw: RawPortConfig) -> Result<Self> {
        let address = raw
            .bt_address
            .map(Address::from)
            .filter(|address| !address.is_blank())
            .ok_or_else(|| Error::config("btAddress is required"))?;

        let secs = raw
            .serial_reconnect_time
            .as_ref()
            .map_or(0.0, ReconnectTime::seconds);

        Ok(Self::new(address).with_reconnect_secs(secs))
    }
}

/// Converts configured seconds to an interval, defaulting on zero or junk.
fn interval_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|interval| !interval.is_zero())
        .unwrap_or(DEFAULT_RECONNECT_INTERVAL)
}

// ============================================================================
// Tests
// ============================================================================
