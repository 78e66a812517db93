//! Device registry and request authentication.
//!
//! The registry is built once from configuration and never mutated; a
//! plain `HashMap` behind `Arc` needs no locking on the request path.
//! Authentication compares the presented API key against the device's
//! configured key in constant time, and failures are logged through a
//! coarse rate limiter so a misbehaving client cannot flood the log.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use serde::Serialize;

use crate::config::DeviceConfig;
use crate::error::{Result, WebInkError};
use crate::mode::DisplayMode;

/// Minimum spacing between logged authentication failures.
const AUTH_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// A registered display device.
#[derive(Debug)]
pub struct Device {
    /// Opaque unique id.
    pub id: String,
    /// Shared API key. Private so it can only leak through `authenticate`.
    api_key: String,
    /// Page this device displays.
    pub source_url: String,
    /// Viewport and color encoding.
    pub mode: DisplayMode,
    /// How long a captured snapshot stays fresh.
    pub refresh_interval: Duration,
    /// How long the firmware sleeps between polls.
    pub sleep_duration: Duration,
}

impl Device {
    fn from_config(config: &DeviceConfig) -> Result<Self> {
        let mode: DisplayMode = config.mode.parse().map_err(|_| {
            WebInkError::Config(format!("device {}: bad mode {:?}", config.id, config.mode))
        })?;
        if config.id.is_empty() {
            return Err(WebInkError::Config("empty device id".to_string()));
        }
        Ok(Self {
            id: config.id.clone(),
            api_key: config.api_key.clone(),
            source_url: config.url.clone(),
            mode,
            refresh_interval: Duration::from_secs(config.refresh_interval),
            sleep_duration: Duration::from_secs(config.sleep_duration),
        })
    }
}

/// Redacted device view served by `/api/config` as a liveness probe.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    /// Device id.
    pub id: String,
    /// Source URL.
    pub url: String,
    /// Canonical mode string.
    pub mode: String,
    /// Refresh cadence in seconds.
    pub refresh_interval: u64,
    /// Sleep duration in seconds.
    pub sleep_duration: u64,
}

/// Process-wide, read-only mapping from device id to its configuration.
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<Device>>,
    auth_log_gate: Mutex<Option<Instant>>,
}

impl DeviceRegistry {
    /// Builds the registry from the configured device list.
    ///
    /// # Errors
    ///
    /// Returns `WebInkError::Config` on a bad mode string or duplicate id.
    pub fn from_config(configs: &[DeviceConfig]) -> Result<Self> {
        let mut devices = HashMap::with_capacity(configs.len());
        for config in configs {
            let device = Arc::new(Device::from_config(config)?);
            if devices.insert(device.id.clone(), device).is_some() {
                return Err(WebInkError::Config(format!(
                    "duplicate device id: {}",
                    config.id
                )));
            }
        }
        Ok(Self { devices, auth_log_gate: Mutex::new(None) })
    }

    /// Looks up a device by id.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).cloned()
    }

    /// Resolves a device and checks its API key in one step.
    ///
    /// This is the only request-path entry point, so an unauthenticated
    /// request can never reach the snapshot cache or render engine.
    ///
    /// # Errors
    ///
    /// `UnknownDevice` if the id is not registered, `Unauthorized` if the
    /// key does not match.
    pub fn authenticate(&self, id: &str, api_key: &str) -> Result<Arc<Device>> {
        let device = self
            .lookup(id)
            .ok_or_else(|| WebInkError::UnknownDevice(id.to_string()))?;
        if constant_time_eq(device.api_key.as_bytes(), api_key.as_bytes()) {
            Ok(device)
        } else {
            self.log_auth_failure(id);
            Err(WebInkError::Unauthorized)
        }
    }

    /// Redacted device list (no API keys).
    #[must_use]
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        let mut list: Vec<DeviceSummary> = self
            .devices
            .values()
            .map(|d| DeviceSummary {
                id: d.id.clone(),
                url: d.source_url.clone(),
                mode: d.mode.to_string(),
                refresh_interval: d.refresh_interval.as_secs(),
                sleep_duration: d.sleep_duration.as_secs(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Iterates all registered devices.
    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    fn log_auth_failure(&self, id: &str) {
        let mut gate = match self.auth_log_gate.lock() {
            Ok(gate) => gate,
            Err(_) => return,
        };
        let due = gate.map_or(true, |last| last.elapsed() >= AUTH_LOG_INTERVAL);
        if due {
            warn!("Rejected bad api_key for device {id}");
            *gate = Some(Instant::now());
        }
    }
}

/// Compares two byte strings in constant time.
///
/// Every byte position contributes to the accumulator regardless of
/// where the first mismatch occurs; the length difference is folded in
/// the same way.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}
