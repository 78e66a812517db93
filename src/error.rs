//! Error types for the snapshot server.

use std::io;
use thiserror::Error;

/// Result type for snapshot server operations.
pub type Result<T> = std::result::Result<T, WebInkError>;

/// Errors that can occur while capturing or serving snapshots.
#[derive(Debug, Error)]
pub enum WebInkError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No device with the given id is registered.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// API key did not match the device's configured key.
    #[error("authentication failed")]
    Unauthorized,

    /// Display mode string could not be parsed or is inconsistent.
    #[error("bad display mode: {0}")]
    BadMode(String),

    /// Requested rectangle falls outside the snapshot bounds.
    #[error("invalid rectangle {x},{y} {w}x{h} for {frame_w}x{frame_h} frame")]
    InvalidRect {
        /// Rectangle origin, x.
        x: u32,
        /// Rectangle origin, y.
        y: u32,
        /// Rectangle width.
        w: u32,
        /// Rectangle height.
        h: u32,
        /// Snapshot width.
        frame_w: u32,
        /// Snapshot height.
        frame_h: u32,
    },

    /// Output format token is unknown or does not match the display mode.
    #[error("bad tile format: {0}")]
    BadFormat(String),

    /// Malformed request (socket request line, missing parameter, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Requested mode differs from the device's configured mode.
    #[error("mode {requested} conflicts with configured mode {configured}")]
    ModeConflict {
        /// Mode string the client asked for.
        requested: String,
        /// Mode string the device is configured with.
        configured: String,
    },

    /// Page navigation did not finish within the ceiling.
    #[error("navigation timed out")]
    NavigationTimeout,

    /// The browser failed to produce a usable screenshot.
    #[error("render failed: {0}")]
    RenderFailed(String),

    /// No browser context became available within the wait timeout.
    #[error("browser pool exhausted")]
    PoolExhausted,

    /// An in-flight capture did not complete before the waiter cap.
    #[error("timed out waiting for capture")]
    CaptureTimeout,

    /// Configuration could not be loaded or is invalid. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WebInkError {
    /// Whether the error is a transient render-side failure that a client
    /// should retry after its sleep interval.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout
                | Self::RenderFailed(_)
                | Self::PoolExhausted
                | Self::CaptureTimeout
        )
    }
}
