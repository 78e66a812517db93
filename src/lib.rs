// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! # webink
//!
//! A snapshot server that renders arbitrary web pages into tiled,
//! low-bit-depth raster images for very constrained e-ink display
//! devices (ESP32-class), and streams those tiles on demand.
//!
//! ## Features
//!
//! - **Four tile encodings**: 1-bit dithered mono, 2-bit four-color,
//!   8-bit grayscale, 24-bit raw RGB, all with canonical PNM framing
//! - **Two wire protocols**: an HTTP API and a one-shot framed TCP
//!   protocol serving bit-identical bytes
//! - **Headless-browser capture**: a pooled Chromium renders each
//!   device's page at its exact viewport
//! - **Single-flight refresh**: concurrent demand for a stale page
//!   results in exactly one capture; every waiter shares the result
//! - **Change detection**: clients poll a stable content fingerprint
//!   and refetch tiles only when it moves
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use webink::http::{router, AppState};
//! use webink::{config, DeviceLogs, DeviceRegistry, RenderEngine, SnapshotCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = config::load("webink.yaml")?;
//!     let registry = Arc::new(DeviceRegistry::from_config(&cfg.devices)?);
//!
//!     let engine = Arc::new(RenderEngine::new(
//!         cfg.server.browser_pool,
//!         Duration::from_secs(cfg.server.pool_wait_secs),
//!         Duration::from_secs(cfg.server.navigation_secs),
//!     ));
//!     let wait_cap = engine.capture_budget();
//!     let cache = Arc::new(SnapshotCache::new(engine, &registry, wait_cap));
//!     let logs = Arc::new(DeviceLogs::new(&registry));
//!
//!     let app = router(AppState { registry, cache, logs });
//!     let listener =
//!         tokio::net::TcpListener::bind(("0.0.0.0", webink::DEFAULT_HTTP_PORT)).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ HTTP server  │   │ Socket server│      protocol adapters
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//! ┌─────────────────────────────────┐
//! │        Snapshot Cache           │      one slot per device,
//! │  (single-flight refresh, tile   │      single-flight capture
//! │   reads, fingerprints)          │
//! └──────┬──────────────────┬───────┘
//!        ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐
//! │ Render Engine│   │ Pixel Codec  │      browser pool / PNM tiles
//! └──────────────┘   └──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod logbuf;
pub mod mode;
pub mod registry;
pub mod render;
pub mod snapshot;
pub mod socket;

// Re-exports
pub use encoding::Rect;
pub use error::{Result, WebInkError};
pub use logbuf::DeviceLogs;
pub use mode::{ColorMode, DisplayMode, TileFormat};
pub use registry::{Device, DeviceRegistry};
pub use render::{RenderEngine, Renderer};
pub use snapshot::{Snapshot, SnapshotCache};
pub use socket::TileSocketServer;

/// Default HTTP snapshot server port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default socket server port.
pub const DEFAULT_SOCKET_PORT: u16 = 8091;
