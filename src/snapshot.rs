//! Per-device snapshot cache with single-flight capture.
//!
//! Each registered device owns one slot holding its most recent rendered
//! frame. Reads that find the slot fresh are served from memory; a stale
//! or empty slot arms exactly one capture, and every reader that arrives
//! while that capture is in flight waits for the same result instead of
//! triggering its own. Snapshots are immutable once installed and shared
//! via `Arc`, so replacement is atomic: a reader sees the whole old frame
//! or the whole new one, never a mix.
//!
//! Captures run as detached tasks. A reader that disconnects while
//! waiting abandons only its wait; the capture completes and benefits
//! the remaining waiters and future reads.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::encoding::{self, FrameView, Rect};
use crate::error::{Result, WebInkError};
use crate::fingerprint::fingerprint;
use crate::mode::{ColorMode, DisplayMode, TileFormat};
use crate::registry::{Device, DeviceRegistry};
use crate::render::Renderer;

/// One captured frame, immutable once installed.
#[derive(Debug)]
pub struct Snapshot {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB pixel data, `width * height * 3` bytes.
    pub rgb: Vec<u8>,
    /// Full-frame dithered plane, present for mono devices only.
    /// Computed once here so every tile of the frame shares one
    /// error-diffusion pass.
    pub mono: Option<Vec<u8>>,
    /// Content fingerprint over (device id, mode, pixels).
    pub fingerprint: String,
    /// Monotonic capture time, for the freshness rule.
    pub captured_at: Instant,
}

impl Snapshot {
    fn build(rgb: Vec<u8>, device: &Device) -> Result<Self> {
        let (width, height) = (device.mode.width, device.mode.height);
        if rgb.len() != (width * height * 3) as usize {
            return Err(WebInkError::RenderFailed(format!(
                "frame is {} bytes, wanted {}",
                rgb.len(),
                width * height * 3
            )));
        }
        let mono = match device.mode.color {
            ColorMode::Mono => Some(encoding::dither_mono(&rgb, width as usize, height as usize)),
            _ => None,
        };
        let fingerprint = fingerprint(&rgb, &device.mode.to_string(), &device.id);
        Ok(Self { width, height, rgb, mono, fingerprint, captured_at: Instant::now() })
    }

    /// Borrowed view for the tile encoders.
    #[must_use]
    pub fn frame_view(&self) -> FrameView<'_> {
        FrameView {
            rgb: &self.rgb,
            mono: self.mono.as_deref(),
            width: self.width,
            height: self.height,
        }
    }

    fn is_fresh(&self, device: &Device) -> bool {
        self.captured_at.elapsed() < device.refresh_interval
    }
}

struct SlotState {
    current: Option<Arc<Snapshot>>,
    in_flight: bool,
    last_error: Option<String>,
    /// Bumped on every successful install. Waiters compare generations
    /// to tell "the capture I waited on landed" apart from "it failed",
    /// independent of the freshness interval.
    generation: u64,
}

struct DeviceSlot {
    state: Mutex<SlotState>,
    refreshed: Notify,
}

/// Snapshot cache shared by both protocol front-ends.
pub struct SnapshotCache {
    renderer: Arc<dyn Renderer>,
    slots: HashMap<String, Arc<DeviceSlot>>,
    /// Cap on how long a reader waits for an in-flight capture.
    wait_cap: Duration,
}

impl SnapshotCache {
    /// Creates a cache with one empty slot per registered device.
    ///
    /// `wait_cap` bounds how long a reader blocks on someone else's
    /// capture; it should exceed the renderer's own worst-case budget.
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>, registry: &DeviceRegistry, wait_cap: Duration) -> Self {
        let slots = registry
            .devices()
            .map(|device| {
                let slot = DeviceSlot {
                    state: Mutex::new(SlotState {
                        current: None,
                        in_flight: false,
                        last_error: None,
                        generation: 0,
                    }),
                    refreshed: Notify::new(),
                };
                (device.id.clone(), Arc::new(slot))
            })
            .collect();
        Self { renderer, slots, wait_cap }
    }

    /// Returns the device's current snapshot, capturing one first if the
    /// slot is stale or empty.
    pub async fn snapshot(&self, device: &Arc<Device>) -> Result<Arc<Snapshot>> {
        let slot = self
            .slots
            .get(&device.id)
            .ok_or_else(|| WebInkError::UnknownDevice(device.id.clone()))?
            .clone();

        loop {
            let mut state = slot.state.lock().await;

            if !state.in_flight {
                if let Some(snapshot) = &state.current {
                    if snapshot.is_fresh(device) {
                        return Ok(snapshot.clone());
                    }
                }
                // Stale or empty: arm exactly one capture, detached so a
                // disconnecting reader cannot cancel it.
                state.in_flight = true;
                debug!("Capture armed for device {}", device.id);
                tokio::spawn(Self::capture(self.renderer.clone(), device.clone(), slot.clone()));
            }

            // Register for the wake-up before releasing the lock so a
            // completion between unlock and await cannot be missed.
            let generation = state.generation;
            let mut notified = pin!(slot.refreshed.notified());
            notified.as_mut().enable();
            drop(state);

            if timeout(self.wait_cap, notified).await.is_err() {
                return Err(WebInkError::CaptureTimeout);
            }

            let state = slot.state.lock().await;
            if state.generation > generation {
                if let Some(snapshot) = &state.current {
                    return Ok(snapshot.clone());
                }
            }
            if state.in_flight {
                // The capture we waited on resolved but another was armed
                // before we re-acquired the lock; wait for that one.
                continue;
            }
            let message = state
                .last_error
                .clone()
                .unwrap_or_else(|| "capture produced no snapshot".to_string());
            return Err(WebInkError::RenderFailed(message));
        }
    }

    /// The single-flight capture body: render, install, wake waiters.
    async fn capture(renderer: Arc<dyn Renderer>, device: Arc<Device>, slot: Arc<DeviceSlot>) {
        let result = renderer.render(&device).await;
        let mut state = slot.state.lock().await;
        match result.and_then(|rgb| Snapshot::build(rgb, &device)) {
            Ok(snapshot) => {
                info!(
                    "Installed snapshot {} for device {}",
                    snapshot.fingerprint, device.id
                );
                state.current = Some(Arc::new(snapshot));
                state.last_error = None;
                state.generation += 1;
            }
            Err(e) => {
                warn!("Capture failed for device {}: {e}", device.id);
                state.last_error = Some(e.to_string());
            }
        }
        state.in_flight = false;
        drop(state);
        slot.refreshed.notify_waiters();
    }

    /// Current fingerprint for the device, refreshing first if stale.
    ///
    /// The requested mode must match the device's configured mode; the
    /// fingerprint is a function of it.
    pub async fn hash(&self, device: &Arc<Device>, mode: &DisplayMode) -> Result<String> {
        check_mode(device, mode)?;
        Ok(self.snapshot(device).await?.fingerprint.clone())
    }

    /// Encodes one tile of the device's current snapshot.
    ///
    /// Mode and format are validated before any capture is triggered, so
    /// a conflicting request never touches the render engine.
    pub async fn tile(
        &self,
        device: &Arc<Device>,
        mode: &DisplayMode,
        rect: Rect,
        format: TileFormat,
    ) -> Result<BytesMut> {
        check_mode(device, mode)?;
        if device.mode.color.format() != format {
            return Err(WebInkError::BadFormat(format!(
                "format does not match mode {}",
                device.mode
            )));
        }
        // The snapshot always has the declared viewport size, so a bad
        // rectangle can be rejected before any capture is triggered.
        rect.validate(device.mode.width, device.mode.height)?;
        let snapshot = self.snapshot(device).await?;
        encoding::encode_tile(&snapshot.frame_view(), device.mode.color, rect)
    }

    /// Last capture error for a device, if the most recent attempt failed.
    pub async fn last_error(&self, device_id: &str) -> Option<String> {
        let slot = self.slots.get(device_id)?;
        slot.state.lock().await.last_error.clone()
    }
}

fn check_mode(device: &Device, mode: &DisplayMode) -> Result<()> {
    if *mode == device.mode {
        Ok(())
    } else {
        Err(WebInkError::ModeConflict {
            requested: mode.to_string(),
            configured: device.mode.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Renderer double: counts invocations, optionally fails, and can
    /// stall to widen the single-flight window.
    struct FakeRenderer {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
        fill: AtomicUsize,
    }

    impl FakeRenderer {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
                fill: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Renderer for FakeRenderer {
        fn render<'a>(&'a self, device: &'a Device) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail.load(Ordering::SeqCst) {
                    return Err(WebInkError::RenderFailed("boom".to_string()));
                }
                let fill = self.fill.load(Ordering::SeqCst) as u8;
                let len = (device.mode.width * device.mode.height * 3) as usize;
                Ok(vec![fill; len])
            })
        }
    }

    fn test_registry(mode: &str, refresh: u64) -> DeviceRegistry {
        DeviceRegistry::from_config(&[DeviceConfig {
            id: "dev1".to_string(),
            api_key: "K".to_string(),
            url: "http://dashboard:8080/render/dev1".to_string(),
            mode: mode.to_string(),
            refresh_interval: refresh,
            sleep_duration: 300,
        }])
        .unwrap()
    }

    fn cache_with(
        mode: &str,
        refresh: u64,
        renderer: Arc<FakeRenderer>,
    ) -> (SnapshotCache, Arc<Device>) {
        let registry = test_registry(mode, refresh);
        let device = registry.lookup("dev1").unwrap();
        let cache = SnapshotCache::new(renderer, &registry, Duration::from_secs(5));
        (cache, device)
    }

    #[tokio::test]
    async fn test_fresh_snapshot_served_without_rerender() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x8xG", 60, renderer.clone());

        let first = cache.snapshot(&device).await.unwrap();
        let second = cache.snapshot(&device).await.unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrent_demand() {
        let renderer = Arc::new(FakeRenderer::new(Duration::from_millis(50)));
        let (cache, device) = cache_with("16x8x8xG", 60, renderer.clone());
        let cache = Arc::new(cache);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let device = device.clone();
            tasks.push(tokio::spawn(async move { cache.snapshot(&device).await }));
        }
        let mut fingerprints = Vec::new();
        for task in tasks {
            fingerprints.push(task.await.unwrap().unwrap().fingerprint.clone());
        }
        assert!(fingerprints.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_rearms_capture() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        // refresh_interval 0: every snapshot is immediately stale.
        let (cache, device) = cache_with("16x8x8xG", 0, renderer.clone());

        let first = cache.snapshot(&device).await.unwrap();
        renderer.fill.store(9, Ordering::SeqCst);
        let second = cache.snapshot(&device).await.unwrap();
        assert_ne!(first.fingerprint, second.fingerprint);
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_reported_and_previous_snapshot_retained() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x8xG", 0, renderer.clone());

        let first = cache.snapshot(&device).await.unwrap();
        let old_print = first.fingerprint.clone();

        renderer.fail.store(true, Ordering::SeqCst);
        let err = cache.snapshot(&device).await.unwrap_err();
        assert!(matches!(err, WebInkError::RenderFailed(_)));
        assert!(cache.last_error("dev1").await.is_some());

        // The failed capture did not clobber the installed snapshot.
        renderer.fail.store(false, Ordering::SeqCst);
        renderer.fill.store(3, Ordering::SeqCst);
        let recovered = cache.snapshot(&device).await.unwrap();
        assert_ne!(recovered.fingerprint, old_print);
        assert!(cache.last_error("dev1").await.is_none());
    }

    #[tokio::test]
    async fn test_waiters_see_failure_then_rearm() {
        let renderer = Arc::new(FakeRenderer::new(Duration::from_millis(30)));
        renderer.fail.store(true, Ordering::SeqCst);
        let (cache, device) = cache_with("16x8x8xG", 60, renderer.clone());
        let cache = Arc::new(cache);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let device = device.clone();
            tasks.push(tokio::spawn(async move { cache.snapshot(&device).await }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }
        assert_eq!(renderer.calls(), 1);

        // The failure did not latch; the next read captures again.
        renderer.fail.store(false, Ordering::SeqCst);
        assert!(cache.snapshot(&device).await.is_ok());
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn test_mode_conflict_never_touches_renderer() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x8xG", 60, renderer.clone());

        let wrong: DisplayMode = "16x8x1xB".parse().unwrap();
        let err = cache.hash(&device, &wrong).await.unwrap_err();
        assert!(matches!(err, WebInkError::ModeConflict { .. }));

        let err = cache
            .tile(&device, &wrong, Rect::new(0, 0, 8, 8), TileFormat::Pbm)
            .await
            .unwrap_err();
        assert!(matches!(err, WebInkError::ModeConflict { .. }));
        assert_eq!(renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_format_must_match_mode() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x8xG", 60, renderer.clone());

        let mode = device.mode;
        let err = cache
            .tile(&device, &mode, Rect::new(0, 0, 8, 8), TileFormat::Ppm)
            .await
            .unwrap_err();
        assert!(matches!(err, WebInkError::BadFormat(_)));
        assert_eq!(renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_tile_reads_are_deterministic() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x1xB", 60, renderer.clone());

        let mode = device.mode;
        let rect = Rect::new(0, 0, 16, 8);
        let a = cache.tile(&device, &mode, rect, TileFormat::Pbm).await.unwrap();
        let b = cache.tile(&device, &mode, rect, TileFormat::Pbm).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(b"P4\n16 8\n"));
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn test_tile_slices_stitch_into_union() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x24xC", 60, renderer.clone());
        let mode = device.mode;

        let mut stitched = Vec::new();
        for y in (0..8).step_by(2) {
            let tile = cache
                .tile(&device, &mode, Rect::new(0, y, 16, 2), TileFormat::Ppm)
                .await
                .unwrap();
            stitched.extend_from_slice(&tile[b"P6\n16 2\n255\n".len()..]);
        }
        let full = cache
            .tile(&device, &mode, Rect::new(0, 0, 16, 8), TileFormat::Ppm)
            .await
            .unwrap();
        assert_eq!(&full[b"P6\n16 8\n255\n".len()..], &stitched[..]);
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_consistent_with_buffer() {
        let renderer = Arc::new(FakeRenderer::new(Duration::ZERO));
        let (cache, device) = cache_with("16x8x8xG", 60, renderer.clone());

        let snapshot = cache.snapshot(&device).await.unwrap();
        let expected = crate::fingerprint::fingerprint(
            &snapshot.rgb,
            &device.mode.to_string(),
            &device.id,
        );
        assert_eq!(snapshot.fingerprint, expected);
    }
}
