//! Bounded per-device log buffers.
//!
//! Firmware clients POST free-form diagnostic text through `/post_log`;
//! the server keeps a short in-memory tail per device for operators to
//! inspect. The buffers are advisory: oldest lines are evicted first,
//! oversized lines are truncated, and nothing is persisted.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use log::debug;

use crate::registry::DeviceRegistry;

/// Maximum retained lines per device.
const MAX_LINES: usize = 200;

/// Maximum length of a single retained line, in bytes.
const MAX_LINE_LEN: usize = 1024;

/// In-memory log tails for every registered device.
pub struct DeviceLogs {
    buffers: HashMap<String, Mutex<VecDeque<String>>>,
}

impl DeviceLogs {
    /// Creates one empty buffer per registered device.
    #[must_use]
    pub fn new(registry: &DeviceRegistry) -> Self {
        let buffers = registry
            .devices()
            .map(|device| (device.id.clone(), Mutex::new(VecDeque::new())))
            .collect();
        Self { buffers }
    }

    /// Appends a client log line, truncating and evicting as needed.
    ///
    /// Unknown device ids are ignored; the caller authenticates before
    /// appending, so this only happens in tests.
    pub fn append(&self, device_id: &str, text: &str) {
        let Some(buffer) = self.buffers.get(device_id) else {
            return;
        };
        let mut line = text.trim_end_matches('\n').to_string();
        if line.len() > MAX_LINE_LEN {
            // Cut on a char boundary at or below the cap.
            let mut cut = MAX_LINE_LEN;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        debug!("Device {device_id} log: {line}");

        let Ok(mut lines) = buffer.lock() else {
            return;
        };
        lines.push_back(line);
        while lines.len() > MAX_LINES {
            lines.pop_front();
        }
    }

    /// Current tail for a device, oldest first.
    #[must_use]
    pub fn lines(&self, device_id: &str) -> Vec<String> {
        self.buffers
            .get(device_id)
            .and_then(|buffer| buffer.lock().ok().map(|lines| lines.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn logs() -> DeviceLogs {
        let registry = DeviceRegistry::from_config(&[DeviceConfig {
            id: "dev1".to_string(),
            api_key: "K".to_string(),
            url: "http://dashboard:8080/render/dev1".to_string(),
            mode: "800x480x1xB".to_string(),
            refresh_interval: 60,
            sleep_duration: 300,
        }])
        .unwrap();
        DeviceLogs::new(&registry)
    }

    #[test]
    fn test_append_and_read() {
        let logs = logs();
        logs.append("dev1", "hello\n");
        logs.append("dev1", "world");
        assert_eq!(logs.lines("dev1"), vec!["hello", "world"]);
    }

    #[test]
    fn test_bounded() {
        let logs = logs();
        for i in 0..MAX_LINES + 10 {
            logs.append("dev1", &format!("line {i}"));
        }
        let lines = logs.lines("dev1");
        assert_eq!(lines.len(), MAX_LINES);
        assert_eq!(lines[0], "line 10");
    }

    #[test]
    fn test_long_line_truncated() {
        let logs = logs();
        logs.append("dev1", &"x".repeat(MAX_LINE_LEN * 2));
        assert_eq!(logs.lines("dev1")[0].len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_unknown_device_ignored() {
        let logs = logs();
        logs.append("ghost", "boo");
        assert!(logs.lines("ghost").is_empty());
    }
}
