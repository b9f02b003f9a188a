use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the mote epoch (2015-01-01T00:00:00Z).
pub const DEVICE_EPOCH_OFFSET_SECS: u64 = 1_420_070_400;

pub fn device_to_wall_millis(device_secs: u32) -> u64 {
    (device_secs as u64 + DEVICE_EPOCH_OFFSET_SECS) * 1000
}

pub fn observer_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Relative clock of one mote. The value is only meaningful once an absolute
/// timestamp record has anchored it; resyncs drop the anchor again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceClock {
    current: u32,
    anchored: bool,
    ever_anchored: bool,
}

impl DeviceClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn has_absolute_time(&self) -> bool {
        self.anchored
    }

    pub fn has_ever_had_time(&self) -> bool {
        self.ever_anchored
    }

    pub fn anchor(&mut self, device_secs: u32) -> u64 {
        self.current = device_secs;
        self.anchored = true;
        self.ever_anchored = true;
        device_to_wall_millis(self.current)
    }

    /// Applies a record's relative delta. Returns the record's wall time, or
    /// `None` (leaving the clock untouched) when there is no anchor.
    pub fn advance(&mut self, delta_secs: u32) -> Option<u64> {
        if !self.anchored {
            return None;
        }
        self.current = self.current.wrapping_add(delta_secs);
        Some(device_to_wall_millis(self.current))
    }

    pub fn invalidate(&mut self) {
        self.anchored = false;
    }

    pub fn wall_millis(&self) -> Option<u64> {
        self.anchored.then(|| device_to_wall_millis(self.current))
    }

    /// Last known device wall time, kept across resyncs for offset reporting.
    pub fn last_wall_millis(&self) -> Option<u64> {
        self.ever_anchored
            .then(|| device_to_wall_millis(self.current))
    }
}
