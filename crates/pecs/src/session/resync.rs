use crate::net::RECORDS_PER_BATCH;
use crate::record::DeviceClock;

const BATCH_STRIDE: u32 = RECORDS_PER_BATCH as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// First batch seen from this mote.
    Initial,
    /// The batch directly after the last one.
    Advance,
    /// A resend of the last batch; its release packet went missing.
    Duplicate,
    /// The mote is somewhere else in its log. Its pointer wins.
    Desync { expected: u32 },
}

impl SyncDecision {
    pub fn should_process(self) -> bool {
        !matches!(self, SyncDecision::Duplicate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncDecision::Initial => "initial",
            SyncDecision::Advance => "advance",
            SyncDecision::Duplicate => "duplicate",
            SyncDecision::Desync { .. } => "desync",
        }
    }
}

/// Tracks a mote's circular log pointer and whether its relative clock can
/// be trusted.
#[derive(Debug, Clone)]
pub struct ResyncController {
    read_ptr: Option<u32>,
    log_size: u32,
    clock: DeviceClock,
}

impl ResyncController {
    pub fn new(log_size: u32) -> Self {
        Self {
            read_ptr: None,
            log_size,
            clock: DeviceClock::new(),
        }
    }

    pub fn read_ptr(&self) -> Option<u32> {
        self.read_ptr
    }

    pub fn is_synced(&self) -> bool {
        self.read_ptr.is_some()
    }

    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut DeviceClock {
        &mut self.clock
    }

    pub fn expected(&self) -> Option<u32> {
        self.read_ptr
            .map(|ptr| (ptr + BATCH_STRIDE) % self.log_size)
    }

    pub fn observe(&mut self, incoming: u32) -> SyncDecision {
        let Some(current) = self.read_ptr else {
            self.resync_to(incoming);
            return SyncDecision::Initial;
        };

        let expected = (current + BATCH_STRIDE) % self.log_size;
        if incoming == expected {
            self.read_ptr = Some(incoming);
            return SyncDecision::Advance;
        }
        if incoming == current {
            return SyncDecision::Duplicate;
        }

        self.resync_to(incoming);
        SyncDecision::Desync { expected }
    }

    fn resync_to(&mut self, incoming: u32) {
        self.read_ptr = Some(incoming);
        self.clock.invalidate();
    }
}
