mod clock;
mod decode;
mod stream;

pub use clock::{DEVICE_EPOCH_OFFSET_SECS, DeviceClock, device_to_wall_millis, observer_millis};
pub use decode::{
    Battery, BatteryLayout, Boot, IMAGE_ID_OFFSET, Record, RecordKind, Settings, Tho,
};
pub use stream::{Reading, Stream};

/// What a session should do with a decoded record once the device clock has
/// been consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Blank or unrecognised record; counted, never published.
    Corrupt,
    /// The record needs an absolute time reference that this session lacks.
    Dropped,
    /// Publish the record's readings stamped at `at_ms`.
    Timed { at_ms: u64 },
    /// Boot rows are always persisted; readings only go out with a time.
    Boot { at_ms: Option<u64> },
}

/// Runs one record against the device clock, anchoring or advancing it.
pub fn interpret(record: &Record, clock: &mut DeviceClock) -> Decoded {
    match record {
        Record::Blank | Record::Unknown(_) => Decoded::Corrupt,
        Record::Timestamp(ts) => Decoded::Timed {
            at_ms: clock.anchor(*ts),
        },
        Record::Boot(_) => Decoded::Boot {
            at_ms: clock.wall_millis(),
        },
        Record::Tho(_) | Record::Settings(_) | Record::Battery(_) => {
            let delta = record.relative_secs().unwrap_or(0);
            match clock.advance(delta) {
                Some(at_ms) => Decoded::Timed { at_ms },
                None => Decoded::Dropped,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(r: [u8; 4]) -> Record {
        Record::decode(r, BatteryLayout::ThreeBit)
    }

    #[test]
    fn test_timed_records_need_an_anchor() {
        let mut clock = DeviceClock::new();
        for raw in [
            [0x1c, 0x12, 0x34, 0x56],
            [0x5a, 0xbc, 0xde, 0xf1],
            [0xcb, 0x05, 0x40, 0x00],
        ] {
            assert_eq!(interpret(&decode(raw), &mut clock), Decoded::Dropped);
        }
        assert_eq!(clock.current(), 0);
    }

    #[test]
    fn test_timestamp_anchors_without_prior_time() {
        let mut clock = DeviceClock::new();
        let decoded = interpret(&Record::Timestamp(1000), &mut clock);
        assert_eq!(
            decoded,
            Decoded::Timed {
                at_ms: device_to_wall_millis(1000)
            }
        );
        assert!(clock.has_absolute_time());
    }

    #[test]
    fn test_relative_deltas_accumulate() {
        let mut clock = DeviceClock::new();
        interpret(&Record::Timestamp(1000), &mut clock);

        // THO rts 3, settings rts 1
        interpret(&decode([0x1c, 0x12, 0x34, 0x56]), &mut clock);
        let decoded = interpret(&decode([0x5a, 0xbc, 0xde, 0xf1]), &mut clock);

        assert_eq!(clock.current(), 1004);
        assert_eq!(
            decoded,
            Decoded::Timed {
                at_ms: device_to_wall_millis(1004)
            }
        );
    }

    #[test]
    fn test_boot_without_time_still_persists() {
        let mut clock = DeviceClock::new();
        let boot = decode([0xd3, 0x0a, 0xbc, 0xde]);
        assert_eq!(interpret(&boot, &mut clock), Decoded::Boot { at_ms: None });

        interpret(&Record::Timestamp(50), &mut clock);
        assert_eq!(
            interpret(&boot, &mut clock),
            Decoded::Boot {
                at_ms: Some(device_to_wall_millis(50))
            }
        );
        assert_eq!(clock.current(), 50);
    }

    #[test]
    fn test_corrupt_records_leave_clock_alone() {
        let mut clock = DeviceClock::new();
        clock.anchor(77);
        assert_eq!(interpret(&Record::Blank, &mut clock), Decoded::Corrupt);
        assert_eq!(
            interpret(&decode([0x9a, 0x00, 0x00, 0x00]), &mut clock),
            Decoded::Corrupt
        );
        assert_eq!(clock.current(), 77);
        assert!(clock.has_absolute_time());
    }
}
