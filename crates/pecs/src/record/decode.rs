use std::fmt;
use std::str::FromStr;

use crate::net::RawRecord;

use super::stream::{Reading, Stream};

/// Added to a boot record's firmware image id before it is stored.
pub const IMAGE_ID_OFFSET: u32 = 0x50000;

const BATTERY_DIVIDER: f64 = 10000.0 / (10000.0 + 68000.0);
const ADC_REFERENCE_VOLTS: f64 = 2.048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Blank,
    Timestamp,
    Tho,
    Settings,
    Battery,
    Boot,
    Unknown,
}

/// (mask, value) over the first byte selects the record layout.
const TAG_TABLE: [(u8, u8, RecordKind); 6] = [
    (0xf0, 0xf0, RecordKind::Blank),
    (0xf0, 0xe0, RecordKind::Timestamp),
    (0xc0, 0x00, RecordKind::Tho),
    (0xc0, 0x40, RecordKind::Settings),
    (0xf0, 0xc0, RecordKind::Battery),
    (0xf0, 0xd0, RecordKind::Boot),
];

impl RecordKind {
    pub fn classify(tag: u8) -> RecordKind {
        TAG_TABLE
            .iter()
            .find(|(mask, value, _)| tag & mask == *value)
            .map(|&(_, _, kind)| kind)
            .unwrap_or(RecordKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Blank => "blank",
            RecordKind::Timestamp => "timestamp",
            RecordKind::Tho => "THO",
            RecordKind::Settings => "settings",
            RecordKind::Battery => "battery",
            RecordKind::Boot => "boot",
            RecordKind::Unknown => "unknown",
        }
    }
}

/// Battery records changed their relative-time width between firmware
/// generations. A deployment runs exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryLayout {
    /// `((r0 & 0x7) << 8) + r1`
    #[default]
    ThreeBit,
    /// `((r0 & 0xf) << 8) + r1`, the delta overlaps the ok flag.
    FourBit,
}

impl FromStr for BatteryLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "three-bit" | "3" => Ok(BatteryLayout::ThreeBit),
            "four-bit" | "4" => Ok(BatteryLayout::FourBit),
            other => Err(format!(
                "unknown battery layout '{other}', expected three-bit or four-bit"
            )),
        }
    }
}

impl fmt::Display for BatteryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryLayout::ThreeBit => f.write_str("three-bit"),
            BatteryLayout::FourBit => f.write_str("four-bit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tho {
    pub rts: u32,
    pub occupied: bool,
    pub humidity_raw: u16,
    pub temp_raw: u16,
}

impl Tho {
    fn decode(r: RawRecord) -> Self {
        Self {
            rts: ((r[0] >> 3) & 0x7) as u32,
            occupied: (r[0] >> 2) & 0x1 != 0,
            humidity_raw: (((r[0] & 0x3) as u16) << 10) | ((r[1] as u16) << 2) | ((r[2] >> 6) as u16),
            temp_raw: (((r[2] & 0x3f) as u16) << 8) | r[3] as u16,
        }
    }

    /// Relative humidity in percent, `None` for the all-zero sensor fault.
    pub fn humidity(&self) -> Option<f64> {
        (self.humidity_raw != 0)
            .then(|| -6.0 + 125.0 * ((self.humidity_raw as u32) << 4) as f64 / 65536.0)
    }

    /// Temperature in Fahrenheit, `None` for the all-zero sensor fault.
    pub fn temperature_f(&self) -> Option<f64> {
        (self.temp_raw != 0).then(|| {
            let celsius = -46.85 + 175.72 * ((self.temp_raw as u32) << 2) as f64 / 65536.0;
            celsius * 1.8 + 32.0
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub rts: u32,
    pub seat_heat: u8,
    pub back_heat: u8,
    pub seat_fan: u8,
    pub back_fan: u8,
}

impl Settings {
    fn decode(r: RawRecord) -> Self {
        Self {
            rts: ((r[0] >> 4) & 0x3) as u32,
            seat_heat: ((r[0] & 0xf) << 3) + (r[1] >> 5),
            back_heat: ((r[1] & 0x1f) << 2) + (r[2] >> 6),
            seat_fan: ((r[2] & 0x3f) << 1) + (r[3] >> 7),
            back_fan: r[3] & 0x7f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Battery {
    pub rts: u32,
    pub ok: bool,
    pub voltage_raw: i16,
}

impl Battery {
    fn decode(r: RawRecord, layout: BatteryLayout) -> Self {
        let high_mask = match layout {
            BatteryLayout::ThreeBit => 0x7,
            BatteryLayout::FourBit => 0xf,
        };
        Self {
            rts: (((r[0] & high_mask) as u32) << 8) + r[1] as u32,
            ok: r[0] & 0x8 != 0,
            voltage_raw: i16::from_be_bytes([r[2], r[3]]),
        }
    }

    pub fn voltage(&self) -> f64 {
        (self.voltage_raw as f64 / 32768.0 * ADC_REFERENCE_VOLTS) / BATTERY_DIVIDER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boot {
    pub version: u8,
    pub resets: u8,
    pub image_id: u32,
}

impl Boot {
    fn decode(r: RawRecord) -> Self {
        Self {
            version: r[0] & 0xf,
            resets: r[1] >> 2,
            image_id: (((r[1] & 0x3) as u32) << 16) | ((r[2] as u32) << 8) | r[3] as u32,
        }
    }

    /// Image id as published, shifted into the firmware build range.
    pub fn external_image_id(&self) -> u32 {
        self.image_id + IMAGE_ID_OFFSET
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Blank,
    Timestamp(u32),
    Tho(Tho),
    Settings(Settings),
    Battery(Battery),
    Boot(Boot),
    Unknown(RawRecord),
}

impl Record {
    pub fn decode(r: RawRecord, layout: BatteryLayout) -> Self {
        match RecordKind::classify(r[0]) {
            RecordKind::Blank => Record::Blank,
            RecordKind::Timestamp => Record::Timestamp(
                (((r[0] & 0xf) as u32) << 24)
                    | ((r[1] as u32) << 16)
                    | ((r[2] as u32) << 8)
                    | r[3] as u32,
            ),
            RecordKind::Tho => Record::Tho(Tho::decode(r)),
            RecordKind::Settings => Record::Settings(Settings::decode(r)),
            RecordKind::Battery => Record::Battery(Battery::decode(r, layout)),
            RecordKind::Boot => Record::Boot(Boot::decode(r)),
            RecordKind::Unknown => Record::Unknown(r),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Blank => RecordKind::Blank,
            Record::Timestamp(_) => RecordKind::Timestamp,
            Record::Tho(_) => RecordKind::Tho,
            Record::Settings(_) => RecordKind::Settings,
            Record::Battery(_) => RecordKind::Battery,
            Record::Boot(_) => RecordKind::Boot,
            Record::Unknown(_) => RecordKind::Unknown,
        }
    }

    /// Seconds to add to the device clock before this record's wall time is
    /// known. `None` for records that do not move the clock.
    pub fn relative_secs(&self) -> Option<u32> {
        match self {
            Record::Tho(tho) => Some(tho.rts),
            Record::Settings(settings) => Some(settings.rts),
            Record::Battery(battery) => Some(battery.rts),
            _ => None,
        }
    }

    /// Readings for a record stamped at `at_ms` device wall time. Every timed
    /// record also reports the observer's clock at that instant.
    pub fn readings(&self, at_ms: u64, observer_ms: u64) -> Vec<Reading> {
        let cross_check = Reading::new(Stream::WallInRemoteTime, at_ms, observer_ms as f64 / 1000.0);
        let flag = |set: bool| if set { 1.0 } else { 0.0 };

        match self {
            Record::Blank | Record::Unknown(_) => Vec::new(),
            Record::Timestamp(_) => vec![cross_check],
            Record::Tho(tho) => {
                let mut readings = vec![
                    cross_check,
                    Reading::new(Stream::Occupancy, at_ms, flag(tho.occupied)),
                ];
                match tho.humidity() {
                    Some(humidity) => readings.push(Reading::new(Stream::Humidity, at_ms, humidity)),
                    None => log::debug!("Bad humidity record"),
                }
                match tho.temperature_f() {
                    Some(temp) => readings.push(Reading::new(Stream::Temperature, at_ms, temp)),
                    None => log::debug!("Bad temperature record"),
                }
                readings
            }
            Record::Settings(settings) => vec![
                cross_check,
                Reading::new(Stream::SeatHeat, at_ms, settings.seat_heat as f64),
                Reading::new(Stream::BackHeat, at_ms, settings.back_heat as f64),
                Reading::new(Stream::SeatFan, at_ms, settings.seat_fan as f64),
                Reading::new(Stream::BackFan, at_ms, settings.back_fan as f64),
            ],
            Record::Battery(battery) => vec![
                cross_check,
                Reading::new(Stream::Battery, at_ms, battery.voltage()),
                Reading::new(Stream::BatteryOk, at_ms, flag(battery.ok)),
            ],
            Record::Boot(boot) => vec![
                cross_check,
                Reading::new(Stream::Resets, at_ms, boot.resets as f64),
                Reading::new(Stream::FwVersion, at_ms, boot.version as f64),
            ],
        }
    }
}
