use std::fmt;

/// Named time series kept per mote in the archiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Humidity,
    Temperature,
    Occupancy,
    SessionCorruptRecords,
    Resets,
    LogPtr,
    BatteryOk,
    FwVersion,
    Offset,
    SeatFan,
    SeatHeat,
    BackFan,
    BackHeat,
    Battery,
    WallInRemoteTime,
    RemoteInWallTime,
}

impl Stream {
    pub const ALL: [Stream; 16] = [
        Stream::Humidity,
        Stream::Temperature,
        Stream::Occupancy,
        Stream::SessionCorruptRecords,
        Stream::Resets,
        Stream::LogPtr,
        Stream::BatteryOk,
        Stream::FwVersion,
        Stream::Offset,
        Stream::SeatFan,
        Stream::SeatHeat,
        Stream::BackFan,
        Stream::BackHeat,
        Stream::Battery,
        Stream::WallInRemoteTime,
        Stream::RemoteInWallTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stream::Humidity => "humidity",
            Stream::Temperature => "temperature",
            Stream::Occupancy => "occupancy",
            Stream::SessionCorruptRecords => "session_corrupt_records",
            Stream::Resets => "resets",
            Stream::LogPtr => "log_ptr",
            Stream::BatteryOk => "battery_ok",
            Stream::FwVersion => "fw_version",
            Stream::Offset => "offset",
            Stream::SeatFan => "seat_fan",
            Stream::SeatHeat => "seat_heat",
            Stream::BackFan => "back_fan",
            Stream::BackHeat => "back_heat",
            Stream::Battery => "battery",
            Stream::WallInRemoteTime => "wall_in_remote_time",
            Stream::RemoteInWallTime => "remote_in_wall_time",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Stream::Humidity => "%RH",
            Stream::Temperature => "Fahrenheit",
            Stream::Occupancy => "Binary",
            Stream::SessionCorruptRecords => "Corrupt Records",
            Stream::Resets => "Resets",
            Stream::LogPtr => "Record index",
            Stream::BatteryOk => "Boolean",
            Stream::FwVersion => "Version",
            Stream::Offset => "Seconds",
            Stream::SeatFan | Stream::SeatHeat | Stream::BackFan | Stream::BackHeat => "%",
            Stream::Battery => "Voltage",
            Stream::WallInRemoteTime => "Wall seconds",
            Stream::RemoteInWallTime => "Remote seconds",
        }
    }

    pub fn path(self, serial: u16) -> String {
        format!("/{:04x}/{}", serial, self.name())
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub stream: Stream,
    pub timestamp_ms: u64,
    pub value: f64,
}

impl Reading {
    pub fn new(stream: Stream, timestamp_ms: u64, value: f64) -> Self {
        Self {
            stream,
            timestamp_ms,
            value,
        }
    }
}
