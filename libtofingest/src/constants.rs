use time::macros::datetime;
use time::OffsetDateTime;

/// Size of one raw event record on disk (u32 time offset + u32 raw sensor id)
pub const EVENT_RECORD_BYTES: usize = 8;
/// Size of one pulse record on disk (u32 nanos + u32 seconds + u64 index + f64 charge)
pub const PULSE_RECORD_BYTES: usize = 24;

/// The acquisition hardware sets this bit on the raw sensor id to flag a bad readout
pub const ERROR_ID_MASK: u32 = 0x8000_0000;

/// High bit set by the producer on the event index of a vetoed pulse.
/// Must be masked off before the index is used.
pub const VETO_FLAG_MASK: u64 = 1 << 63;

/// Raw time offsets are in 100 ns device ticks; we hand out microseconds
pub const TICK_TO_MICROSEC: f64 = 0.1;

/// The downstream beam monitor publishes this fixed out-of-band raw id...
pub const MONITOR_RAW_ID: u32 = 1_073_741_843;
/// ...which always corresponds to this logical sensor
pub const MONITOR_SENSOR_ID: u32 = 62_526;

/// Number of event records decoded per work block
pub const BLOCK_SIZE: usize = 500_000;

/// Below this many records the setup cost of extra workers isn't worth it
pub const MIN_PARALLEL_EVENTS: usize = 2_000_000;

/// How many leading pulses the source-frequency diagnostic inspects
pub const FREQUENCY_SCAN_PULSES: usize = 1200;

/// Pulse wall times are recorded as offsets from this epoch
pub const ACQUISITION_EPOCH: OffsetDateTime = datetime!(1990-01-01 0:00 UTC);
