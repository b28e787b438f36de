use std::io::Read;
use std::path::Path;

use byteorder::{NativeEndian, ReadBytesExt};
use time::{Duration, OffsetDateTime};

use super::constants::{ACQUISITION_EPOCH, FREQUENCY_SCAN_PULSES, PULSE_RECORD_BYTES, VETO_FLAG_MASK};
use super::error::PulseFileError;
use super::record_file::{FixedRecord, RecordFile};

/// One record of the pulse file, as written by the timing hardware.
#[derive(Debug, Clone, Copy)]
pub struct PulseRecord {
    pub nanoseconds: u32,
    pub seconds: u32,
    pub event_index_start: u64,
    pub integrated_current: f64,
}

impl FixedRecord for PulseRecord {
    const SIZE: usize = PULSE_RECORD_BYTES;
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            nanoseconds: reader.read_u32::<NativeEndian>()?,
            seconds: reader.read_u32::<NativeEndian>()?,
            event_index_start: reader.read_u64::<NativeEndian>()?,
            integrated_current: reader.read_f64::<NativeEndian>()?,
        })
    }
}

/// The per-run pulse timeline: one entry per accelerator pulse, mapping a
/// range of event-file offsets to the wall time and integrated charge of the
/// pulse they were recorded under.
///
/// The timeline is optional; an absent timeline attributes every event to the
/// acquisition epoch. If adjacent pulse times ever decrease the timeline is
/// flagged non-monotonic and sort-order guarantees on the outputs are voided.
#[derive(Debug, Clone, Default)]
pub struct PulseTimeline {
    times: Vec<OffsetDateTime>,
    event_index_starts: Vec<u64>,
    charges: Vec<f64>,
    present: bool,
    monotonic: bool,
    corrected_indices: usize,
}

impl PulseTimeline {
    /// An explicitly-absent timeline
    pub fn absent() -> Self {
        Self::default()
    }

    /// Load the pulse timeline from the given file.
    ///
    /// A `None` path yields an absent timeline. A present-but-unreadable file
    /// is an error when `required` is set; otherwise it is logged and an
    /// absent timeline is returned so the run can continue.
    pub fn load(path: Option<&Path>, required: bool) -> Result<Self, PulseFileError> {
        let Some(path) = path else {
            return Ok(Self::absent());
        };
        let records = match RecordFile::<PulseRecord>::open(path).and_then(|mut f| f.read_all()) {
            Ok(records) => records,
            Err(e) if required => return Err(PulseFileError::FileError(e)),
            Err(e) => {
                log::warn!("Could not load pulse file {path:?} ({e}); continuing without pulse times");
                return Ok(Self::absent());
            }
        };

        let mut timeline = Self {
            times: Vec::with_capacity(records.len()),
            event_index_starts: Vec::with_capacity(records.len()),
            charges: Vec::with_capacity(records.len()),
            present: true,
            monotonic: true,
            corrected_indices: 0,
        };
        for record in &records {
            let time = ACQUISITION_EPOCH
                + Duration::new(record.seconds as i64, record.nanoseconds as i32);
            if let Some(previous) = timeline.times.last() {
                if time < *previous {
                    timeline.monotonic = false;
                }
            }
            timeline.times.push(time);
            timeline.event_index_starts.push(record.event_index_start);
            timeline.charges.push(record.integrated_current);
        }
        if !timeline.monotonic {
            log::warn!("Pulse times in {path:?} are not monotonic; output event lists will not be sorted");
        }
        Ok(timeline)
    }

    /// Correct producer-side index corruption before any decoding begins.
    ///
    /// Vetoed pulses are written with the veto flag bit set on their event
    /// index instead of a valid value. Any index beyond the total event count
    /// has the flag masked off, and the number of corrections is retained as
    /// a run diagnostic.
    pub fn correct_indices(&mut self, total_events: u64) -> usize {
        let mut corrected = 0;
        for index in self.event_index_starts.iter_mut() {
            if *index > total_events {
                *index &= !VETO_FLAG_MASK;
                corrected += 1;
            }
        }
        self.corrected_indices = corrected;
        if corrected > 0 {
            log::warn!("Masked the veto flag off {corrected} pulse event indices");
        }
        corrected
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn corrected_indices(&self) -> usize {
        self.corrected_indices
    }

    pub fn pulse_time(&self, pulse: usize) -> Option<OffsetDateTime> {
        self.times.get(pulse).copied()
    }

    pub fn pulse_charge(&self, pulse: usize) -> Option<f64> {
        self.charges.get(pulse).copied()
    }

    /// Total integrated charge over the run
    pub fn total_charge(&self) -> f64 {
        self.charges.iter().sum()
    }

    /// Start a scan cursor for one block's decode
    pub fn cursor(&self) -> PulseCursor<'_> {
        PulseCursor {
            timeline: self,
            index: 0,
        }
    }

    /// Best-effort estimate of the source frequency in Hz.
    ///
    /// Scans the leading pulses for the shortest run of constant event index
    /// and divides 60 by it. Purely a diagnostic; nothing downstream depends
    /// on the value being right for non-60 Hz sources.
    pub fn estimate_frequency(&self) -> Option<f64> {
        if self.event_index_starts.len() < 2 {
            return None;
        }
        let scan = &self.event_index_starts
            [..self.event_index_starts.len().min(FREQUENCY_SCAN_PULSES)];
        let mut shortest_run = usize::MAX;
        let mut run = 1;
        for pair in scan.windows(2) {
            if pair[0] == pair[1] {
                run += 1;
            } else {
                shortest_run = shortest_run.min(run);
                run = 1;
            }
        }
        shortest_run = shortest_run.min(run);
        Some(60.0 / shortest_run as f64)
    }
}

/// A forward-only scan cursor over the timeline.
///
/// Block decode visits global event offsets in increasing order, so rather
/// than binary searching per event the cursor gallops forward from its last
/// position. One cursor is created per block and retained across all of that
/// block's lookups.
#[derive(Debug)]
pub struct PulseCursor<'a> {
    timeline: &'a PulseTimeline,
    index: usize,
}

impl PulseCursor<'_> {
    /// The wall time of the pulse whose event range contains the given
    /// global event offset. Events before the first pulse attribute to the
    /// first pulse; None only if the timeline is absent/empty.
    pub fn pulse_for(&mut self, global_event_offset: u64) -> Option<OffsetDateTime> {
        let starts = &self.timeline.event_index_starts;
        if starts.is_empty() {
            return None;
        }
        // Gallop ahead in doubling steps, then settle one at a time
        let mut step = 1;
        while self.index + step < starts.len() && starts[self.index + step] <= global_event_offset {
            self.index += step;
            step <<= 1;
        }
        while self.index + 1 < starts.len() && starts[self.index + 1] <= global_event_offset {
            self.index += 1;
        }
        Some(self.timeline.times[self.index])
    }
}
