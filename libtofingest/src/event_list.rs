use fxhash::FxHashMap;
use time::OffsetDateTime;

/// One reconstructed event: a time-of-flight in microseconds and the wall
/// time of the pulse it was recorded under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEvent {
    pub tof: f64,
    pub pulse_time: OffsetDateTime,
}

/// Events whose translated id does not correspond to any known sensor,
/// keyed by that id. These are never merged into the per-sensor lists; they
/// are surfaced to diagnostics consumers as their own time series.
pub type AttributionFailureBucket = FxHashMap<u32, Vec<SensorEvent>>;

/// Running counters for one ingestion run. Counters only ever increase;
/// each worker accumulates its own copy and they are combined once at merge.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionStatistics {
    pub good_events: u64,
    /// Every record that was not good and not ignored: bad + unattributable
    pub error_events: u64,
    /// Records with the error bit set on the raw sensor id
    pub bad_events: u64,
    /// Records whose translated id fell outside the known sensor range
    pub unattributable_events: u64,
    /// Records filtered out by the caller-supplied sensor selection
    pub ignored_events: u64,
    pub shortest_tof: f64,
    pub longest_tof: f64,
}

impl Default for IngestionStatistics {
    fn default() -> Self {
        Self {
            good_events: 0,
            error_events: 0,
            bad_events: 0,
            unattributable_events: 0,
            ignored_events: 0,
            shortest_tof: f64::MAX,
            longest_tof: 0.0,
        }
    }
}

impl IngestionStatistics {
    /// Fold a good event's time-of-flight into the extrema
    pub fn record_tof(&mut self, tof: f64) {
        if tof < self.shortest_tof {
            self.shortest_tof = tof;
        }
        if tof > self.longest_tof {
            self.longest_tof = tof;
        }
    }

    /// Combine another worker's statistics into this one
    pub fn combine(&mut self, other: &IngestionStatistics) {
        self.good_events += other.good_events;
        self.error_events += other.error_events;
        self.bad_events += other.bad_events;
        self.unattributable_events += other.unattributable_events;
        self.ignored_events += other.ignored_events;
        self.shortest_tof = self.shortest_tof.min(other.shortest_tof);
        self.longest_tof = self.longest_tof.max(other.longest_tof);
    }

    /// Every record processed lands in exactly one of these three counters
    pub fn total_processed(&self) -> u64 {
        self.good_events + self.error_events + self.ignored_events
    }
}

/// Everything an ingestion run produces. Constructed once, after the merge
/// phase; read-only from the caller's point of view.
#[derive(Debug)]
pub struct IngestionResult {
    /// Per-sensor event lists, indexed by logical sensor id
    pub events: Vec<Vec<SensorEvent>>,
    pub unattributed: AttributionFailureBucket,
    pub stats: IngestionStatistics,
    /// Number of pulse event indices that had the veto flag masked off
    pub corrected_pulse_indices: usize,
    /// True when the pulse timeline was monotonic and the lists were sorted
    /// by pulse time after the merge
    pub sorted_by_pulse_time: bool,
}

impl IngestionResult {
    /// Total number of events attributed to known sensors
    pub fn total_events(&self) -> usize {
        self.events.iter().map(|list| list.len()).sum()
    }
}
