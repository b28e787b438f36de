use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::thread;

use byteorder::{NativeEndian, ReadBytesExt};

use super::config::Parallelism;
use super::constants::{
    ACQUISITION_EPOCH, BLOCK_SIZE, ERROR_ID_MASK, EVENT_RECORD_BYTES, MIN_PARALLEL_EVENTS,
    MONITOR_RAW_ID, MONITOR_SENSOR_ID, TICK_TO_MICROSEC,
};
use super::error::IngestError;
use super::event_list::{AttributionFailureBucket, IngestionStatistics, SensorEvent};
use super::pulse_timeline::PulseTimeline;
use super::record_file::{FixedRecord, RecordFile};
use super::sensor_map::SensorIdMap;
use super::worker_status::{BarColor, WorkerStatus};

/// One detector hit as the acquisition hardware wrote it: a time offset in
/// 100 ns ticks since the owning pulse, and the raw sensor id.
#[derive(Debug, Clone, Copy)]
pub struct RawEventRecord {
    pub time_offset: u32,
    pub raw_sensor_id: u32,
}

impl FixedRecord for RawEventRecord {
    const SIZE: usize = EVENT_RECORD_BYTES;
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            time_offset: reader.read_u32::<NativeEndian>()?,
            raw_sensor_id: reader.read_u32::<NativeEndian>()?,
        })
    }
}

/// Decode options for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Restrict ingestion to slice chunk_index of total_chunks
    pub chunk: Option<(usize, usize)>,
    /// Allow-list of logical sensor ids
    pub selected_sensor_ids: Option<Vec<u32>>,
    pub parallelism: Parallelism,
    pub max_events_override: Option<u64>,
    /// Records per decode block
    pub block_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk: None,
            selected_sensor_ids: None,
            parallelism: Parallelism::Auto,
            max_events_override: None,
            block_size: BLOCK_SIZE,
        }
    }
}

/// One worker's private decode output. Nothing here is shared between
/// workers; the aggregator combines all of them after every worker is done.
#[derive(Debug)]
pub struct WorkerOutput {
    /// Dense per-sensor buffers, indexed by logical sensor id
    pub events: Vec<Vec<SensorEvent>>,
    pub unattributed: AttributionFailureBucket,
    pub stats: IngestionStatistics,
}

impl WorkerOutput {
    fn new(max_sensor_id: u32) -> Self {
        Self {
            events: vec![Vec::new(); max_sensor_id as usize + 1],
            unattributed: AttributionFailureBucket::default(),
            stats: IngestionStatistics::default(),
        }
    }
}

/// The chunked decode engine.
///
/// The event file is partitioned into fixed-size blocks of records. A bounded
/// pool of workers pulls block indices off a shared counter (dynamic
/// dispatch, since blocks near end-of-file may be short), reads each block
/// under the single file lock, and decodes it with no locks held into the
/// worker's own buffers. A serial run is the same code with one worker.
#[derive(Debug)]
pub struct IngestionEngine<'a> {
    file: Mutex<RecordFile<RawEventRecord>>,
    total_records: usize,
    timeline: &'a PulseTimeline,
    map: &'a SensorIdMap,
    max_sensor_id: u32,
    selected: Option<Vec<u32>>,
    parallelism: Parallelism,
    chunk: Option<(usize, usize)>,
    max_events_override: Option<u64>,
    block_size: usize,
}

impl<'a> IngestionEngine<'a> {
    pub fn new(
        file: RecordFile<RawEventRecord>,
        timeline: &'a PulseTimeline,
        map: &'a SensorIdMap,
        max_sensor_id: u32,
        options: IngestOptions,
    ) -> Self {
        let total_records = file.element_count();
        let selected = options.selected_sensor_ids.map(|mut ids| {
            ids.sort_unstable();
            ids
        });
        Self {
            file: Mutex::new(file),
            total_records,
            timeline,
            map,
            max_sensor_id,
            selected,
            parallelism: options.parallelism,
            chunk: options.chunk,
            max_events_override: options.max_events_override,
            block_size: options.block_size,
        }
    }

    /// The record range this run will decode, after the max-events override
    /// and chunk slicing are applied
    pub fn record_range(&self) -> (usize, usize) {
        let mut end = self.total_records;
        if let Some(max) = self.max_events_override {
            end = end.min(max as usize);
        }
        match self.chunk {
            None => (0, end),
            Some((index, total)) => {
                // Spread the remainder over the leading chunks so the chunks
                // partition the range exactly
                let base = end / total;
                let remainder = end % total;
                let start = index * base + index.min(remainder);
                let len = base + usize::from(index < remainder);
                (start, start + len)
            }
        }
    }

    /// Decode every block, returning each worker's private output.
    ///
    /// Progress messages are sent per completed block when a status channel
    /// is given.
    pub fn run(&self, tx: Option<Sender<WorkerStatus>>) -> Result<Vec<WorkerOutput>, IngestError> {
        let (start, end) = self.record_range();
        let blocks: Vec<(usize, usize)> = (start..end)
            .step_by(self.block_size)
            .map(|block_start| (block_start, self.block_size.min(end - block_start)))
            .collect();
        let workers = self.worker_count(end - start, blocks.len());
        log::info!(
            "Decoding records [{start}, {end}) in {} blocks with {workers} worker(s)",
            blocks.len()
        );

        let next_block = AtomicUsize::new(0);
        let done_blocks = AtomicUsize::new(0);
        let results: Vec<Result<WorkerOutput, IngestError>> = thread::scope(|scope| {
            let blocks = &blocks;
            let next_block = &next_block;
            let done_blocks = &done_blocks;
            let mut handles = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                let tx = tx.clone();
                handles.push(scope.spawn(move || {
                    self.decode_worker(worker_id, blocks, next_block, done_blocks, tx)
                }));
            }
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(Err(IngestError::WorkerPanic)))
                .collect()
        });

        results.into_iter().collect()
    }

    fn worker_count(&self, record_count: usize, block_count: usize) -> usize {
        let available = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let requested = match self.parallelism {
            Parallelism::Serial => 1,
            Parallelism::Parallel => available,
            Parallelism::Auto => {
                if record_count < MIN_PARALLEL_EVENTS {
                    1
                } else {
                    available
                }
            }
        };
        requested.min(block_count).max(1)
    }

    fn decode_worker(
        &self,
        worker_id: usize,
        blocks: &[(usize, usize)],
        next_block: &AtomicUsize,
        done_blocks: &AtomicUsize,
        mut tx: Option<Sender<WorkerStatus>>,
    ) -> Result<WorkerOutput, IngestError> {
        let mut out = WorkerOutput::new(self.max_sensor_id);
        loop {
            let block = next_block.fetch_add(1, Ordering::SeqCst);
            if block >= blocks.len() {
                break;
            }
            let (block_start, block_len) = blocks[block];
            // The file handle does not support concurrent positioned reads,
            // so the seek+read pair is the one serialized section
            let records = {
                let mut file = self.file.lock().map_err(|_| IngestError::WorkerPanic)?;
                file.read_block_at(block_start, block_len)?
            };
            self.decode_block(&records, block_start, &mut out);

            let done = done_blocks.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(sender) = tx.take() {
                // Progress is best-effort; a listener that went away should
                // not cost us the run
                let status = WorkerStatus::new(
                    done as f32 / blocks.len() as f32,
                    worker_id,
                    BarColor::CYAN,
                );
                if sender.send(status).is_ok() {
                    tx = Some(sender);
                }
            }
        }
        Ok(out)
    }

    /// Decode one block into the worker's private buffers. Holds no locks.
    fn decode_block(&self, records: &[RawEventRecord], block_start: usize, out: &mut WorkerOutput) {
        let mut cursor = self.timeline.cursor();
        for (index, record) in records.iter().enumerate() {
            if record.raw_sensor_id & ERROR_ID_MASK != 0 {
                out.stats.bad_events += 1;
                out.stats.error_events += 1;
                continue;
            }
            // The monitor's raw id is out-of-band and never appears in the
            // map table, so it bypasses translation entirely
            let sensor_id = if record.raw_sensor_id == MONITOR_RAW_ID {
                MONITOR_SENSOR_ID
            } else {
                self.map.map(record.raw_sensor_id)
            };

            let tof = record.time_offset as f64 * TICK_TO_MICROSEC;
            let global_offset = (block_start + index) as u64;
            let pulse_time = cursor.pulse_for(global_offset).unwrap_or(ACQUISITION_EPOCH);
            let event = SensorEvent { tof, pulse_time };

            if sensor_id <= self.max_sensor_id {
                if let Some(selected) = &self.selected {
                    if selected.binary_search(&sensor_id).is_err() {
                        out.stats.ignored_events += 1;
                        continue;
                    }
                }
                out.events[sensor_id as usize].push(event);
                out.stats.good_events += 1;
                out.stats.record_tof(tof);
            } else {
                // Attribution failure: keep the event, just off to the side
                out.unattributed.entry(sensor_id).or_default().push(event);
                out.stats.unattributable_events += 1;
                out.stats.error_events += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;
    use byteorder::WriteBytesExt;
    use std::io::Write;
    use std::path::Path;

    fn write_event_file(records: &[(u32, u32)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (time_offset, raw_id) in records {
            file.write_u32::<NativeEndian>(*time_offset).unwrap();
            file.write_u32::<NativeEndian>(*raw_id).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn open_events(path: &Path) -> RecordFile<RawEventRecord> {
        RecordFile::<RawEventRecord>::open(path).unwrap()
    }

    fn run_to_result(
        engine: &IngestionEngine,
        max_sensor_id: u32,
    ) -> (
        Vec<Vec<SensorEvent>>,
        AttributionFailureBucket,
        IngestionStatistics,
    ) {
        aggregate::merge(engine.run(None).unwrap(), max_sensor_id)
    }

    #[test]
    fn test_round_trip_all_good() {
        let records: Vec<(u32, u32)> = (0..100).map(|i| (i * 10, i % 8)).collect();
        let file = write_event_file(&records);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let engine = IngestionEngine::new(
            open_events(file.path()),
            &timeline,
            &map,
            7,
            IngestOptions::default(),
        );
        let (events, bucket, stats) = run_to_result(&engine, 7);

        assert_eq!(stats.good_events, 100);
        assert_eq!(stats.error_events, 0);
        assert_eq!(stats.total_processed(), 100);
        assert!(bucket.is_empty());
        assert_eq!(events.iter().map(Vec::len).sum::<usize>(), 100);
        // tick-to-microsecond conversion applied once per event
        assert_eq!(stats.shortest_tof, 0.0);
        assert_eq!(stats.longest_tof, 99.0);
    }

    #[test]
    fn test_error_bit_counted_and_skipped() {
        let file = write_event_file(&[
            (10, 1),
            (20, 2 | ERROR_ID_MASK),
            (30, 3),
            (40, ERROR_ID_MASK),
        ]);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let engine = IngestionEngine::new(
            open_events(file.path()),
            &timeline,
            &map,
            10,
            IngestOptions::default(),
        );
        let (events, bucket, stats) = run_to_result(&engine, 10);

        assert_eq!(stats.good_events, 2);
        assert_eq!(stats.bad_events, 2);
        assert_eq!(stats.error_events, 2);
        assert_eq!(stats.total_processed(), 4);
        assert!(bucket.is_empty());
        assert_eq!(events[1].len(), 1);
        assert_eq!(events[3].len(), 1);
    }

    #[test]
    fn test_unattributable_routed_to_bucket() {
        let file = write_event_file(&[(10, 1), (20, 50), (30, 50), (40, 2)]);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let engine = IngestionEngine::new(
            open_events(file.path()),
            &timeline,
            &map,
            10,
            IngestOptions::default(),
        );
        let (events, bucket, stats) = run_to_result(&engine, 10);

        assert_eq!(stats.good_events, 2);
        assert_eq!(stats.unattributable_events, 2);
        assert_eq!(stats.error_events, 2);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[&50].len(), 2);
        // the bad id's events never leak into the sensor lists
        assert_eq!(events.iter().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn test_monitor_id_remapped() {
        let file = write_event_file(&[(10, MONITOR_RAW_ID)]);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let engine = IngestionEngine::new(
            open_events(file.path()),
            &timeline,
            &map,
            MONITOR_SENSOR_ID,
            IngestOptions::default(),
        );
        let (events, bucket, stats) = run_to_result(&engine, MONITOR_SENSOR_ID);

        assert_eq!(stats.good_events, 1);
        assert!(bucket.is_empty());
        assert_eq!(events[MONITOR_SENSOR_ID as usize].len(), 1);
    }

    #[test]
    fn test_monitor_id_bypasses_sensor_map() {
        // The monitor's raw id must not be folded through the map table
        let mut map_file = tempfile::NamedTempFile::new().unwrap();
        for entry in [3u32, 2, 1, 0] {
            map_file.write_u32::<NativeEndian>(entry).unwrap();
        }
        map_file.flush().unwrap();
        let map = SensorIdMap::load(Some(map_file.path()));
        assert!(map.is_using_mapping());

        let file = write_event_file(&[(10, MONITOR_RAW_ID), (20, 1)]);
        let timeline = PulseTimeline::absent();
        let engine = IngestionEngine::new(
            open_events(file.path()),
            &timeline,
            &map,
            MONITOR_SENSOR_ID,
            IngestOptions::default(),
        );
        let (events, bucket, stats) = run_to_result(&engine, MONITOR_SENSOR_ID);

        assert_eq!(stats.good_events, 2);
        assert!(bucket.is_empty());
        assert_eq!(events[MONITOR_SENSOR_ID as usize].len(), 1);
        // the ordinary event still went through the map (1 -> 2)
        assert_eq!(events[2].len(), 1);
    }

    #[test]
    fn test_dropped_status_receiver_does_not_fail_run() {
        let records: Vec<(u32, u32)> = (0..100).map(|i| (i, 0)).collect();
        let file = write_event_file(&records);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let options = IngestOptions {
            block_size: 16,
            ..Default::default()
        };
        let engine = IngestionEngine::new(open_events(file.path()), &timeline, &map, 0, options);

        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        let (_, _, stats) = aggregate::merge(engine.run(Some(tx)).unwrap(), 0);
        assert_eq!(stats.good_events, 100);
    }

    #[test]
    fn test_selection_filter_counts_ignored() {
        let records: Vec<(u32, u32)> = (0..20).map(|i| (i, i % 4)).collect();
        let file = write_event_file(&records);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let options = IngestOptions {
            selected_sensor_ids: Some(vec![3, 1]),
            ..Default::default()
        };
        let engine =
            IngestionEngine::new(open_events(file.path()), &timeline, &map, 10, options);
        let (events, _, stats) = run_to_result(&engine, 10);

        assert_eq!(stats.good_events, 10);
        assert_eq!(stats.ignored_events, 10);
        assert_eq!(stats.total_processed(), 20);
        assert!(events[0].is_empty());
        assert_eq!(events[1].len(), 5);
        assert_eq!(events[3].len(), 5);
    }

    #[test]
    fn test_max_events_override() {
        let records: Vec<(u32, u32)> = (0..50).map(|i| (i, 0)).collect();
        let file = write_event_file(&records);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();
        let options = IngestOptions {
            max_events_override: Some(30),
            ..Default::default()
        };
        let engine = IngestionEngine::new(open_events(file.path()), &timeline, &map, 0, options);
        let (_, _, stats) = run_to_result(&engine, 0);
        assert_eq!(stats.total_processed(), 30);
    }

    #[test]
    fn test_chunks_partition_the_file() {
        let records: Vec<(u32, u32)> = (0..103).map(|i| (i, i % 5)).collect();
        let file = write_event_file(&records);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();

        let mut total = 0;
        let mut seen_tofs: Vec<u64> = Vec::new();
        for chunk_index in 0..4 {
            let options = IngestOptions {
                chunk: Some((chunk_index, 4)),
                block_size: 16,
                ..Default::default()
            };
            let engine =
                IngestionEngine::new(open_events(file.path()), &timeline, &map, 4, options);
            let (events, _, stats) = run_to_result(&engine, 4);
            total += stats.total_processed();
            for list in &events {
                seen_tofs.extend(list.iter().map(|e| (e.tof * 10.0).round() as u64));
            }
        }
        // every record lands in exactly one chunk
        assert_eq!(total, 103);
        seen_tofs.sort_unstable();
        assert_eq!(seen_tofs, (0..103u64).collect::<Vec<u64>>());
    }

    #[test]
    fn test_serial_and_parallel_agree() {
        // ids cycle over the sensor range, with some errors and strays mixed in
        let records: Vec<(u32, u32)> = (0..500)
            .map(|i| {
                if i % 31 == 0 {
                    (i, i % 7 | ERROR_ID_MASK)
                } else if i % 17 == 0 {
                    (i, 1000 + i % 3)
                } else {
                    (i, i % 7)
                }
            })
            .collect();
        let file = write_event_file(&records);
        let timeline = PulseTimeline::absent();
        let map = SensorIdMap::identity();

        let run = |parallelism: Parallelism| {
            let options = IngestOptions {
                parallelism,
                block_size: 16,
                ..Default::default()
            };
            let engine =
                IngestionEngine::new(open_events(file.path()), &timeline, &map, 6, options);
            run_to_result(&engine, 6)
        };

        let (serial_events, serial_bucket, serial_stats) = run(Parallelism::Serial);
        let (parallel_events, parallel_bucket, parallel_stats) = run(Parallelism::Parallel);

        assert_eq!(serial_stats, parallel_stats);
        // per-sensor multisets match even though merge order may differ
        for sensor in 0..serial_events.len() {
            let mut a: Vec<f64> = serial_events[sensor].iter().map(|e| e.tof).collect();
            let mut b: Vec<f64> = parallel_events[sensor].iter().map(|e| e.tof).collect();
            a.sort_by(f64::total_cmp);
            b.sort_by(f64::total_cmp);
            assert_eq!(a, b, "sensor {sensor}");
        }
        assert_eq!(serial_bucket.len(), parallel_bucket.len());
        for (id, list) in &serial_bucket {
            let mut a: Vec<f64> = list.iter().map(|e| e.tof).collect();
            let mut b: Vec<f64> = parallel_bucket[id].iter().map(|e| e.tof).collect();
            a.sort_by(f64::total_cmp);
            b.sort_by(f64::total_cmp);
            assert_eq!(a, b, "stray id {id}");
        }
    }

    #[test]
    fn test_pulse_attribution_across_blocks() {
        // pulses at event indices 0, 100, 250 over 300 records
        let mut pulse_file = tempfile::NamedTempFile::new().unwrap();
        for (seconds, index) in [(10u32, 0u64), (20, 100), (30, 250)] {
            pulse_file.write_u32::<NativeEndian>(0).unwrap();
            pulse_file.write_u32::<NativeEndian>(seconds).unwrap();
            pulse_file.write_u64::<NativeEndian>(index).unwrap();
            pulse_file.write_f64::<NativeEndian>(0.0).unwrap();
        }
        pulse_file.flush().unwrap();
        let timeline = PulseTimeline::load(Some(pulse_file.path()), true).unwrap();

        let records: Vec<(u32, u32)> = (0..300).map(|i| (i, 0)).collect();
        let file = write_event_file(&records);
        let map = SensorIdMap::identity();
        let options = IngestOptions {
            block_size: 64, // force several blocks, each with its own cursor
            ..Default::default()
        };
        let engine = IngestionEngine::new(open_events(file.path()), &timeline, &map, 0, options);
        let (events, _, stats) = run_to_result(&engine, 0);

        assert_eq!(stats.good_events, 300);
        let t = [
            timeline.pulse_time(0).unwrap(),
            timeline.pulse_time(1).unwrap(),
            timeline.pulse_time(2).unwrap(),
        ];
        for event in &events[0] {
            // recover the global offset from the tof (offset * 0.1)
            let offset = (event.tof * 10.0).round() as u64;
            let expected = if offset < 100 {
                t[0]
            } else if offset < 250 {
                t[1]
            } else {
                t[2]
            };
            assert_eq!(event.pulse_time, expected, "offset {offset}");
        }
    }
}
