use super::engine::WorkerOutput;
use super::event_list::{AttributionFailureBucket, IngestionStatistics, SensorEvent};

/// Combine every worker's private output into the final per-sensor event
/// lists, the attribution-failure bucket, and the run statistics.
///
/// Per-sensor vectors are concatenated in worker order; bucket entries for
/// the same stray id are concatenated under that id; statistics are reduced
/// once. No event is lost or duplicated: the merge only moves buffers.
pub fn merge(
    outputs: Vec<WorkerOutput>,
    max_sensor_id: u32,
) -> (
    Vec<Vec<SensorEvent>>,
    AttributionFailureBucket,
    IngestionStatistics,
) {
    let mut events: Vec<Vec<SensorEvent>> = vec![Vec::new(); max_sensor_id as usize + 1];
    let mut bucket = AttributionFailureBucket::default();
    let mut stats = IngestionStatistics::default();

    for output in outputs {
        for (sensor, mut list) in output.events.into_iter().enumerate() {
            if !list.is_empty() {
                if events[sensor].is_empty() {
                    events[sensor] = list;
                } else {
                    events[sensor].append(&mut list);
                }
            }
        }
        for (id, mut list) in output.unattributed {
            bucket.entry(id).or_default().append(&mut list);
        }
        stats.combine(&output.stats);
    }

    (events, bucket, stats)
}

/// Sort each sensor's list by pulse time (then time-of-flight).
///
/// Only valid to apply when the pulse timeline was monotonic; the engine's
/// parallel path makes no block-order guarantee, so this post-merge sort is
/// the only ordering consumers may rely on.
pub fn sort_by_pulse_time(events: &mut [Vec<SensorEvent>]) {
    for list in events.iter_mut() {
        list.sort_unstable_by(|a, b| {
            a.pulse_time
                .cmp(&b.pulse_time)
                .then(a.tof.total_cmp(&b.tof))
        });
    }
}
