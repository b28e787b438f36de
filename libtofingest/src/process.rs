use std::io::Write;
use std::path::Path;
use std::sync::mpsc::Sender;

use super::aggregate;
use super::config::Config;
use super::engine::{IngestOptions, IngestionEngine, RawEventRecord};
use super::error::IngestError;
use super::event_list::{IngestionResult, SensorEvent};
use super::pulse_timeline::PulseTimeline;
use super::record_file::RecordFile;
use super::sensor_map::SensorIdMap;
use super::worker_status::WorkerStatus;

/// The main loop of tofingest.
///
/// Takes a config (and an optional progress channel) and performs one full
/// ingestion run: load the pulse timeline, load the sensor map, open the
/// event file, correct the pulse indices, decode in blocks, merge, and sort
/// if the timeline allows it. Returns the read-only run outputs.
pub fn run_ingestion(
    config: &Config,
    tx: Option<Sender<WorkerStatus>>,
) -> Result<IngestionResult, IngestError> {
    log::info!("Loading pulse timeline...");
    let mut timeline = PulseTimeline::load(
        config.pulse_file_path.as_deref(),
        config.require_pulse_file,
    )?;
    if timeline.is_present() {
        log::info!(
            "Loaded {} pulses, total integrated charge {:.3}",
            timeline.len(),
            timeline.total_charge()
        );
        if let Some(frequency) = timeline.estimate_frequency() {
            log::info!("Estimated source frequency: {frequency:.1} Hz");
        }
    } else {
        log::info!("No pulse timeline; events will carry the epoch pulse time");
    }

    let map = SensorIdMap::load(config.sensor_map_path.as_deref());
    log::info!(
        "Sensor id map: {}",
        if map.is_using_mapping() {
            "loaded"
        } else {
            "identity"
        }
    );

    let file = RecordFile::<RawEventRecord>::open(&config.event_file_path)?;
    log::info!(
        "Event file {:?}: {} records ({})",
        file.path(),
        file.element_count(),
        human_bytes::human_bytes(file.size_bytes() as f64)
    );

    // Index correction must happen once, before any block decode, so every
    // worker sees the same corrected timeline
    timeline.correct_indices(file.element_count() as u64);

    let options = IngestOptions {
        chunk: config.chunk()?,
        selected_sensor_ids: config.selected_sensor_ids.clone(),
        parallelism: config.parallelism,
        max_events_override: config.max_events_override,
        ..Default::default()
    };
    let engine = IngestionEngine::new(file, &timeline, &map, config.max_sensor_id, options);
    let outputs = engine.run(tx)?;

    log::info!("Merging {} worker output(s)...", outputs.len());
    let (mut events, unattributed, stats) = aggregate::merge(outputs, config.max_sensor_id);

    let sorted = timeline.is_present() && timeline.is_monotonic();
    if sorted {
        aggregate::sort_by_pulse_time(&mut events);
    } else if timeline.is_present() {
        log::warn!("Pulse timeline is non-monotonic; skipping the pulse-time sort");
    }

    log::info!(
        "Read {} events -- good: {} error: {} (bad: {}, unattributable: {}) ignored: {}",
        stats.total_processed(),
        stats.good_events,
        stats.error_events,
        stats.bad_events,
        stats.unattributable_events,
        stats.ignored_events
    );
    if stats.good_events > 0 {
        log::info!(
            "Time-of-flight range: [{:.1}, {:.1}] us",
            stats.shortest_tof,
            stats.longest_tof
        );
    }
    if !unattributed.is_empty() {
        log::warn!(
            "{} events on {} unknown sensor id(s) were routed to the failure bucket",
            stats.unattributable_events,
            unattributed.len()
        );
    }

    if let Some(summary_path) = &config.summary_path {
        write_summary(summary_path, &events)?;
        log::info!("Wrote per-sensor summary to {summary_path:?}");
    }

    Ok(IngestionResult {
        events,
        unattributed,
        stats,
        corrected_pulse_indices: timeline.corrected_indices(),
        sorted_by_pulse_time: sorted,
    })
}

/// Write a CSV of logical sensor id vs event count for sensors that saw data
fn write_summary(path: &Path, events: &[Vec<SensorEvent>]) -> Result<(), IngestError> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "sensor_id,event_count")?;
    for (sensor, list) in events.iter().enumerate() {
        if !list.is_empty() {
            writeln!(file, "{sensor},{}", list.len())?;
        }
    }
    Ok(())
}
