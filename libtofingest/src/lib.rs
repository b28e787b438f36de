//! # tofingest
//!
//! tofingest is the acquisition-to-analysis ingestion engine for pre-processed
//! detector hit streams. It takes the raw binary files produced by the data
//! acquisition (an event file of fixed 8-byte hit records, an optional pulse
//! file carrying the accelerator timing frames, and an optional sensor id
//! mapping file) and reconstructs them into per-sensor event lists annotated
//! with absolute pulse times, plus run-level statistics.
//!
//! ## Input files
//!
//! - **Event file** (required): flat native-endian records of
//!   `{u32 time_offset, u32 raw_sensor_id}`. The byte length must be an exact
//!   multiple of 8 or the file is rejected before any decoding.
//! - **Pulse file** (optional): flat native-endian records of
//!   `{u32 nanoseconds, u32 seconds, u64 event_index_start, f64 charge}`,
//!   one per accelerator pulse. Pulse indices written by a vetoed pulse carry
//!   a high flag bit that is masked off before use.
//! - **Sensor map file** (optional): flat array of u32 logical ids indexed by
//!   raw id. A malformed map degrades to the identity mapping with a warning;
//!   it never fails the run.
//!
//! ## Processing model
//!
//! The event file is partitioned into fixed-size blocks and decoded by a
//! bounded worker pool. Each worker owns private per-sensor buffers, a
//! private failure bucket for events on unknown sensor ids, and private
//! statistics; a single merge step combines everything after all workers
//! finish. Running serially is the same code path with one worker and yields
//! the same event multisets and statistics.
//!
//! ## Configuration
//!
//! Runs are configured with a YAML file (see [`config::Config`]):
//!
//! ```yml
//! event_file_path: /data/run_0042_event.dat
//! pulse_file_path: /data/run_0042_pulseid.dat
//! sensor_map_path: null
//! max_sensor_id: 65535
//! require_pulse_file: false
//! chunk_index: null
//! total_chunks: null
//! selected_sensor_ids: null
//! parallelism: auto
//! max_events_override: null
//! summary_path: null
//! ```
//!
//! The CLI (`tofingest_cli`) wraps [`process::run_ingestion`] with a progress
//! bar and terminal logging; see its README for usage.
pub mod aggregate;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod event_list;
pub mod process;
pub mod pulse_timeline;
pub mod record_file;
pub mod sensor_map;
pub mod worker_status;
