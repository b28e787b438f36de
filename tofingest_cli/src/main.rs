use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use libtofingest::config::Config;
use libtofingest::process::run_ingestion;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("tofingest_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );

        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Event Path: {}", config.event_file_path.to_string_lossy());
    log::info!("Pulse Path: {:?}", config.pulse_file_path);
    log::info!("Sensor Map Path: {:?}", config.sensor_map_path);
    log::info!("Max Sensor Id: {}", config.max_sensor_id);
    log::info!("Parallelism: {:?}", config.parallelism);

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let (tx, rx) = channel();
    // Spawn the task!
    let handle = std::thread::spawn(move || run_ingestion(&config, Some(tx)));

    // Drain status messages until the workers drop their senders, then block
    // on the join while the merge and sort finish up
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(status) => pb.set_position((status.progress * 100.0) as u64),
            Err(RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(result) => log::info!(
                "Successfully ingested {} events across {} sensors!",
                result.total_events(),
                result.events.iter().filter(|list| !list.is_empty()).count()
            ),
            Err(e) => log::error!("Ingestion failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join ingestion task!"),
    }

    pb.finish();

    log::info!("Done.");
}
