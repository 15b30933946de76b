//! Store inspection CLI.
//!
//! # Responsibility
//! - Open stores described by a config file and print per-entity counts.
//! - Flush every opened store before exiting.
//!
//! Usage: `lodestore <config.json> [store...]`. Without store names, every
//! schema found in `schema_dir` is opened.

use lodestore_core::{init_from_config, LifecycleEvent, LodestoreConfig, StoreRegistry};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("usage: lodestore <config.json> [store...]");
        return ExitCode::from(2);
    };
    let requested: Vec<String> = args.collect();

    match run(&config_path, requested) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("lodestore: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str, requested: Vec<String>) -> Result<(), String> {
    let config = LodestoreConfig::from_file(config_path).map_err(|err| err.to_string())?;
    init_from_config(&config).map_err(|err| err.to_string())?;
    info!(
        "event=cli_start module=cli status=ok version={}",
        lodestore_core::core_version()
    );

    let names = if requested.is_empty() {
        config
            .bootstrap()
            .discover()
            .map_err(|err| format!("cannot list `{}`: {err}", config.schema_dir.display()))?
    } else {
        requested
    };

    let registry = StoreRegistry::from_config(&config);
    let mut failed = false;
    for name in &names {
        let report = registry
            .store(name)
            .and_then(|store| store.collection_counts().map(|counts| (store, counts)));
        match report {
            Ok((store, counts)) => {
                println!(
                    "{name} debounce_ms={}",
                    store.debounce_window().as_millis()
                );
                for (entity_type, count) in counts {
                    println!("  {entity_type} {count}");
                }
            }
            Err(err) => {
                failed = true;
                eprintln!("{name} error[{}]: {err}", err.code());
            }
        }
    }

    registry
        .notify(LifecycleEvent::WillTerminate)
        .map_err(|err| err.to_string())?;
    if failed {
        return Err("one or more stores failed to open".to_string());
    }
    Ok(())
}
