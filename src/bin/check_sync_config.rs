//! CLI tool to validate a sync configuration without contacting any server.
//!
//! Usage:
//!   cargo run --bin check-sync-config -- sync-config.json --manifest manifest.json

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use buildbot_syncer_lib::models::Manifest;
use buildbot_syncer_lib::services::buildbot::{BuildbotSyncer, load_sync_config_file};
use buildbot_syncer_lib::services::{HttpRemote, RemoteApi};

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let mut config_path: Option<PathBuf> = None;
    let mut manifest_path: Option<PathBuf> = None;
    let mut buildbot_url = "http://localhost:8010".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--manifest" | "-m" => {
                i += 1;
                if i < args.len() {
                    manifest_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--buildbot-url" | "-b" => {
                i += 1;
                if i < args.len() {
                    buildbot_url = args[i].clone();
                }
            }
            "--help" | "-h" => {
                print_usage();
                return;
            }
            arg if !arg.starts_with('-') && config_path.is_none() => {
                config_path = Some(PathBuf::from(arg));
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    // Validate required arguments
    let config_path = match config_path {
        Some(p) => p,
        None => {
            eprintln!("Error: a sync configuration path is required");
            print_usage();
            std::process::exit(1);
        }
    };

    let sync_config = match load_sync_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!();
    println!("Sync configuration is valid");
    println!("========================================");
    println!("Triggerable:   {}", sync_config.triggerable_name);
    println!("Lookback:      {}", sync_config.lookback_count);
    println!("Repo groups:   {}", sync_config.repository_groups.len());
    println!("Syncers:       {}", sync_config.syncers.len());
    println!("========================================");

    let Some(manifest_path) = manifest_path else {
        for syncer in &sync_config.syncers {
            let what = syncer
                .test_path()
                .map(|path| path.join(" > "))
                .unwrap_or_else(|| "builds".to_string());
            println!("  {} on {}: {}", syncer.builder, syncer.platform, what);
        }
        println!();
        return;
    };

    let manifest = match std::fs::read_to_string(&manifest_path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).map_err(|e| e.to_string()))
        .and_then(|value| Manifest::from_json(&value).map_err(|e| e.to_string()))
    {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: failed to load manifest {}: {}", manifest_path.display(), e);
            std::process::exit(1);
        }
    };

    let remote: Arc<dyn RemoteApi> =
        match HttpRemote::new(&buildbot_url, None, Duration::from_secs(60)) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        };

    let syncers = match BuildbotSyncer::from_sync_config(remote, &sync_config, &manifest) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: configuration does not match the manifest: {}", e);
            std::process::exit(1);
        }
    };

    for syncer in &syncers {
        println!("  {}", syncer.label());
        println!(
            "    platform {}, test {}",
            syncer.platform_id(),
            syncer
                .test_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        println!("    force: {}", syncer.path_for_force_build());
        println!("    url:   {}", syncer.url());
    }
    println!();
}

fn print_usage() {
    eprintln!();
    eprintln!("Usage: check-sync-config <path> [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -m, --manifest <FILE>      Resolve platforms and tests against a saved manifest.json");
    eprintln!("  -b, --buildbot-url <URL>   Buildbot URL used to print builder links");
    eprintln!("                             (default: http://localhost:8010)");
    eprintln!("  -h, --help                 Show this help message");
    eprintln!();
}
