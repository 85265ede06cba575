//! BPM Listener - live microphone tempo detection
//!
//! Command-line front end: runs one listening session and prints the result.

use anyhow::Result;
use bpm_listener::{
    ChainMode, CpalPlatform, OnsetEngineFactory, SessionConfig, SessionHandle, SessionState,
    SessionStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info};

/// Options parsed from the command line
#[derive(Debug, Default)]
struct CliOptions {
    device: Option<String>,
    timeout_ms: Option<u64>,
    threshold: Option<u32>,
    direct: bool,
    config_path: Option<PathBuf>,
    json: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bpm_listener=info".parse()?)
                .add_directive("bpm_listener_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_devices();
                return Ok(());
            }
            "--version" | "-v" => {
                println!(
                    "bpm-listener {} (built {})",
                    bpm_listener::VERSION,
                    bpm_listener::BUILD_DATE
                );
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--direct" => options.direct = true,
            "--json" => options.json = true,
            "--device" | "-d" | "--timeout" | "-t" | "--threshold" | "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", args[i]);
                    return Ok(());
                };
                if let Err(message) = apply_value(&mut options, &args[i], value) {
                    eprintln!("Error: {}", message);
                    return Ok(());
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let config = build_config(&options);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(listen(config, options.json))
}

fn apply_value(options: &mut CliOptions, flag: &str, value: &str) -> Result<(), String> {
    match flag {
        "--device" | "-d" => options.device = Some(value.to_string()),
        "--timeout" | "-t" => {
            options.timeout_ms = Some(
                value
                    .parse()
                    .map_err(|_| format!("Invalid timeout: {}", value))?,
            )
        }
        "--threshold" => {
            options.threshold = Some(
                value
                    .parse()
                    .map_err(|_| format!("Invalid threshold: {}", value))?,
            )
        }
        "--config" | "-c" => options.config_path = Some(PathBuf::from(value)),
        _ => return Err(format!("Unknown argument: {}", flag)),
    }
    Ok(())
}

/// Config file values overridden by command-line flags
fn build_config(options: &CliOptions) -> SessionConfig {
    let mut config = match &options.config_path {
        Some(path) => SessionConfig::load(path),
        None => SessionConfig::default(),
    };
    if let Some(device) = &options.device {
        config.device = Some(device.clone());
    }
    if let Some(timeout_ms) = options.timeout_ms {
        config.detection_timeout_ms = timeout_ms;
    }
    if let Some(threshold) = options.threshold {
        config.confidence_threshold = threshold;
    }
    if options.direct {
        config.preprocessing = ChainMode::Direct;
    }
    config
}

fn print_help() {
    println!("Usage: bpm-listener [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list              List available input devices");
    println!("  -d, --device NAME       Listen on the named input device");
    println!("  -t, --timeout MS        Give up after MS milliseconds (default: 15000)");
    println!("      --threshold N       Support count for early acceptance (default: 5)");
    println!("      --direct            Skip the preprocessing chain");
    println!("  -c, --config PATH       Load settings from a JSON config file");
    println!("      --json              Print state changes as JSON lines");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  bpm-listener");
    println!("  bpm-listener -d \"USB Audio\" -t 20000");
}

fn list_devices() {
    println!("Scanning for input devices...");
    println!();

    match CpalPlatform::list_input_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No input devices found.");
        }
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            println!();
            for (i, device) in devices.iter().enumerate() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}. {}{}", i + 1, device.name, default_marker);
                println!("     Channels: {}", device.channels);
                if !device.sample_rates.is_empty() {
                    println!("     Sample rates: {:?}", device.sample_rates);
                }
                println!();
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
        }
    }
}

fn print_json(state: &SessionState) {
    let line = serde_json::json!({
        "time": chrono::Local::now().to_rfc3339(),
        "state": state,
    });
    println!("{}", line);
}

async fn listen(config: SessionConfig, json: bool) -> Result<()> {
    let device = config.device.clone();
    let handle = SessionHandle::spawn(
        move || {
            let platform = match device {
                Some(name) => CpalPlatform::with_device(name),
                None => CpalPlatform::new(),
            };
            Ok((platform, OnsetEngineFactory::new()))
        },
        config,
    )?;

    // Ctrl+C stops the session
    let interrupted = Arc::new(Notify::new());
    let notify = Arc::clone(&interrupted);
    ctrlc::set_handler(move || notify.notify_one()).ok();

    let mut states = handle.subscribe();
    let started = Instant::now();
    let state = handle.start().await?;
    if json {
        print_json(&state);
    } else if state.is_listening() {
        println!("Listening... play some music. Press Ctrl+C to stop.");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last = state;
    while last.is_listening() {
        tokio::select! {
            _ = interrupted.notified() => {
                info!("Interrupted");
                last = handle.stop().await?;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                last = states.borrow_and_update().clone();
            }
            _ = ticker.tick() => {
                if !json {
                    let level = handle
                        .level()
                        .map(|l| format!("{:>6.1} dBFS", l.peak_db()))
                        .unwrap_or_else(|| "   --- dBFS".to_string());
                    println!("  {:>4.1}s  level {}", started.elapsed().as_secs_f32(), level);
                }
                continue;
            }
        }
        if json {
            print_json(&last);
        }
    }

    if !json {
        match last.status() {
            SessionStatus::Detected => {
                if let Some(bpm) = last.bpm() {
                    println!("Detected tempo: {} BPM", bpm);
                }
            }
            SessionStatus::Error => {
                println!("Error: {}", last.error().unwrap_or("An error occurred"));
            }
            SessionStatus::Idle => println!("Stopped."),
            SessionStatus::Listening => {}
        }
    }

    handle.dispose().await?;
    Ok(())
}
