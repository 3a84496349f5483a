use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use common::DeviceFactory;
use device_simulator::{ElementaryStreamMuxerFactory, SimulatedDeviceFactory};
use encode_runner::config::{ConfigManager, EnvConfigOverride};
use encode_runner::driver::CodecDriver;
use encode_runner::dynamic::DynamicEventScheduler;
use encode_runner::runner::run_test;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

fn cli() -> Command {
    Command::new("encode-runner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Hardware video encoder test harness")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run the tests of a configuration file")
                .arg(config_arg())
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Override the output directory"),
                )
                .arg(
                    Arg::new("codec")
                        .long("codec")
                        .value_name("CODEC")
                        .help("Only run tests whose codec contains this text"),
                ),
        )
        .subcommand(Command::new("codecs").about("List available encoders"))
        .subcommand(
            Command::new("schedule")
                .about("Parse a dynamic event script and print the schedule")
                .arg(
                    Arg::new("script")
                        .required(true)
                        .value_name("SCRIPT")
                        .help("Events such as fps-30-15:bit-60-500:key-90"),
                ),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write a default configuration file")
                .arg(config_arg())
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .default_value("encode-runner.toml")
        .help("Configuration file")
}

fn init_logging(default_level: &str) {
    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("codecs", _)) => {
            init_logging("info");
            list_codecs();
            Ok(())
        }
        Some(("schedule", args)) => {
            init_logging("info");
            print_schedule(args);
            Ok(())
        }
        Some(("init-config", args)) => {
            init_logging("info");
            init_config(args).await
        }
        _ => Ok(()),
    }
}

async fn run(args: &ArgMatches) -> Result<()> {
    let config_path = config_path(args);
    let mut manager = ConfigManager::new(config_path.clone());
    manager
        .load()
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut config = manager.get_config().clone();
    EnvConfigOverride::apply_overrides(&mut config);
    if let Some(dir) = args.get_one::<String>("output-dir") {
        config.output.directory = PathBuf::from(dir);
    }
    manager.update_config(config.clone())?;

    init_logging(&config.logging.level);
    info!("🎬 Encode runner starting...");
    info!("✓ Configuration loaded from {}", config_path.display());
    info!("  Output directory: {}", config.output.directory.display());

    let filter = args.get_one::<String>("codec").map(|c| c.to_lowercase());
    let tests: Vec<_> = config
        .tests
        .iter()
        .filter(|test| {
            filter
                .as_ref()
                .map_or(true, |f| test.configure.codec.to_lowercase().contains(f))
        })
        .cloned()
        .collect();
    if tests.is_empty() {
        warn!("⚠️  No tests to run");
        return Ok(());
    }
    info!("✓ {} test(s) selected", tests.len());

    let mut driver = CodecDriver::new(
        Arc::new(SimulatedDeviceFactory::new()),
        Arc::new(ElementaryStreamMuxerFactory),
        config.driver.clone(),
    );

    let stop = driver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current session");
            stop.request_stop();
        }
    });

    let output_dir = config.output.directory.clone();
    let failures = tokio::task::spawn_blocking(move || {
        let mut failures = 0usize;
        for test in &tests {
            match run_test(&mut driver, test, &output_dir) {
                Ok(outcome) => info!(
                    "✅ {}: {} encoded, {} skipped -> {}",
                    outcome.title,
                    outcome.summary.frames_encoded,
                    outcome.summary.frames_skipped,
                    outcome.report_path.display()
                ),
                Err(e) => {
                    error!("❌ {}: {}", test.title(), e);
                    failures += 1;
                }
            }
            if driver.stop_handle().is_stop_requested() {
                break;
            }
        }
        failures
    })
    .await?;

    if failures > 0 {
        anyhow::bail!("{} test(s) failed", failures);
    }
    info!("✅ All tests finished");
    Ok(())
}

fn list_codecs() {
    let devices = SimulatedDeviceFactory::new();
    for codec in devices.codec_infos() {
        println!("{}\t{}", codec.name, codec.mime);
    }
}

fn print_schedule(args: &ArgMatches) {
    let script = args
        .get_one::<String>("script")
        .map(String::as_str)
        .unwrap_or_default();
    let scheduler = DynamicEventScheduler::parse(script);
    for event in scheduler.events() {
        println!("{}\t{:?}", event, event.to_change());
    }
}

async fn init_config(args: &ArgMatches) -> Result<()> {
    let path = config_path(args);
    if path.exists() && !args.get_flag("force") {
        anyhow::bail!("{} already exists, use --force to overwrite", path.display());
    }
    ConfigManager::new(path.clone()).save().await?;
    info!("✓ Default configuration written to {}", path.display());
    Ok(())
}

fn config_path(args: &ArgMatches) -> PathBuf {
    args.get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("encode-runner.toml"))
}
