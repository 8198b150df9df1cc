//! Wear Sensor Agent CLI
//!
//! Scores stress, tension and activity from wearable sensor readings.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use wear_sensor_agent::{
    bias::{BiasSource, FileBiasSource, StaticBiasSource},
    collector::{Collector, CollectorConfig, ReplaySource},
    config::Config,
    pipeline::Pipeline,
    sink::{FanoutSink, JsonlSink, LogSink, ScoreSink},
    stats::PipelineStats,
    VERSION,
};

#[cfg(feature = "remote")]
use wear_sensor_agent::{RemoteClient, RemoteConfig};

#[derive(Parser)]
#[command(name = "wear-sensor")]
#[command(version = VERSION)]
#[command(about = "Scores wellness from wearable sensor readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent and its publish loop
    Start(StartArgs),

    /// Stop publishing in a running agent
    Stop,

    /// Resume publishing in a running agent
    Resume,

    /// Show current status and cumulative statistics
    Status,

    /// Show configuration
    Config,
}

#[derive(clap::Args)]
struct StartArgs {
    /// JSON Lines file of sensor readings, or `-` for standard input
    #[arg(long)]
    input: Option<String>,

    /// Sensors to accept (comma-separated keys, or all). Defaults to the config file.
    #[arg(long)]
    sensors: Option<String>,

    /// Replay readings with their recorded spacing
    #[arg(long)]
    realtime: bool,

    /// JSON file holding the bias object, re-read every tick
    #[arg(long)]
    bias_file: Option<PathBuf>,

    /// Publish to the remote store (requires remote feature)
    #[arg(long)]
    remote: bool,

    /// Remote store base URL (overrides the config file)
    #[arg(long)]
    remote_url: Option<String>,

    /// Remote store auth token (overrides the config file)
    #[arg(long)]
    remote_token: Option<String>,

    /// JSON Lines file to append score records to
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Publish interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Serve the HTTP control API on this port (requires server feature)
    #[arg(long)]
    serve_port: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wear_sensor_agent=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            cmd_start(args);
        }
        Commands::Stop => {
            cmd_set_paused(true);
        }
        Commands::Resume => {
            cmd_set_paused(false);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn cmd_start(args: StartArgs) {
    println!("Wear Sensor Agent v{VERSION}");
    println!();

    // Load or create configuration
    let mut config = Config::load().unwrap_or_default();
    let sensors = config.sensors_for(args.sensors.as_deref());
    if !sensors.any_enabled() {
        eprintln!("Error: At least one sensor must be enabled");
        std::process::exit(1);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    if let Some(tick_ms) = args.tick_ms {
        config.pipeline = config
            .pipeline
            .with_tick_interval(Duration::from_millis(tick_ms));
    }
    let timezone = match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create async runtime: {e}");
            std::process::exit(1);
        }
    };

    println!("Starting agent...");
    println!(
        "  Sensors: {}",
        sensors
            .enabled
            .iter()
            .map(|kind| kind.key())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Tick interval: {}ms",
        config.pipeline.tick_interval.as_millis()
    );
    println!("  Timezone: {timezone}");

    // Sinks
    let output_path = args.output.clone().unwrap_or_else(|| {
        config.export_path.join(format!(
            "records_{}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    println!("  Records file: {output_path:?}");
    #[cfg_attr(not(feature = "remote"), allow(unused_mut))]
    let mut sink = FanoutSink::new()
        .with(Arc::new(LogSink))
        .with(Arc::new(JsonlSink::new(output_path)));

    // Bias source
    #[cfg_attr(not(feature = "remote"), allow(unused_mut))]
    let mut bias_source: Arc<dyn BiasSource> = match &args.bias_file {
        Some(path) => {
            println!("  Bias file: {path:?}");
            Arc::new(FileBiasSource::new(path.clone(), config.bias_keys.clone()))
        }
        None => Arc::new(StaticBiasSource::zero()),
    };

    #[cfg(feature = "remote")]
    if args.remote {
        match create_remote_client(&config, args.remote_url.clone(), args.remote_token.clone()) {
            Ok(client) => {
                let client = Arc::new(client);
                println!("  Remote store: {}", client.config().base_url);
                match runtime.block_on(client.health()) {
                    Ok(true) => println!("  Remote connection: OK"),
                    Ok(false) => eprintln!("Warning: Remote health check failed"),
                    Err(e) => eprintln!("Warning: Could not connect to remote store: {e}"),
                }
                if args.bias_file.is_none() {
                    bias_source = client.clone() as Arc<dyn BiasSource>;
                }
                sink = sink.with(client);
            }
            Err(e) => {
                eprintln!("Warning: Remote store initialization failed: {e}");
                eprintln!("Continuing without remote publishing.");
            }
        }
    } else {
        println!("  Remote store: disabled");
    }

    #[cfg(not(feature = "remote"))]
    if args.remote || args.remote_url.is_some() || args.remote_token.is_some() {
        eprintln!("Warning: --remote flags ignored (remote feature not enabled at compile time)");
    }

    let stats = Arc::new(PipelineStats::persistent(config.data_path.join("stats.json")));

    let pipeline = Arc::new(
        Pipeline::builder()
            .config(config.pipeline)
            .sensors(sensors.clone())
            .bias_source(bias_source)
            .sink(Arc::new(sink) as Arc<dyn ScoreSink>)
            .stats(stats.clone())
            .timezone(timezone)
            .build(runtime.handle().clone()),
    );
    println!("  Device ID: {}", pipeline.device_id());

    #[cfg(feature = "server")]
    let server_shutdown = args.serve_port.and_then(|port| {
        let config = wear_sensor_agent::server::ServerConfig::new(port);
        match runtime.block_on(wear_sensor_agent::server::run(config, pipeline.clone())) {
            Ok((addr, shutdown)) => {
                println!("  Control API: http://{addr}");
                Some(shutdown)
            }
            Err(e) => {
                eprintln!("Warning: Could not start control API: {e}");
                None
            }
        }
    });

    #[cfg(not(feature = "server"))]
    if args.serve_port.is_some() {
        eprintln!("Warning: --serve-port ignored (server feature not enabled at compile time)");
    }

    // Readings come from stdin unless a file is given or the control API feeds them.
    let input = match (&args.input, args.serve_port) {
        (Some(input), _) => Some(ReplaySource::from_arg(input)),
        (None, None) => Some(ReplaySource::Stdin),
        (None, Some(_)) => None,
    };

    let mut collector = input.map(|source| {
        Collector::new(CollectorConfig {
            source,
            sensors,
            realtime: args.realtime,
        })
    });
    if let Some(ref mut collector) = collector {
        if let Err(e) = collector.start() {
            eprintln!("Error starting collector: {e}");
            std::process::exit(1);
        }
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    if let Err(e) = ctrlc_handler(running.clone()) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    // Support stop/resume from another process by polling the config file.
    let mut paused = config.paused;
    let mut last_config_check = Instant::now();

    if paused {
        println!("Publishing is currently stopped.");
        println!("Run `wear-sensor resume` to start publishing.");
        println!();
    } else {
        pipeline.start();
    }

    let receiver = collector.as_ref().map(|c| c.receiver().clone());
    let mut input_exhausted = false;

    while running.load(Ordering::SeqCst) {
        // Periodically reload config so `wear-sensor stop/resume` can control a running agent.
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;

                    if paused {
                        println!();
                        println!("Stopping publish loop...");
                        pipeline.stop();
                    } else {
                        println!();
                        println!("Resuming publish loop...");
                        pipeline.start();
                    }
                }
            }
            last_config_check = Instant::now();
        }

        let Some(ref receiver) = receiver else {
            thread::sleep(Duration::from_millis(100));
            continue;
        };

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(reading) => {
                pipeline.handle_reading(&reading);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                let finished = collector.as_ref().is_some_and(|c| !c.is_running());
                if finished && !input_exhausted {
                    input_exhausted = true;
                    println!("Input exhausted; publishing continues until Ctrl+C.");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Collector disconnected unexpectedly");
                break;
            }
        }
    }

    println!();
    println!("Stopping agent...");
    if let Some(ref mut collector) = collector {
        if collector.skipped() > 0 {
            println!("Skipped {} malformed input line(s)", collector.skipped());
        }
        collector.stop();
    }
    pipeline.stop();

    #[cfg(feature = "server")]
    if let Some(shutdown) = server_shutdown {
        let _ = shutdown.send(());
    }

    // Let in-flight publishes and the stop notice land.
    runtime.block_on(tokio::time::sleep(Duration::from_millis(500)));

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

fn cmd_set_paused(paused: bool) {
    let mut config = Config::load().unwrap_or_default();
    config.paused = paused;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    if paused {
        println!("Publishing stopped. Use 'wear-sensor resume' to continue.");
    } else {
        println!("Publishing resumed.");
    }
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Wear Sensor Agent Status");
    println!("========================");
    println!();

    println!("Configuration:");
    println!(
        "  Sensors: {}",
        config
            .sensors
            .enabled
            .iter()
            .map(|kind| kind.key())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Tick interval: {}ms",
        config.pipeline.tick_interval.as_millis()
    );
    println!("  Timezone: {}", config.timezone);
    println!(
        "  Remote store: {}",
        config
            .remote
            .as_ref()
            .map(|remote| remote.base_url.as_str())
            .unwrap_or("not configured")
    );
    println!("  Stopped: {}", config.paused);
    println!();

    let stats_path = config.data_path.join("stats.json");
    if stats_path.exists() {
        let stats = PipelineStats::persistent(stats_path).snapshot();
        println!("Cumulative Statistics:");
        println!("  Sensor readings: {}", stats.readings_received);
        println!("  Publish ticks: {}", stats.ticks);
        println!("  Records published: {}", stats.records_published);
        println!("  Publish failures: {}", stats.publish_failures);
        println!("  Zero-bias fallbacks: {}", stats.bias_fallbacks);
        println!("  Pipeline starts: {}", stats.starts);
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
}

/// Create the remote client from CLI args, falling back to the config file.
#[cfg(feature = "remote")]
fn create_remote_client(
    config: &Config,
    url: Option<String>,
    token: Option<String>,
) -> Result<RemoteClient, wear_sensor_agent::RemoteError> {
    let remote = match (url, config.remote.clone()) {
        (Some(url), Some(existing)) => RemoteConfig {
            base_url: url.trim_end_matches('/').to_string(),
            ..existing
        },
        (Some(url), None) => RemoteConfig::new(url),
        (None, Some(existing)) => existing,
        (None, None) => {
            return Err(wear_sensor_agent::RemoteError::Config(
                "No remote store configured; pass --remote-url".to_string(),
            ))
        }
    };

    let remote = match token {
        Some(token) => remote.with_token(token),
        None => remote,
    };

    RemoteClient::new(remote, config.bias_keys.clone())
}
