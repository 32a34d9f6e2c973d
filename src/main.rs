use anyhow::{Context, Result};
use clap::Parser;
use firewatch::camera::{create_backend, DeviceRegistry};
use firewatch::{FirewatchApp, FirewatchConfig};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "firewatch")]
#[command(about = "Stream a live camera feed to a fire and smoke annotation service")]
#[command(version)]
#[command(long_about = "Captures frames from a local camera, throttles them to the processing \
rate, sends them as JPEG data URLs over a websocket to the annotation service, and renders \
the returned detections as an overlay on the framebuffer. Alerts are spoken aloud when \
voice alerts are enabled.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "firewatch.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, value_name = "DIR", help = "Also write daily rolling log files to DIR")]
    log_dir: Option<String>,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[arg(long, help = "Validate configuration file and exit without starting")]
    validate_config: bool,

    #[arg(long, help = "List available cameras and exit")]
    list_cameras: bool,

    #[arg(long, value_name = "ID", help = "Camera device to use instead of automatic selection")]
    device: Option<String>,

    #[arg(long, value_name = "N", help = "Frames per second sent for annotation (1-5)")]
    processing_fps: Option<u32>,

    #[arg(long, value_name = "URL", help = "Annotation service websocket endpoint")]
    endpoint: Option<String>,

    #[arg(long, help = "Render to memory instead of the framebuffer")]
    headless: bool,

    #[arg(long, help = "Wait for a start command instead of streaming immediately")]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting Firewatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = FirewatchConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    apply_overrides(&mut config, &args);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    if args.list_cameras {
        return list_cameras(&config).await;
    }

    let mut app = FirewatchApp::new(config).context("Failed to assemble the stream controller")?;

    app.start(!args.no_autostart)
        .await
        .context("Failed to start Firewatch")?;

    let exit_code = app.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Firewatch exited with code: {}", exit_code);

    drop(log_guard);
    std::process::exit(exit_code);
}

fn apply_overrides(config: &mut FirewatchConfig, args: &Args) {
    if let Some(device) = &args.device {
        config.camera.device_id = Some(device.clone());
    }
    if let Some(fps) = args.processing_fps {
        config.sampler.processing_fps = fps;
    }
    if let Some(endpoint) = &args.endpoint {
        config.transport.endpoint = endpoint.clone();
    }
    if args.headless {
        config.display.headless = true;
    }
}

async fn list_cameras(config: &FirewatchConfig) -> Result<()> {
    let backend = create_backend(&config.camera)?;
    let registry = DeviceRegistry::new(backend);

    match registry.list().await {
        Ok(devices) if devices.is_empty() => println!("No cameras found"),
        Ok(devices) => {
            for device in devices {
                println!("{}\t{}", device.id, device.label);
            }
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("firewatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "firewatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Firewatch Configuration File");
    println!("# Every section can be overridden with FIREWATCH_<SECTION>__<KEY> variables");
    println!();
    println!("{}", toml::to_string_pretty(&FirewatchConfig::default())?);
    Ok(())
}
