use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use throughput_monitor::{
    Monitor, SchedulerEvent,
    config::{Config, read_config_file},
    util::get_default_port,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "throughput-monitor")]
#[command(about = "Periodic iperf3 throughput measurements per target", long_about = None)]
struct Args {
    /// Config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Measure every registered target until interrupted
    Run,

    /// Add a target or update its schedule
    Add {
        hostname: String,
        #[arg(short, long, default_value_t = get_default_port())]
        port: u16,
        /// Test duration in seconds (1-300)
        #[arg(short, long, default_value_t = 10)]
        duration: u32,
        /// Minutes between tests (1-60)
        #[arg(short, long, default_value_t = 5)]
        interval: u32,
        /// Do not check that the server answers before adding it
        #[arg(long)]
        skip_check: bool,
    },

    /// Remove a target and its results
    Remove {
        hostname: String,
        #[arg(short, long, default_value_t = get_default_port())]
        port: u16,
    },

    /// List registered targets
    List,

    /// Show stored results of a target
    Results {
        hostname: String,
        #[arg(short, long, default_value_t = get_default_port())]
        port: u16,
        /// Only the most recent N results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run a short test against a server without storing anything
    Check {
        hostname: String,
        #[arg(short, long, default_value_t = get_default_port())]
        port: u16,
    },
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("throughput_monitor", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    let monitor = Monitor::from_config(&config)
        .await
        .context("failed to open storage")?;

    let is_run = matches!(args.command, Command::Run);
    let result = match args.command {
        Command::Run => run(&monitor, &config).await,
        Command::Add {
            hostname,
            port,
            duration,
            interval,
            skip_check,
        } => add(&monitor, &hostname, port, duration, interval, skip_check).await,
        Command::Remove { hostname, port } => {
            if monitor.remove_target(&hostname, port).await? {
                println!("removed {hostname}:{port}");
            } else {
                println!("{hostname}:{port} was not registered");
            }
            Ok(())
        }
        Command::List => list(&monitor).await,
        Command::Results {
            hostname,
            port,
            limit,
        } => results(&monitor, &hostname, port, limit).await,
        Command::Check { hostname, port } => check(&monitor, &hostname, port).await,
    };

    if !is_run {
        monitor.shutdown().await?;
    }

    result
}

async fn run(monitor: &Monitor, config: &Config) -> anyhow::Result<()> {
    let seeded = monitor
        .seed(config.targets())
        .await
        .context("invalid target in config file")?;
    if seeded > 0 {
        info!("seeded {seeded} target(s) from config");
    }

    let mut events = monitor.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::Recorded { target, record }) => info!(
                    "{target}: {:.2} Mbps sent, {:.2} Mbps received",
                    record.sent_mbps, record.received_mbps
                ),
                Ok(SchedulerEvent::Failed {
                    target,
                    kind,
                    message,
                    consecutive_failures,
                    ..
                }) => warn!("{target}: {kind} ({consecutive_failures} in a row): {message}"),
                Ok(SchedulerEvent::Stopped { target }) => info!("{target}: stopped"),
                Err(RecvError::Lagged(skipped)) => warn!("skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    monitor.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    monitor.shutdown().await?;
    logger.abort();

    Ok(())
}

async fn add(
    monitor: &Monitor,
    hostname: &str,
    port: u16,
    duration: u32,
    interval: u32,
    skip_check: bool,
) -> anyhow::Result<()> {
    // Updating a known target does not need the server to be idle right now
    let known = monitor.get_target(hostname, port).await?.is_some();
    if !skip_check && !known && let Err(e) = monitor.test_reachability(hostname, port).await {
        error!("{e}");
        bail!("{hostname}:{port} did not answer, use --skip-check to add it anyway");
    }

    let target = monitor
        .add_or_update_target(hostname, port, duration, interval)
        .await?;
    println!(
        "{} tested for {}s every {}m, results in {}",
        target.id(),
        target.duration,
        target.interval,
        target.results_location
    );
    Ok(())
}

async fn check(monitor: &Monitor, hostname: &str, port: u16) -> anyhow::Result<()> {
    let measurement = monitor
        .test_reachability(hostname, port)
        .await
        .with_context(|| format!("{hostname}:{port} is not usable"))?;

    println!(
        "{hostname}:{port} is reachable: sent {:.2} Mbps, received {:.2} Mbps",
        measurement.sent_mbps, measurement.received_mbps
    );

    if !measurement.intervals.is_empty() {
        println!("{:>9} {:>9} {:>9} {:>9} {:>12}", "start s", "end s", "secs", "MB", "Mbit/s");
        for interval in &measurement.intervals {
            println!(
                "{:>9.0} {:>9.0} {:>9.0} {:>9.0} {:>12.0}",
                interval.start,
                interval.end,
                interval.seconds,
                interval.megabytes(),
                interval.mbps()
            );
        }
    }
    Ok(())
}

async fn list(monitor: &Monitor) -> anyhow::Result<()> {
    let targets = monitor.list_targets().await?;
    if targets.is_empty() {
        println!("no targets registered");
        return Ok(());
    }

    for target in targets {
        let summary = monitor.summarize(&target.hostname, target.port).await?;
        let last = summary
            .last_timestamp
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{:<30} {:>4}s every {:>2}m  {:>5} results  last {}{}",
            target.id().to_string(),
            target.duration,
            target.interval,
            summary.count,
            last,
            if summary.stale { "  (stale)" } else { "" }
        );
    }
    Ok(())
}

async fn results(
    monitor: &Monitor,
    hostname: &str,
    port: u16,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let records = match limit {
        Some(limit) => monitor.read_latest_results(hostname, port, limit).await?,
        None => monitor.read_results(hostname, port).await?,
    };

    for record in records {
        let when = record
            .datetime()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| record.timestamp.to_string());
        println!(
            "{when}  sent {:>10.2} Mbps  received {:>10.2} Mbps",
            record.sent_mbps, record.received_mbps
        );
    }
    Ok(())
}
