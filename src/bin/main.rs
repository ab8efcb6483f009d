//! CLI tool for the UPS fleet monitor (upsmon)

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use upsmonlib::{
    daemon::{DaemonConfig, MonitoringDaemon},
    fleet::{provision_fleet, HistorySample, UnitStatus},
    prediction::RiskLevel,
    store::{FileStore, TelemetryStore},
    training::{synthetic_training_set, train_and_save, TrainingSet},
};

#[cfg(feature = "cli")]
const DEFAULT_CONFIG: &str = "upsmon.toml";

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "upsmon")]
#[command(about = "UPS fleet monitor: telemetry history, failure prediction and alerting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon configuration file (defaults to ./upsmon.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Run the refresh and prediction loops until Ctrl-C
    Run,
    /// Run one prediction cycle now
    Predict {
        /// Print predictions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Train the failure classifier
    Train {
        /// Train on N synthetic samples instead of stored history
        #[arg(long, value_name = "N")]
        synthetic: Option<usize>,
        /// Bagging with per-node feature subsampling
        #[arg(long)]
        bootstrap: bool,
    },
    /// Provision a demo fleet into the store
    Seed {
        /// Number of units
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
        /// RNG seed for reproducible fleets
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show units, latest predictions and alert counts
    Status,
    /// Print a sample configuration file
    Config,
}

#[cfg(feature = "cli")]
fn load_config(path: Option<&PathBuf>) -> Result<DaemonConfig, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(DaemonConfig::from_toml_file(p)?),
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => {
            Ok(DaemonConfig::from_toml_file(DEFAULT_CONFIG)?)
        }
        None => Ok(DaemonConfig::default()),
    }
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", DaemonConfig::sample_toml());
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_filter().as_str()),
    )
    .init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Run => {
                let daemon = MonitoringDaemon::new(config);
                daemon.run(tokio_util::sync::CancellationToken::new()).await?;
            }
            Commands::Predict { json } => handle_predict(config, json).await?,
            Commands::Train {
                synthetic,
                bootstrap,
            } => handle_train(&config, synthetic, bootstrap).await?,
            Commands::Seed { count, seed } => handle_seed(&config, count, seed).await?,
            Commands::Status => handle_status(&config).await?,
            Commands::Config => {}
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[cfg(feature = "cli")]
async fn handle_predict(config: DaemonConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let daemon = MonitoringDaemon::new(config);
    let monitor = daemon.build_monitor().await?;
    let report = monitor.run_prediction_cycle().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.predictions)?);
        return Ok(());
    }

    println!("{}", "═══ Prediction Cycle ═══".cyan().bold());
    if let Some(reason) = &report.skipped {
        println!("  {} {}", "Skipped:".yellow().bold(), reason);
        return Ok(());
    }
    println!(
        "  {} {}   {} {}   {} {}",
        "Scored:".white().bold(),
        report.units_scored.to_string().green(),
        "Predictions:".white().bold(),
        report.predictions.len().to_string().green(),
        "Failures:".white().bold(),
        report.failures.len().to_string().red()
    );
    for p in &report.predictions {
        let pct = format!("{:.1}%", p.probability_failure * 100.0);
        let pct = match p.risk_level {
            RiskLevel::High => pct.red().bold(),
            RiskLevel::Medium => pct.yellow(),
            RiskLevel::Low => pct.green(),
        };
        println!(
            "  {} {} {} risk, {} ({})",
            "▶".green(),
            p.unit_name.white().bold(),
            p.risk_level,
            pct,
            p.timeframe
        );
        for reason in &p.failure_reasons {
            println!("      • {}", reason);
        }
    }
    for (unit, why) in &report.failures {
        println!("  {} {}: {}", "✗".red(), unit, why);
    }
    Ok(())
}

#[cfg(feature = "cli")]
async fn handle_train(
    config: &DaemonConfig,
    synthetic: Option<usize>,
    bootstrap: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let set = match synthetic {
        Some(n) => synthetic_training_set(n, config.training.seed),
        None => {
            let store = FileStore::open(&config.store_dir).await?;
            TrainingSet::from_history(&store.get_all_history().await?)
        }
    };
    if set.is_empty() {
        return Err("no history to train on; run the daemon for a while or pass --synthetic N".into());
    }

    let mut ensemble = config.training.ensemble_config();
    ensemble.bootstrap |= bootstrap;
    let model_path = config.model_path.clone();
    let (model, report) =
        tokio::task::spawn_blocking(move || train_and_save(&set, ensemble, model_path)).await??;

    println!("{}", "═══ Training ═══".cyan().bold());
    println!(
        "  {} {} ({} train / {} test)",
        "Samples:".white().bold(),
        report.samples.to_string().green(),
        report.train_size,
        report.test_size
    );
    println!(
        "  {} healthy={} degraded={} failed={}",
        "Classes:".white().bold(),
        report.class_counts[0],
        report.class_counts[1],
        report.class_counts[2]
    );
    println!("  {} {}", "Trees:".white().bold(), model.n_trees());
    if let Some(eval) = &report.evaluation {
        println!("{}", eval);
    }
    println!("  {} {}", "Saved:".white().bold(), config.model_path.display());
    Ok(())
}

#[cfg(feature = "cli")]
async fn handle_seed(
    config: &DaemonConfig,
    count: usize,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    use rand::SeedableRng;

    let store = FileStore::open(&config.store_dir).await?;
    let mut rng = match seed {
        Some(s) => rand::rngs::StdRng::seed_from_u64(s),
        None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
    };
    let units = provision_fleet(count, &mut rng);
    for unit in units {
        store.append_history(&HistorySample::of(&unit)).await?;
        println!("  {} {} ({})", "+".green(), unit.name.white().bold(), unit.location);
        store.insert_unit(unit).await?;
    }
    println!("Seeded {} units into {}", count, config.store_dir.display());
    Ok(())
}

#[cfg(feature = "cli")]
async fn handle_status(config: &DaemonConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(&config.store_dir).await?;
    let units = store.get_all_units().await?;
    let predictions = store.get_latest_predictions().await?;
    let alerts = store.get_alerts().await?;

    println!("{}", "═══ UPS Fleet ═══".cyan().bold());
    if units.is_empty() {
        println!("  No units. Run `upsmon seed` first.");
        return Ok(());
    }
    println!(
        "  {:<8} {:<16} {:<9} {:>8} {:>7} {:>6} {:>6} {:>6} {:>8} {:>7}",
        "ID", "Location", "Status", "Battery", "Temp", "Load", "Eff", "Risk", "P(fail)", "Alerts"
    );
    for unit in &units {
        let status = format!("{:<9}", unit.status.to_string());
        let status = match unit.status {
            UnitStatus::Healthy => status.green(),
            UnitStatus::Risky => status.yellow(),
            UnitStatus::Warning => status.bright_red(),
            UnitStatus::Failed => status.red().bold(),
        };
        let p_fail = predictions
            .iter()
            .find(|p| p.unit_id == unit.id)
            .map(|p| format!("{:.0}%", p.probability_failure * 100.0))
            .unwrap_or_else(|| "-".into());
        let alert_count = alerts.iter().filter(|a| a.unit_id == unit.id).count();
        println!(
            "  {:<8} {:<16} {} {:>7.1}% {:>6.1}C {:>5.1}% {:>5.1}% {:>6.2} {:>8} {:>7}",
            unit.id,
            unit.location,
            status,
            unit.metrics.battery_level,
            unit.metrics.temperature,
            unit.metrics.load,
            unit.metrics.efficiency,
            unit.failure_risk,
            p_fail,
            alert_count
        );
    }

    let critical = alerts
        .iter()
        .filter(|a| a.severity == upsmonlib::alerts::AlertSeverity::Critical)
        .count();
    println!(
        "\n  {} {} active ({} critical), {} predictions",
        "Alerts:".white().bold(),
        alerts.len(),
        critical.to_string().red(),
        predictions.len()
    );
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
