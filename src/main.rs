use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tokio::io::BufReader;

use portal_reporter::{runner, utils::ReporterConfig};

#[derive(Parser)]
#[command(name = "portal-reporter")]
#[command(author = "NL Team")]
#[command(version = "0.1.0")]
#[command(about = "Real-time ReportPortal reporter for test runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report lifecycle events (JSON lines) to ReportPortal
    Run {
        /// Reporter config file (YAML or JSON)
        #[arg(short, long, default_value = "reportportal.yaml")]
        config: PathBuf,

        /// Event file; reads stdin when omitted
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// Verbose diagnostics
        #[arg(long, default_value = "false")]
        debug: bool,
    },

    /// Validate a reporter config without contacting the server
    CheckConfig {
        /// Reporter config file (YAML or JSON)
        #[arg(short, long, default_value = "reportportal.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            events,
            debug,
        } => run(&config, events.as_deref(), debug).await,
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "❌".red(), e);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_module("portal_reporter", log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn read_config(path: &Path) -> anyhow::Result<ReporterConfig> {
    let mut config = ReporterConfig::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.apply_env();
    Ok(config)
}

async fn run(config_path: &Path, events: Option<&Path>, debug: bool) -> anyhow::Result<()> {
    let config = read_config(config_path)?;
    init_logging(debug || config.debug);
    config.validate()?;

    if !config.enabled {
        println!(
            "{} ReportPortal reporting is disabled in {}",
            "ℹ".blue(),
            config_path.display()
        );
        return Ok(());
    }

    let outcome = match events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            runner::run_reporter(&config, BufReader::new(file)).await?
        }
        None => runner::run_reporter(&config, BufReader::new(tokio::io::stdin())).await?,
    };

    println!(
        "{} Processed {} events",
        "✅".green(),
        outcome.events.to_string().cyan()
    );
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = read_config(path)?;
    init_logging(config.debug);
    config.validate()?;
    println!("{} Config is valid", "✅".green());
    println!("  Endpoint: {}", config.endpoint.cyan());
    println!("  Project: {}", config.project_name.cyan());
    println!(
        "  Launch: {}",
        config.launch_name_or("Automated tests").cyan()
    );
    if !config.enabled {
        println!("  Reporting: {}", "Disabled".yellow());
    }
    if config.video_upload {
        println!("  Video upload: {}", "Enabled".green());
    }
    Ok(())
}
