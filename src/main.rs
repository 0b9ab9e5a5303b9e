use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden::cli::{self, Cli, Commands};
use warden::config::{AppConfig, LoggingConfig};
use warden::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            tasks,
            agents,
            dry_run,
        } => {
            let mut config = AppConfig::load_from(&cli.config_dir)?;
            if let Some(agents) = agents {
                config.run.agents = *agents;
            }
            if *dry_run {
                config.run.dry_run = true;
            }
            init_logging(&config.logging);
            info!(
                tasks = %tasks.display(),
                agents = config.run.agents,
                dry_run = config.run.dry_run,
                "starting run"
            );
            let report = warden::start_run(config, tasks).await?;
            println!("{}", report.render());
        }
        Commands::Validate { tasks } => {
            init_logging_simple();
            cli::validate(tasks)?;
        }
        Commands::Inspect => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config_dir)?;
            cli::inspect(&config)?;
        }
        Commands::Trigger { command } => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config_dir)?;
            cli::trigger(&config, command)?;
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,warden={}", config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
