mod config;
mod console;
mod run_cmd;
mod structures_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::AutoplanConfig;

#[derive(Parser)]
#[command(name = "autoplan", about = "Automated treatment-plan generation workflow")]
struct Cli {
    /// Config file path (overrides AUTOPLAN_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default autoplan config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the full planning workflow for a patient
    Run {
        /// Patient ID (overrides AUTOPLAN_PATIENT_ID env var and config)
        #[arg(long)]
        patient_id: Option<String>,
    },
    /// Check the structure prerequisites without planning
    CheckStructures {
        /// Patient ID (overrides AUTOPLAN_PATIENT_ID env var and config)
        #[arg(long)]
        patient_id: Option<String>,
    },
}

/// Execute `autoplan init`: write the default config file.
fn cmd_init(cli_config: Option<&PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = cli_config
        .cloned()
        .unwrap_or_else(config::config_path);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&cfg, &path)?;

    println!("Config written to {}", path.display());
    println!("  patient.id = {}", cfg.patient.id);
    println!("  courses.plan_id = {}", cfg.courses.plan_id);
    println!("  report.output_dir = {}", cfg.report.output_dir.display());
    println!();
    println!("Next: run `autoplan run` to start a planning run.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.config.as_ref(), force)?;
        }
        Commands::Run { patient_id } => {
            let resolved =
                AutoplanConfig::resolve(patient_id.as_deref(), cli.config.as_deref())?;
            run_cmd::cmd_run(resolved).await?;
        }
        Commands::CheckStructures { patient_id } => {
            let resolved =
                AutoplanConfig::resolve(patient_id.as_deref(), cli.config.as_deref())?;
            structures_cmd::cmd_check_structures(resolved).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    /// Serialize tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
