/*!
 * App Supervisor - Main Entry Point
 *
 * Loads an ecosystem descriptor and keeps its apps running until
 * interrupted.
 */

use app_supervisor::core::limits::{DEFAULT_MEMORY_SAMPLE_INTERVAL, MAX_MEMORY_SAMPLE_INTERVAL};
use app_supervisor::{
    init_tracing, ConfigLoader, ControllerSettings, Supervisor, SupervisorError, TracingOptions,
};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Process supervisor for ecosystem descriptors
#[derive(Parser, Debug)]
#[command(name = "supervisor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log filter directive (trace, debug, info, warn, error); RUST_LOG wins
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every app in the descriptor and supervise it in the foreground
    Start {
        /// Path to the ecosystem descriptor (JSON)
        config: PathBuf,

        /// Environment profile, selects `env_<PROFILE>`
        #[arg(long, env = "SUPERVISOR_ENV")]
        env: Option<String>,

        /// Only start the named app
        #[arg(long)]
        only: Option<String>,

        /// Memory sampling interval in seconds (1 to 86400)
        #[arg(
            long,
            default_value_t = DEFAULT_MEMORY_SAMPLE_INTERVAL.as_secs(),
            value_parser = clap::value_parser!(u64).range(1..=MAX_MEMORY_SAMPLE_INTERVAL.as_secs())
        )]
        memory_interval: u64,
    },

    /// Validate the descriptor and print the resolved apps as JSON
    Validate {
        /// Path to the ecosystem descriptor (JSON)
        config: PathBuf,

        /// Environment profile, selects `env_<PROFILE>`
        #[arg(long, env = "SUPERVISOR_ENV")]
        env: Option<String>,
    },
}

fn loader_for(env: Option<String>) -> ConfigLoader {
    match env {
        Some(profile) => ConfigLoader::new().with_profile(profile),
        None => ConfigLoader::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        filter: cli.log_level.clone(),
        json: cli.json_logs,
    });

    match cli.command {
        Commands::Validate { config, env } => {
            let apps = loader_for(env)
                .from_file(&config)
                .map_err(SupervisorError::from)?;
            let json = serde_json::to_string_pretty(&apps).into_diagnostic()?;
            println!("{json}");
            Ok(())
        }
        Commands::Start {
            config,
            env,
            only,
            memory_interval,
        } => {
            let loader = loader_for(env);
            let mut apps = loader.from_file(&config).map_err(SupervisorError::from)?;

            if let Some(name) = only {
                apps.retain(|app| app.name == name);
                if apps.is_empty() {
                    return Err(SupervisorError::Internal(format!(
                        "no app named `{name}` in {}",
                        config.display()
                    ))
                    .into());
                }
            }

            info!(
                config = %config.display(),
                profile = ?loader.profile(),
                apps = apps.len(),
                "Supervisor starting"
            );

            let settings = ControllerSettings {
                memory_interval: Duration::from_secs(memory_interval),
                ..ControllerSettings::default()
            };
            let supervisor = Supervisor::new(apps, settings);

            let report = supervisor.start_all().await;
            if report.started.is_empty() {
                let first = report.failed.into_iter().next().map(|f| f.error);
                return Err(match first {
                    Some(error) => SupervisorError::Launch(error).into(),
                    None => SupervisorError::Internal("no instances configured".into()).into(),
                });
            }

            tokio::select! {
                result = shutdown_signal() => {
                    result.map_err(SupervisorError::from)?;
                    info!("Shutdown requested");
                }
                _ = supervisor.wait_all_terminal() => {
                    warn!("Every instance has stopped");
                }
            }

            supervisor.shutdown().await;

            for status in supervisor.status() {
                info!(
                    app = %status.app,
                    index = status.index,
                    state = ?status.state,
                    restarts = status.restarts,
                    "Final status"
                );
            }
            Ok(())
        }
    }
}

/// Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
