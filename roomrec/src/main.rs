use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomrec::config::AppConfig;
use roomrec::directory::HttpDirectory;
use roomrec::pipeline::Orchestrator;
use roomrec::pipeline::orchestrator::OrchestratorOptions;

use chunk_store::HttpObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "roomrec", about = "Finalize room recordings: merge, composite and publish")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "roomrec.toml", env = "ROOMREC_CONFIG")]
    config: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Finalize one session: reconstruct all participant streams,
    /// composite the cameras and publish everything.
    Finalize {
        session_id: String,
    },
    /// Composite already-published recording URLs into one mixed file.
    Composite {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Record the result against this session in the directory.
        #[arg(long)]
        session_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomrec=info,chunk_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    let store = Arc::new(HttpObjectStore::new(config.store.clone())?);
    let directory = Arc::new(HttpDirectory::new(&config.directory_base)?);
    let orchestrator = Orchestrator::new(store, directory, OrchestratorOptions::from_config(&config));

    match args.command {
        Commands::Finalize { session_id } => {
            let report = orchestrator.finalize_session(&session_id).await?;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!("session {}: run {}", report.session_id, report.run_id);
                    for p in &report.participants {
                        println!(
                            "  {} ({}): camera={} screen={}",
                            p.display_name,
                            p.participant_id,
                            p.camera_url.as_deref().unwrap_or("absent"),
                            p.screen_url.as_deref().unwrap_or("absent"),
                        );
                    }
                    match &report.composite_url {
                        Some(url) => println!("  composite: {url}"),
                        None => println!("  composite: none (no camera streams)"),
                    }
                    println!("  finished in {:.1}s", report.duration_secs());
                }
            }
        }
        Commands::Composite { urls, session_id } => {
            let url = orchestrator
                .finalize_adhoc_composite(&urls, session_id.as_deref())
                .await?;
            match args.output {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "composite_url": url }))
                }
                OutputFormat::Text => println!("composite: {url}"),
            }
        }
    }

    Ok(())
}
