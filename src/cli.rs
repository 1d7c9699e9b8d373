use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

use crate::bias_table::{BiasBounds, BiasStore};
use crate::config_loader::{load_config, EngineConfig};
use crate::learning::LearningCore;
use crate::risk_engine::RiskEngine;
use crate::risk_types::{ActionRequest, Verdict};

/// Top-level CLI interface for the risk engine
#[derive(Parser)]
#[command(
    name = "assure_engine",
    version,
    about = "Pre-execution risk gate for infrastructure actions"
)]
pub struct Cli {
    /// Config file (defaults to assure.toml or $ASSURE_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Host/IP to bind, overrides server.host
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Evaluate a shell command locally; exits 1 on BLOCK
    Check {
        command: String,
        #[arg(short, long, default_value = "production")]
        environment: String,
        #[arg(short, long)]
        threshold: Option<f64>,
        #[arg(long, default_value = "cli")]
        operator: String,
    },

    /// Print the persisted bias table
    Weights,

    /// Apply one reinforcement step to the persisted bias table
    #[command(group(ArgGroup::new("outcome").required(true).args(["correct", "incorrect"])))]
    Learn {
        #[arg(short, long = "feature", required = true)]
        features: Vec<String>,
        #[arg(long)]
        correct: bool,
        #[arg(long)]
        incorrect: bool,
    },
}

/// Map a raw shell command onto the action type the engine scores
pub fn classify_command(command: &str) -> &'static str {
    let lowered = command.to_lowercase();
    if lowered.contains("prisma migrate") {
        "DATABASE_MIGRATION"
    } else if lowered.contains("git push --force")
        || lowered.contains("rm -rf")
        || lowered.contains("kubectl delete")
    {
        "FORCE_DELETE"
    } else if lowered.contains("drop table") {
        "DROP_TABLE"
    } else if lowered.contains("prisma db push") {
        "PRISMA_PUSH"
    } else {
        "UNKNOWN_ACTION"
    }
}

pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve { host, port } => {
            serve(&config, host, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            command,
            environment,
            threshold,
            operator,
        } => check(&config, command, environment, threshold, operator).await,
        Commands::Weights => {
            let bounds = BiasBounds {
                floor: config.learning.bias_floor,
                ceiling: config.learning.bias_ceiling,
            };
            let table = BiasStore::new(&config.storage.bias_path).load_or_default(bounds);
            println!("{}", serde_json::to_string_pretty(&table)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Learn {
            features, correct, ..
        } => {
            let core = LearningCore::load(BiasStore::new(&config.storage.bias_path), &config.learning);
            let outcome = core.reinforce(&features, correct)?;
            if !outcome.persisted {
                anyhow::bail!("bias table updated in memory but could not be written");
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: &EngineConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let engine = Arc::new(RiskEngine::from_config(config).context("building risk engine")?);
    let app = crate::riskweb::build_router(engine);

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

async fn check(
    config: &EngineConfig,
    command: String,
    environment: String,
    threshold: Option<f64>,
    operator: String,
) -> Result<ExitCode> {
    let engine = RiskEngine::from_config(config).context("building risk engine")?;

    let mut request = ActionRequest::new(classify_command(&command), environment)
        .with_payload("command", command)
        .with_operator(operator);
    request.threshold = threshold;

    let result = engine.evaluate(&request).await;

    println!("verdict: {}", result.verdict);
    println!("risk score: {:.1}/100", result.risk_score);
    for reason in &result.reasoning {
        println!("  - {reason}");
    }
    println!("signals: {}", serde_json::to_string(&result.signals)?);

    Ok(if result.verdict == Verdict::Block {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
