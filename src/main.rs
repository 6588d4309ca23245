use std::collections::HashSet;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use hivekit::cli::{Cli, Commands};
use hivekit::config::HiveConfig;
use hivekit::error::{HiveError, Result};
use hivekit::tools::{ToolResponse, register_custom_tools};
use hivekit::workspace::Workspace;
use hivekit::{KnowledgeStore, MessageBoard, TaskQueue};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("hivekit=debug")
    } else {
        EnvFilter::new("hivekit=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let workspace = Workspace::resolve(cli.workspace)?;
    let config = HiveConfig::load(workspace.root()).await?;
    let call_id = format!("cli-{}", Uuid::new_v4().simple());

    let response = match cli.command {
        Commands::Queue { args } => {
            TaskQueue::new(&workspace)
                .execute(&call_id, parse_args(&args)?)
                .await
        }
        Commands::Board { args } => {
            MessageBoard::new(&workspace)
                .execute(&call_id, parse_args(&args)?)
                .await
        }
        Commands::Knowledge { args } => {
            KnowledgeStore::new(&workspace)
                .execute(&call_id, parse_args(&args)?)
                .await
        }
        Commands::Tool { name, args } => {
            let tools = register_custom_tools(&config.tools.custom, &HashSet::new());
            let tool = tools
                .iter()
                .find(|t| t.name() == name)
                .ok_or_else(|| HiveError::NotFound(format!("custom tool \"{name}\"")))?;
            tool.execute(&call_id, parse_args(&args)?).await
        }
        Commands::Tools => {
            let tools = register_custom_tools(&config.tools.custom, &HashSet::new());
            let listed: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name(),
                        "description": t.description(),
                        "inputSchema": t.input_schema(),
                    })
                })
                .collect();
            ToolResponse::json(&serde_json::json!({"status": "ok", "tools": listed}))
        }
    };

    println!("{}", response.text());
    Ok(())
}

fn parse_args(raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| HiveError::Validation(format!("action must be a JSON document: {e}")))
}
