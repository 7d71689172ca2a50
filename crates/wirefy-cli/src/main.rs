//! Wirefy CLI
//!
//! Command-line interface and HTTP backend for turning Figma designs into
//! implementation plans. Configuration comes from the environment (and a
//! `.env` file when present).

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wirefy_core::agent::{resolve_link, DesignAgent, DEFAULT_MAX_ROUNDS};
use wirefy_core::bridge::BackendBridge;
use wirefy_core::events::StdoutEventSink;
use wirefy_core::mcp_client::McpClient;
use wirefy_core::{parse_url, AppError, Config};

mod server;

/// Wirefy - Figma designs to implementation plans
#[derive(Parser, Debug)]
#[command(name = "wirefy")]
#[command(version, about, long_about = None)]
struct Args {
    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Log level filter (overrides WIREFY_LOG_LEVEL; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP backend and MCP endpoint
    Serve {
        #[arg(long, env = "WIREFY_HOST")]
        host: Option<String>,
        #[arg(short, long, env = "WIREFY_PORT")]
        port: Option<u16>,
    },
    /// Parse a Figma share link
    Parse { link: String },
    /// Analyze a component and save the analysis document
    Analyze { link: String },
    /// Generate and save an implementation plan
    Plan { link: String },
    /// Describe a node's screenshot with the vision model
    Vision {
        link: String,
        /// Directory for initial_plan.md (defaults to the output directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Route a free-form request (with or without a link) to the agent
    Agent {
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Answer a prompt with the tool-calling agent
    Ask {
        #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
        max_rounds: usize,
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// List tools, locally or from a remote MCP endpoint
    Tools {
        #[arg(long)]
        mcp_url: Option<String>,
    },
    /// Call a running backend through the bridge client
    Bridge {
        link: String,
        /// Fetch the component analysis instead of a plan
        #[arg(long)]
        info: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: Config) -> wirefy_core::Result<()> {
    let json_output = matches!(args.format, OutputFormat::Json);
    let agent = || -> wirefy_core::Result<DesignAgent> {
        Ok(DesignAgent::from_config(&config)?.with_events(Arc::new(StdoutEventSink::new(json_output))))
    };

    match args.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let agent = DesignAgent::from_config(&config)?;
            if !agent.figma().has_token() {
                tracing::warn!("FIGMA_ACCESS_TOKEN is not set; Figma tools will fail");
            }
            if !agent.gateway().has_api_key() {
                tracing::warn!("OPENROUTER_API_KEY is not set; planning endpoints will fail");
            }
            server::serve(server::AppState::new(agent), &host, port).await
        }
        Command::Parse { link } => {
            let parsed = parse_url(&link);
            if json_output {
                print_json(&parsed)
            } else {
                if !parsed.is_valid {
                    return Err(AppError::InvalidLink(link));
                }
                println!("File key: {}", parsed.file_key.as_deref().unwrap_or("-"));
                println!("Node ID:  {}", parsed.node_id.as_deref().unwrap_or("not present"));
                Ok(())
            }
        }
        Command::Analyze { link } => {
            let (file_key, node_id) = resolve_link(&link)?;
            let analysis = agent()?.analyze_component(&file_key, &node_id).await?;
            if json_output {
                print_json(&analysis)
            } else {
                println!("{}", analysis.markdown);
                Ok(())
            }
        }
        Command::Plan { link } => {
            let (file_key, node_id) = resolve_link(&link)?;
            let plan = agent()?.generate_plan(&file_key, &node_id).await?;
            if json_output {
                print_json(&plan)
            } else {
                println!("{}", plan.plan);
                println!();
                for path in plan.saved_files.paths() {
                    println!("Saved {}", path.display());
                }
                Ok(())
            }
        }
        Command::Vision { link, out } => {
            let (file_key, node_id) = resolve_link(&link)?;
            let result = agent()?
                .analyze_vision(&file_key, &node_id, out.as_deref())
                .await?;
            if json_output {
                print_json(&result)
            } else {
                println!("{}", result.markdown);
                println!();
                println!("Saved {}", result.path.display());
                Ok(())
            }
        }
        Command::Agent { query } => {
            let response = agent()?.run(&query.join(" ")).await?;
            if json_output {
                print_json(&serde_json::json!({ "success": true, "response": response }))
            } else {
                println!("{response}");
                Ok(())
            }
        }
        Command::Ask { max_rounds, prompt } => {
            let response = agent()?.run_with_tools(&prompt.join(" "), max_rounds).await?;
            if json_output {
                print_json(&serde_json::json!({ "success": true, "response": response }))
            } else {
                println!("{response}");
                Ok(())
            }
        }
        Command::Tools { mcp_url } => {
            let tools = match mcp_url {
                Some(url) => {
                    let client = McpClient::new(url)?;
                    client.initialize().await?;
                    let tools = client.list_tools().await;
                    client.close().await?;
                    tools?
                }
                None => DesignAgent::from_config(&config)?.tools().list(),
            };
            if json_output {
                print_json(&tools)
            } else {
                println!("Discovered {} tools", tools.len());
                for tool in &tools {
                    println!("  - {}: {}", tool.name, tool.description);
                }
                Ok(())
            }
        }
        Command::Bridge { link, info } => {
            let bridge = BackendBridge::new(Some(config.mcp.backend_url.clone()))?;
            let result = if info {
                bridge.get_component_info(&link).await
            } else {
                bridge.analyze_figma_link(&link).await
            };
            print_json(&result)?;
            if result.success {
                Ok(())
            } else {
                Err(AppError::Other(result.error.unwrap_or_else(|| "bridge call failed".into())))
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> wirefy_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
