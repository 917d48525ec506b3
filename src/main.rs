use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

mod cli;
mod config;

use cli::{Cli, Commands};
use config::Config;
use toolmux::agent::{AgentSession, OpenAiReasoner, ToolInvoker};
use toolmux::backend::{BackendClient, BackendStatus, TcpConnector};
use toolmux::fetch::Fetcher;
use toolmux::ipc::{RequestHandler, ToolServer, ToolServerConfig, serve_stdio};
use toolmux::router::{InvocationResult, Router};
use toolmux::sources::{self, SourceKind};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("toolmux")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("toolmux.log");

    // stdout may be a wire transport; never log there
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Serve { listen, stdio } => handle_serve_command(listen.as_deref(), *stdio, config).await,
        Commands::Backend { source, listen } => handle_backend_command(*source, listen.as_deref(), config).await,
        Commands::Catalog { router } => handle_catalog_command(router.as_deref(), config).await,
        Commands::Call { tool, args, router } => handle_call_command(tool, args, router.as_deref(), config).await,
        Commands::Chat { router } => handle_chat_command(router.as_deref(), config).await,
    }
}

fn build_fetcher(config: &Config) -> Result<Fetcher> {
    Fetcher::with_timeout(config.fetch.timeout(), config.fetch.retry_policy()).context("Failed to build HTTP client")
}

/// Serve `handler` on stdio or TCP until it ends or ctrl-c
async fn serve<H: RequestHandler + 'static>(handler: Arc<H>, listen: Option<&str>) -> Result<()> {
    let Some(listen) = listen else {
        info!("Serving on stdio");
        return serve_stdio(handler).await.context("stdio server failed");
    };

    let server = ToolServer::with_config(ToolServerConfig::default().with_listen(listen));
    eprintln!("{} {}", "Listening on".green(), server.listen_addr());
    tokio::select! {
        result = server.run(handler) => result.context("Server failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}

async fn handle_serve_command(listen: Option<&str>, stdio: bool, config: &Config) -> Result<()> {
    let router = Arc::new(Router::new(config.router.to_router_config(), build_fetcher(config)?));
    for backend in &config.backends {
        router
            .register(backend)
            .with_context(|| format!("Failed to register backend '{}'", backend.id))?;
    }

    let report = router.start().await.context("Failed to start router")?;
    for snapshot in router.backend_status() {
        let status = match snapshot.status {
            BackendStatus::Healthy => snapshot.status.as_str().green(),
            BackendStatus::Starting => snapshot.status.as_str().yellow(),
            _ => snapshot.status.as_str().red(),
        };
        eprintln!("  {:<16} {:<12} {}", snapshot.id, status, snapshot.address);
    }
    for collision in &report.collisions {
        eprintln!(
            "  {} {} from {} ({:?}, kept {})",
            "collision:".yellow(),
            collision.name,
            collision.backend,
            collision.outcome,
            collision.kept_by
        );
    }
    eprintln!("{} {} tools", "Catalog:".green(), report.catalog.len());

    let listen = if stdio { None } else { Some(listen.unwrap_or(&config.router.listen)) };
    let result = serve(Arc::clone(&router), listen).await;
    router.shutdown().await;
    result
}

async fn handle_backend_command(source: SourceKind, listen: Option<&str>, config: &Config) -> Result<()> {
    info!("Running built-in backend {}", source);
    let toolbox = Arc::new(sources::toolbox(source, build_fetcher(config)?));
    serve(toolbox, listen).await
}

fn router_client(router: Option<&str>, config: &Config) -> BackendClient {
    let addr = router.unwrap_or(&config.router.listen).to_string();
    BackendClient::new("router", Arc::new(TcpConnector::new(addr)))
}

async fn handle_catalog_command(router: Option<&str>, config: &Config) -> Result<()> {
    let client = router_client(router, config);
    let tools = client.list_tools().await.context("Failed to list tools")?;

    if tools.is_empty() {
        println!("{}", "No tools available".yellow());
    }
    for tool in tools {
        println!("{}  {}", tool.name.cyan().bold(), tool.description);
    }
    Ok(())
}

async fn handle_call_command(tool: &str, args: &str, router: Option<&str>, config: &Config) -> Result<()> {
    let arguments: serde_json::Value = serde_json::from_str(args).context("--args is not valid JSON")?;
    let client = router_client(router, config);
    let result = ToolInvoker::invoke(&client, tool, arguments).await;

    println!("{}", render_call_result(&result)?);
    Ok(())
}

/// Text for a successful call; a failed call becomes an error naming its kind
fn render_call_result(result: &InvocationResult) -> Result<String> {
    match (&result.payload, &result.error) {
        (Some(payload), _) => Ok(serde_json::to_string_pretty(payload)?),
        (None, Some(error)) => {
            if error.fields.is_empty() {
                eyre::bail!("{:?}: {}", error.kind, error.message);
            }
            eyre::bail!("{:?}: {} (fields: {})", error.kind, error.message, error.fields.join(", "));
        }
        (None, None) => Ok("null".dimmed().to_string()),
    }
}

async fn handle_chat_command(router: Option<&str>, config: &Config) -> Result<()> {
    let reasoner = OpenAiReasoner::new(config.reasoner.clone()).context("Failed to create reasoner")?;
    let invoker = Arc::new(router_client(router, config));
    let mut session =
        AgentSession::new(Arc::new(reasoner), invoker).with_max_tool_rounds(config.reasoner.max_tool_rounds);

    println!("{}", "Type 'quit' to exit, 'wipe' to clear the conversation.".dimmed());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all("Query: ".as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "quit" => break,
            "wipe" => {
                session.wipe();
                println!("{}", "History cleared".yellow());
            }
            prompt => match session.ask(prompt).await {
                Ok(answer) => println!("{}\n", answer),
                Err(e) => eprintln!("{} {}", "Error:".red(), e),
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
