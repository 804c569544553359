use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use vllm_tool_proxy::config::{
    Cli, Command, Config, LogFormat, ProbeArgs, ServeArgs, StackArgs, StackCommand, VersionsArgs,
    VersionsMode,
};
use vllm_tool_proxy::probe::wait_for_health;
use vllm_tool_proxy::server::{build_router, AppState};
use vllm_tool_proxy::stack::{Stack, StackAction};
use vllm_tool_proxy::upstream::VllmClient;
use vllm_tool_proxy::versions::{check_file, sync_file, VersionPins};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "vllm_tool_proxy=debug,tower_http=debug"
    } else {
        "vllm_tool_proxy=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init(),
    }

    info!("vllm-tool-proxy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);

    match &cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::Stack(args) => stack(&config, args).await,
        Command::Versions(args) => versions(args),
        Command::Probe(args) => probe(&config, args).await,
    }
}

async fn serve(config: Arc<Config>, args: &ServeArgs) -> anyhow::Result<()> {
    info!(
        upstream = %config.upstream.base_url,
        model = %config.upstream.model,
        timeout_secs = config.upstream.timeout_secs,
        "Configuration loaded"
    );

    let backend = Arc::new(VllmClient::new(&config.upstream)?);
    let state = Arc::new(AppState::new(config.clone(), backend)?);
    info!(tools = state.registry.len(), categories = ?state.registry.categories(), "Tool registry ready");

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = args.listen.clone().unwrap_or_else(|| config.server.listen.clone());
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn stack(config: &Config, args: &StackArgs) -> anyhow::Result<()> {
    let stack = Stack::new(config.stack.clone());
    stack.run(&StackAction::from(&args.action)).await?;

    if let StackCommand::Start { wait: true } = args.action {
        let report = stack.wait_ready(&config.upstream.base_url).await?;
        info!(url = %report.url, attempts = report.attempts, "vLLM is ready");
    }
    Ok(())
}

fn versions(args: &VersionsArgs) -> anyhow::Result<()> {
    let pins = VersionPins::load(&args.pins)?;

    let mut unresolved = 0;
    for dockerfile in &args.dockerfiles {
        let report = match args.mode {
            VersionsMode::Check => check_file(dockerfile, &pins)?,
            VersionsMode::Sync => sync_file(dockerfile, &pins)?,
        };
        unresolved += report.unresolved();
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if unresolved > 0 {
        bail!("{unresolved} version pin(s) out of sync");
    }
    info!(files = args.dockerfiles.len(), "Version pins in sync");
    Ok(())
}

async fn probe(config: &Config, args: &ProbeArgs) -> anyhow::Result<()> {
    let url = args.url.as_deref().unwrap_or(&config.upstream.base_url);
    let report = wait_for_health(url, args.attempts, Duration::from_secs(args.interval_secs)).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
