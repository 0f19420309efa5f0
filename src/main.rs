use clap::Parser;
use ctxmcp::{BridgeServer, backend, config::Config, logging, service, tasks::TaskManager, web};
use rmcp::serve_server;

#[derive(Parser, Debug)]
#[command(
    name = "ctxmcp",
    version,
    about = "MCP server for incremental code indexing + semantic retrieval"
)]
struct Cli {
    /// Override BASE_URL
    #[arg(long)]
    base_url: Option<String>,
    /// Override TOKEN
    #[arg(long)]
    token: Option<String>,
    /// Enable the web admin interface on this port (binds 127.0.0.1)
    #[arg(long)]
    web_port: Option<u16>,
    /// Persist overrides to settings file
    #[arg(long, default_value_t = false)]
    persist_config: bool,
    /// One-shot run without MCP: project path
    #[arg(long)]
    oneshot_path: Option<String>,
    /// One-shot run without MCP: query
    #[arg(long)]
    oneshot_query: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load_with_overrides(cli.base_url, cli.token)?;
    let _guard = logging::init(&cfg.log_dir());

    if cli.persist_config {
        cfg.save()?;
    }
    tracing::info!(
        config_file = %cfg.settings_path.display(),
        data_dir = %cfg.data_dir.display(),
        log_dir = %cfg.log_dir().display(),
        "paths initialized"
    );

    // One-shot direct execution (no MCP) for quick testing
    if let (Some(path), Some(query)) = (cli.oneshot_path.clone(), cli.oneshot_query.clone()) {
        let client = backend::http_client();
        let tasks = TaskManager::new();
        let result = service::search_context(&cfg, &client, &tasks, &path, &query).await?;
        println!("{}", result);
        return Ok(());
    }

    let server = BridgeServer::new(cfg);

    if let Some(port) = cli.web_port {
        let state = web::AppState {
            server: server.clone(),
        };
        let router = web::build_router(state);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        tracing::info!(port, "web admin listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "web admin server exited");
            }
        });
    }

    tracing::info!("ctxmcp stdio server started");
    let io = (tokio::io::stdin(), tokio::io::stdout());
    let running = serve_server(server, io).await?;
    tokio::select! {
        quit = running.waiting() => {
            quit?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
