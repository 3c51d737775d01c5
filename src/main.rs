use actix::prelude::*;
use actix_cors::Cors;
use actix_files::Files;
use actix_web::{App, HttpServer, web};
use anyhow::Context as _;
use clap::Parser;
use path_clean::PathClean;
use std::path::PathBuf;

mod actors;
mod confluence;
mod config;
mod document;
mod dto;
mod errors;
mod interview;
mod logger;
mod provider;
mod routing;
mod slots;
mod store;
mod templates;

use actors::health::HealthActor;
use actors::orchestrator::OrchestratorActor;
use actors::store::StoreActor;
use config::Config;
use confluence::ConfluencePublisher;
use provider::Assistant;
use store::RuntimeStore;

#[derive(Parser)]
#[command(name = "brd-intake")]
#[command(about = "Collects business requirements through a chat and turns them into a document.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the YAML configuration file.
    #[clap(long, global = true, env = "BRD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Runs the HTTP service
    Serve,
    /// Runs a conversation in the terminal
    Interview {
        /// Continue an existing conversation.
        #[clap(long)]
        session: Option<String>,
    },
}

/// Everything the HTTP service and the terminal interview share.
struct Services {
    store: Addr<StoreActor>,
    health: Addr<HealthActor>,
    orchestrator: Addr<OrchestratorActor>,
    provider_name: String,
}

fn start_services(config: &Config, store_threads: usize) -> anyhow::Result<Services> {
    let runtime_store = RuntimeStore::open(config.storage.backend, &config.storage.database_path)
        .with_context(|| format!("opening {:?} storage", config.storage.backend))?;

    let service = provider::build_service(&config.provider)?;
    let provider_name = service.as_ref().map_or("none (planner questions)".to_string(), |s| s.name().to_string());
    let assistant = Assistant::new(service, config.provider.retries);
    let publisher = ConfluencePublisher::new(&config.confluence)?;
    if !publisher.is_configured() {
        log::info!("Confluence settings are incomplete. Documents will not be published.");
    }

    let health = HealthActor::new().start();
    // Storage calls block, so they get their own thread pool.
    let store = SyncArbiter::start(store_threads, move || StoreActor::new(runtime_store.clone()));
    let orchestrator = OrchestratorActor::new(
        store.clone(),
        health.clone(),
        assistant,
        publisher,
        config.document.default_title.clone(),
    )
    .start();

    Ok(Services {
        store,
        health,
        orchestrator,
        provider_name,
    })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Could not load configuration from '{}': {:#}", config_path.display(), e);
            std::process::exit(1);
        }
    };
    logger::init_logger(config.server.log_level.as_deref().unwrap_or("info"));

    match cli.command {
        Some(Commands::Serve) | None => run_server(config).await,
        Some(Commands::Interview { session }) => {
            let services = start_services(&config, 1).map_err(std::io::Error::other)?;
            interview::run_interview(services.orchestrator, services.store, session)
                .await
                .map_err(std::io::Error::other)
        }
    }
}

async fn run_server(config: Config) -> std::io::Result<()> {
    let total_cores = num_cpus::get();
    let store_threads = (total_cores / 2).max(1);
    let web_workers = config.server.workers.unwrap_or(total_cores).max(1);
    log::debug!(
        "Core allocation: Total={}, Actix Web={}, Storage={}",
        total_cores,
        web_workers,
        store_threads
    );

    let services = start_services(&config, store_threads).map_err(|e| {
        log::error!("Startup failed: {:#}", e);
        std::io::Error::other(e)
    })?;

    let store = services.store.clone();
    let health = services.health.clone();
    let orchestrator = services.orchestrator.clone();
    let documents = web::Data::new(config.document.clone());
    let frontend_origin = config.server.frontend_origin.clone();
    let static_path = config.server.static_path.clone().map(|p| PathBuf::from(p).clean());

    let server = HttpServer::new(move || {
        let cors = if frontend_origin.trim() == "*" {
            Cors::permissive()
        } else {
            Cors::default()
                .allowed_origin(&frontend_origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
        };

        let mut app = App::new()
            .wrap(cors)
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(health.clone()))
            .app_data(web::Data::new(orchestrator.clone()))
            .app_data(documents.clone())
            .configure(routing::configure);

        if let Some(static_path) = &static_path {
            app = app.service(Files::new("/", static_path.clone()).index_file("index.html"));
        }
        app
    })
    .workers(web_workers)
    .keep_alive(std::time::Duration::from_secs(30))
    .bind((config.server.host.as_str(), config.server.port))
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            println!("Error: The port {} is already in use.", config.server.port);
            println!("Please stop the other application or choose a different port in the configuration.");
            std::process::exit(1);
        }
        e
    })?;

    logger::print_banner(
        &config.server.host,
        config.server.port,
        &format!("{:?}", config.storage.backend).to_lowercase(),
        &services.provider_name,
    );
    server.run().await
}
