use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState, cors_layer};
use common::{storage::db::SurrealDbClient, utils::config::get_config};
use event_bus::EventBus;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = Arc::new(get_config()?);

    // USE_LOCAL_MOCK runs the whole stack against the embedded engine.
    let address = if config.use_local_mock {
        "mem://".to_string()
    } else {
        config.surrealdb_address.clone()
    };

    let db = Arc::new(
        SurrealDbClient::new(
            &address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Size the vector index to the active embedder before serving.
    db.ensure_initialized(&config.vector_index_name, config.embedding_dimensions())
        .await?;
    info!(
        embedding_dimension = config.embedding_dimensions(),
        local_embeddings = config.local_embeddings,
        "storage initialized"
    );

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let bus = Arc::new(EventBus::in_memory());
    let state = ApiState::build(
        Arc::clone(&config),
        Arc::clone(&db),
        Arc::clone(&bus),
        Some(openai_client),
    )?;

    // Per-tenant event consumers, stopped by the shutdown token.
    let shutdown = CancellationToken::new();
    worker::spawn_event_consumers(&config, &bus, &shutdown);

    let mut app = api_routes(state);
    if config.allow_cors {
        app = app.layer(cors_layer(&config));
    }

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let on_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down");
            on_shutdown.cancel();
        })
        .await?;

    Ok(())
}
