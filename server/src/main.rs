mod config;
mod registry;
mod routes;
mod services;
mod state;
mod store;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env();

    // One store handle for the whole process; the engine forbids a second
    // open against the same path. Fatal if the path is inaccessible.
    let store = store::ChunkStore::open(&config.store_path).expect("chunk store open failed");
    let registry = registry::MuralRegistry::new(&config.murals);
    tracing::info!(
        path = %config.store_path.display(),
        murals = config.murals.len(),
        "chunk store opened"
    );

    let state = state::AppState::new(store, registry, config.clone());
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "mural sync server listening");
    axum::serve(listener, app).await.expect("server failed");
}
