#[tokio::main]
async fn main() {
    lakegate_observability::init();

    match lakegate_infra::config::BridgeConfig::from_env() {
        Ok(config) => config.log(),
        Err(e) => tracing::warn!(error = %e, "config incomplete; using in-memory dev wiring"),
    }

    let services = lakegate_api::app::AppServices::in_memory();
    let app = lakegate_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("failed to bind 0.0.0.0:8080");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
