use formgate_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    formgate_observability::init();

    let config = AppConfig::from_env()?;
    let app = formgate_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
