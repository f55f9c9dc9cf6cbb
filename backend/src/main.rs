use backend::{config::AppConfig, lifecycle::run_lifecycle, logger::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting smart-schedulers backend...");

    let cfg = AppConfig::from_env();
    run_lifecycle(cfg).await
}
