use anyhow::Context as _;

use folio_infra::{db, AppConfig, Migrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    folio_observability::init();

    // Missing provider or database settings stop the process here.
    let config = AppConfig::from_env().context("invalid configuration")?;

    let pool = db::connect(&config.database_url, 10)
        .await
        .context("failed to connect to DATABASE_URL")?;
    let hook_pool = db::connect(&config.hook_database_url, 2)
        .await
        .context("failed to connect to HOOK_DATABASE_URL")?;

    let applied = Migrator::new(pool.clone())
        .run()
        .await
        .context("database migration failed")?;
    tracing::info!(?applied, "database schema ready");

    let services = folio_api::app::services::build_services(&config, pool, hook_pool)?;
    let app = folio_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
