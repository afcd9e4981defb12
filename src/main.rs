use std::sync::Arc;
use std::time::Duration;

use line_provisioning::config;
use line_provisioning::db::{PgProvisioningStore, ProvisioningStore};
use line_provisioning::providers::ProviderBundle;
use line_provisioning::provisioning::{retry, ProvisioningService, ServiceOptions};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    let mode = *config::PROVIDER_MODE;
    let providers = ProviderBundle::from_settings(mode, &config::provider_settings_from_env())?;
    let store: Arc<dyn ProvisioningStore> = Arc::new(PgProvisioningStore::new(pool));
    let service = ProvisioningService::new(
        store,
        providers,
        ServiceOptions {
            catalog: config::plan_catalog_from_env(),
            pool_regions: config::POOL_REGIONS.clone(),
            retry: config::retry_policy_from_env(),
        },
    );

    let interval = Duration::from_secs(*config::RETRY_SWEEP_INTERVAL_SECS);
    tracing::info!(
        provider_mode = mode.as_str(),
        interval_secs = interval.as_secs(),
        pool_regions = ?config::POOL_REGIONS.as_slice(),
        "starting provisioning retry sweeper"
    );
    let sweeper = retry::spawn(service.retry_queue().clone(), interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; stopping retry sweeper");
    sweeper.abort();
    Ok(())
}
