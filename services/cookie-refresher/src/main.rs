use anyhow::Result;
use common::database::{self, DatabaseConfig};
use common::store::PgCredentialStore;
use cookie_refresher::config::RefresherConfig;
use cookie_refresher::dispatcher::Dispatcher;
use cookie_refresher::driver::{self, BatchDriver};
use cookie_refresher::renewal::RenewalClient;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting cookie renewal worker");

    let config = RefresherConfig::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;
    if !database::health_check(&pool).await? {
        anyhow::bail!("Failed to connect to database");
    }

    let store = PgCredentialStore::new(pool, config.expiry_mode);
    let renewer = Arc::new(RenewalClient::new(&config)?);
    info!("Renewing cookies against {}", renewer.landing_url());

    let dispatcher = Dispatcher::new(renewer, config.max_workers, config.call_timeout());
    let schedule = config.schedule.clone();
    let driver = BatchDriver::new(store, dispatcher, config);

    match schedule {
        Some(schedule) => {
            let mut scheduler = driver::start_schedule(Arc::new(driver), &schedule).await?;

            // Keep the worker running
            tokio::signal::ctrl_c().await?;
            info!("Shutting down cookie renewal worker");
            scheduler.shutdown().await?;
        }
        None => {
            if let Err(e) = driver.run().await {
                error!("Cookie renewal run failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
