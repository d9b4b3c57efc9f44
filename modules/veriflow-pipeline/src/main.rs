use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use veriflow_common::Config;
use veriflow_notify::{DispatchSettings, ExpoPushBackend, NoopBackend, NotificationDispatcher, PushBackend};
use veriflow_pipeline::health::{self, HealthState};
use veriflow_pipeline::http::{HttpCollaborators, ServiceClient};
use veriflow_pipeline::{workers, PipelineDeps, PipelineSettings};
use veriflow_queue::{PgBroker, QueueManager};
use veriflow_store::{PgCooldownCache, PgNotificationStore, PgUserDirectory, PgVerificationStore, VerificationStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("veriflow=info".parse()?);
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Veriflow worker starting...");
    config.log_redacted();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    veriflow_store::migrate(&pool).await?;
    info!("Migrations complete");

    let store: Arc<dyn VerificationStore> = Arc::new(PgVerificationStore::new(pool.clone()));
    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let broker = Arc::new(PgBroker::new(pool.clone()));
    let queue = Arc::new(QueueManager::new(broker.clone()).with_poll_interval(config.poll_interval));

    // Expo push if configured, otherwise Noop
    let push: Arc<dyn PushBackend> = if config.push_endpoint.is_empty() {
        info!("No PUSH_ENDPOINT set, push notifications disabled");
        Arc::new(NoopBackend)
    } else {
        Arc::new(ExpoPushBackend::new(
            config.push_endpoint.clone(),
            config.push_access_token.clone(),
        ))
    };
    let notifier = Arc::new(NotificationDispatcher::new(
        push,
        users.clone(),
        Arc::new(PgNotificationStore::new(pool.clone())),
        Arc::new(PgCooldownCache::new(pool.clone())),
        DispatchSettings::from_config(&config),
    ));

    let collaborators = Arc::new(HttpCollaborators::new(ServiceClient::new(
        &config.collaborator_url,
        config.collaborator_api_key.clone(),
    )?));

    let deps = PipelineDeps::builder()
        .store(store.clone())
        .users(users)
        .queue(queue.clone())
        .notifier(notifier)
        .ocr(collaborators.clone())
        .validity(collaborators.clone())
        .fact_checker(collaborators.clone())
        .scorer(collaborators.clone())
        .translator(collaborators.clone())
        .scraper(collaborators.clone())
        .parser(collaborators.clone())
        .storage(collaborators.clone())
        .images(collaborators.clone())
        .video(collaborators.clone())
        .transcriber(collaborators.clone())
        .summarizer(collaborators.clone())
        .transcoder(collaborators)
        .settings(PipelineSettings::from_config(&config))
        .build();

    let handles = workers::start_all(&deps, &config).await?;
    info!(subscriptions = handles.len(), "Workers subscribed");

    let shutdown = CancellationToken::new();
    let health_task = tokio::spawn(health::serve(
        config.health_port,
        HealthState {
            store,
            broker,
        },
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    queue.close().await;
    match health_task.await {
        Ok(Err(e)) => error!(error = %e, "Health endpoint failed"),
        Err(e) => error!(error = %e, "Health task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Veriflow worker stopped");
    Ok(())
}
