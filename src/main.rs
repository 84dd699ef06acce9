use std::{sync::Arc, time::Duration};

use anyhow::Context;
use mailminder::{
    appsettings::{AppSettings, StoreBackend},
    delivery::SmtpMailTransport,
    dispatch::DispatchJob,
    scheduling::DispatchScheduler,
    server::{self, AppState},
    storage::{AppwriteReminderStore, InMemoryReminderStorage, ReminderStore},
};
use tokio_util::sync::CancellationToken;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    let settings = AppSettings::load().context("failed to load application settings")?;

    let store: Arc<dyn ReminderStore> = match settings.store.backend {
        StoreBackend::Appwrite => Arc::new(
            AppwriteReminderStore::new(settings.appwrite())
                .context("failed to create reminder store client")?,
        ),
        StoreBackend::Memory => {
            log::warn!("Using in-memory reminder store, reminders will not survive a restart");
            Arc::new(InMemoryReminderStorage::new())
        }
    };

    let transport = Arc::new(
        SmtpMailTransport::new(settings.smtp()).context("failed to create SMTP transport")?,
    );
    let zone = settings
        .reference_zone()
        .context("invalid dispatch.reference_timezone")?;

    let job = Arc::new(DispatchJob::new(
        store,
        transport,
        zone,
        settings.dispatch_settings(),
    ));

    let cancellation_token = CancellationToken::new();
    let scheduled = DispatchScheduler::spawn(
        job.clone(),
        settings.dispatch_interval(),
        cancellation_token.clone(),
    );

    let mut server_task = settings.server.enabled.then(|| {
        let state = AppState {
            job: job.clone(),
            api_token: settings.server.api_token.clone(),
        };
        tokio::spawn(server::serve(
            state,
            settings.server.bind,
            cancellation_token.child_token(),
        ))
    });

    let server_exit = async {
        match server_task.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    let server_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            log::info!("Shutting down");
            None
        }
        exited = server_exit => {
            log::error!("HTTP server stopped unexpectedly, shutting down");
            Some(exited)
        }
    };

    cancellation_token.cancel();
    scheduled.cancel(SHUTDOWN_TIMEOUT).await;

    let server_result = match (server_result, server_task) {
        (Some(exited), _) => Some(exited),
        (None, Some(handle)) => Some(handle.await),
        (None, None) => None,
    };

    if let Some(exited) = server_result {
        exited
            .context("server task panicked")?
            .context("server failed")?;
    }

    Ok(())
}
