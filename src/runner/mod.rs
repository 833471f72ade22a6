pub mod artifacts;
pub mod events;
pub mod launch;
pub mod queue;
pub mod reconciler;
pub mod session;
pub mod state;

use crate::client::{LaunchSummary, PortalClient, ReportService};
use crate::utils::config::ReporterConfig;
use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use tokio::io::AsyncBufRead;

pub use artifacts::ArtifactBinder;
pub use events::*;
pub use session::ReportingSession;
pub use state::*;

/// What a reporting run left behind
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub events: usize,
    pub failed_writes: usize,
    pub summary: Option<LaunchSummary>,
}

/// Report a stream of lifecycle events to ReportPortal
pub async fn run_reporter<R>(config: &ReporterConfig, reader: R) -> Result<RunOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let service: Arc<dyn ReportService> = Arc::new(PortalClient::from_config(config)?);
    let binder = ArtifactBinder::from_config(config);
    run_with_service(service, config, binder, reader).await
}

/// Drive a session over an event stream with the given collaborators
pub async fn run_with_service<R>(
    service: Arc<dyn ReportService>,
    config: &ReporterConfig,
    binder: ArtifactBinder,
    reader: R,
) -> Result<RunOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut session = ReportingSession::new(service, config, binder)?;
    let mut stream = EventStream::new(reader);
    let mut events = 0;

    while let Some(event) = stream.next_event().await? {
        events += 1;
        if let Err(e) = session.handle(event).await {
            if e.is_fatal() {
                return Err(e.into());
            }
            log::error!("{}", e);
        }
    }

    session.shutdown().await;

    let failed_writes = session.failed_writes();
    if failed_writes > 0 {
        println!(
            "{} {} report writes failed, see log for details",
            "⚠️".yellow(),
            failed_writes
        );
    }

    Ok(RunOutcome {
        events,
        failed_writes,
        summary: session.summary().cloned(),
    })
}
