//! Extension runtime orchestrator.
//!
//! Wires the span buffer and export client into a single flush operation and
//! drives it from Extensions API lifecycle events:
//! - `INVOKE` flushes under a fixed short budget, independent of the event's
//!   own deadline, then returns to polling.
//! - `SHUTDOWN` flushes under exactly the time remaining until the host's
//!   deadline, then terminates; there is no next cycle to defer to.
//!
//! The ingestion listener and the poll-and-flush loop are the only two
//! long-lived activities; they share nothing but the buffer.

use crate::buffer::SpanBuffer;
use crate::config::Config;
use crate::exporter::{ExportClient, SendError};
use crate::lifecycle::{ExtensionClient, LifecycleError, LifecycleEvent};
use crate::receiver::TraceReceiver;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

const RECEIVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors from the extension runtime.
///
/// Everything here is fatal to the process; per-cycle failures (poll errors,
/// failed flushes) are logged and absorbed by the loop instead.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Failed to create the export client.
    #[error("failed to create export client")]
    Exporter(#[source] SendError),

    /// Failed to bind the trace receiver listener.
    #[error("failed to start trace receiver")]
    ReceiverStart(#[source] std::io::Error),

    /// No Extensions API address configured outside local mode.
    #[error("AWS_LAMBDA_RUNTIME_API is not configured")]
    MissingRuntimeApi,

    /// Registration with the Extensions API failed.
    #[error("could not register with the extensions api")]
    Register(#[source] LifecycleError),
}

/// Runtime that owns the receiver, the buffer, and the lifecycle loop.
pub struct ExtensionRuntime {
    config: Config,
    cancel_token: CancellationToken,
}

impl ExtensionRuntime {
    /// Creates a new runtime with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Returns a handle to the process-wide cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Runs the extension until shutdown.
    ///
    /// Starts the trace receiver, installs the signal handler, then either
    /// blocks until cancellation (local mode) or registers with the
    /// Extensions API and enters the poll-and-flush loop.
    ///
    /// # Errors
    ///
    /// Returns an error if a component fails to start or registration fails;
    /// both are unrecoverable.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let buffer = Arc::new(SpanBuffer::new(self.config.buffer.capacity));
        let exporter = ExportClient::new(&self.config.exporter).map_err(RuntimeError::Exporter)?;
        tracing::debug!(destination = exporter.endpoint(), "export client ready");

        let receiver = TraceReceiver::new(
            self.config.receiver.clone(),
            Arc::clone(&buffer),
            self.cancel_token.clone(),
        );
        let (receiver_handle, receiver_future) = receiver
            .start()
            .await
            .map_err(RuntimeError::ReceiverStart)?;
        let receiver_task = tokio::spawn(receiver_future);
        tracing::debug!(url = receiver_handle.url(), "ingestion listening");

        spawn_signal_handler(self.cancel_token.clone());

        let result = if self.config.lifecycle.local_mode {
            tracing::info!("local mode, skipping registration and waiting for a signal");
            self.cancel_token.cancelled().await;
            Ok(())
        } else {
            self.event_loop(&buffer, &exporter).await
        };

        self.cancel_token.cancel();
        let _ = tokio::time::timeout(RECEIVER_SHUTDOWN_GRACE, receiver_task).await;

        result
    }

    async fn event_loop(
        &self,
        buffer: &SpanBuffer,
        exporter: &ExportClient,
    ) -> Result<(), RuntimeError> {
        let runtime_api = self
            .config
            .lifecycle
            .runtime_api
            .as_deref()
            .ok_or(RuntimeError::MissingRuntimeApi)?;

        let mut client =
            ExtensionClient::new(runtime_api, self.config.lifecycle.resolve_extension_name());
        let metadata = client.register().await.map_err(RuntimeError::Register)?;
        tracing::info!(
            function = %metadata.function_name,
            version = %metadata.function_version,
            "registered with extensions api"
        );

        loop {
            let event = tokio::select! {
                // Dropping the poll future aborts the in-flight long-poll
                // connection.
                _ = self.cancel_token.cancelled() => {
                    tracing::info!("cancelled, leaving event loop");
                    return Ok(());
                }
                event = client.next_event() => event,
            };

            match event {
                Err(e) => {
                    tracing::warn!(error = %e, "next-event poll failed, re-polling");
                }
                Ok(LifecycleEvent::Invoke { request_id, .. }) => {
                    // Fixed short budget: the invocation's own deadline may be
                    // minutes away, while the environment freezes as soon as
                    // this loop polls again.
                    tracing::debug!(%request_id, "invoke event");
                    self.flush(buffer, exporter, self.config.lifecycle.invoke_flush_budget)
                        .await;
                }
                Ok(LifecycleEvent::Shutdown {
                    deadline_ms,
                    shutdown_reason,
                }) => {
                    let budget = remaining_until(deadline_ms);
                    tracing::info!(
                        reason = shutdown_reason.as_deref().unwrap_or("unknown"),
                        budget_ms = budget.as_millis() as u64,
                        "shutdown event, final flush"
                    );
                    self.flush(buffer, exporter, budget).await;
                    return Ok(());
                }
            }
        }
    }

    /// Drains the buffer and, if non-empty, exports the batch within
    /// `budget`. At most one flush runs at a time: flushes are issued only
    /// from the single-threaded event loop.
    async fn flush(&self, buffer: &SpanBuffer, exporter: &ExportClient, budget: Duration) {
        let units = buffer.drain_all();
        if units.is_empty() {
            tracing::debug!("nothing buffered, skipping export");
            return;
        }

        let groups = units.len();
        let started = Instant::now();
        match exporter.send(budget, units).await {
            Ok(status) if status.is_success() => {
                tracing::info!(
                    groups,
                    status = status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "flush completed"
                );
            }
            Ok(status) => {
                tracing::warn!(groups, status = status.as_u16(), "destination rejected batch");
            }
            Err(e) => {
                tracing::error!(groups, error = %e, "flush failed, batch lost");
            }
        }
    }
}

/// Time remaining until a millisecond-epoch deadline, saturating at zero.
fn remaining_until(deadline_ms: i64) -> Duration {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;

    Duration::from_millis((deadline_ms - now_ms).max(0) as u64)
}

fn spawn_signal_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received interrupt, shutting down");
        }

        cancel_token.cancel();
    });
}
