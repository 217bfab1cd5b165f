//! Cancellation from process signals
//!
//! SIGINT and SIGTERM are turned into a [`CancellationToken`] that the
//! long-running operations observe. Nothing here exits the process.

use console::style;
use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Receives user-facing progress messages
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes messages to stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str) {
        let _ = writeln!(std::io::stderr(), "{} {}", style("ℹ").blue(), message);
    }
}

/// Keeps messages in memory
#[derive(Debug, Clone, Default)]
pub struct BufferNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl BufferNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Notifier for BufferNotifier {
    fn notify(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

/// Message written when a release is cancelled by a signal
pub fn cancellation_message(release: &str) -> String {
    format!("Release of {} has been cancelled.", release)
}

/// Cancel a token on SIGINT or SIGTERM
///
/// Spawns one listener task on the current tokio runtime. When a signal
/// arrives the notifier is told the release was cancelled and the token is
/// cancelled. The task exits if the token is cancelled by anyone else.
pub fn listen_for_shutdown(
    release: impl Into<String>,
    notifier: Arc<dyn Notifier>,
) -> CancellationToken {
    cancel_on(shutdown_signal(), release, notifier)
}

/// Cancel a token when `signal` completes
pub fn cancel_on<F>(
    signal: F,
    release: impl Into<String>,
    notifier: Arc<dyn Notifier>,
) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let listener = token.clone();
    let release = release.into();

    tokio::spawn(async move {
        tokio::select! {
            _ = signal => {
                tracing::info!(release = %release, "shutdown signal received");
                notifier.notify(&cancellation_message(&release));
                listener.cancel();
            }
            _ = listener.cancelled() => {}
        }
    });

    token
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
