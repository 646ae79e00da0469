use anyhow::Result;
use tracing::{info, warn};

/// Fire-and-forget progress messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<()>;
}

/// Emits messages as log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        info!(target: "gwpop::notify", "{message}");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Send a message, logging instead of failing if delivery does not work.
pub fn send<N: Notifier + ?Sized>(notifier: &N, message: &str) {
    if let Err(err) = notifier.notify(message) {
        warn!(error = %err, "could not deliver notification");
    }
}
