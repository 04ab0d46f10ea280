use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared interrupt flag, raised by the Ctrl-C handler and polled by long operations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Install a Ctrl-C handler that raises this token.
    pub fn install_ctrlc_handler(&self) -> anyhow::Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, stopping after the current step");
            token.cancel();
        })?;
        Ok(())
    }
}
