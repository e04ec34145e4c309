//! Shutdown coordination between the host window and the store.
//!
//! Closing the window must not race the debounce timer. A close request
//! is deferred, the interactive layer is asked to finish its work, and
//! only after it acknowledges (or the timeout fires) is the window torn
//! down:
//!
//! ```text
//!   Idle ──close──▶ AwaitingSave ──ack──▶ final save + settle ──▶ Closing ──▶ Idle
//!                        │                                          ▲
//!                        └──────────── timeout ─────────────────────┘
//! ```

use crate::error::Result;
use crate::store::Store;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing for the close handshake.
#[derive(Clone, Debug)]
pub struct ShutdownConfig {
    /// How long to wait for the interactive layer's acknowledgment.
    pub save_timeout: Duration,

    /// Pause after the final save before tearing down.
    pub settle_delay: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            save_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// The window (or other host surface) being closed.
pub trait HostWindow: Send + Sync {
    /// Tell the interactive layer a save is required before closing.
    fn notify_save_required(&self);

    /// Tear the window down.
    fn destroy(&self);
}

/// The write performed once the interactive layer has acknowledged.
pub trait FinalSave: Send + Sync {
    fn final_save(&self) -> Result<()>;
}

impl FinalSave for Store {
    fn final_save(&self) -> Result<()> {
        self.force_save()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    Idle,
    AwaitingSave,
    Closing,
}

/// How a close request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Acknowledged and the final save succeeded.
    Saved,
    /// Acknowledged but the final save failed; closed anyway.
    SaveFailed(String),
    /// No acknowledgment in time; closed without a final save.
    TimedOut,
    /// Another close request was already in flight.
    AlreadyClosing,
}

/// Sequences shutdown so a final save completes, or a bounded timeout
/// expires, before the host window is destroyed.
pub struct ShutdownCoordinator<F: FinalSave = Store> {
    target: Arc<F>,
    config: ShutdownConfig,
    state: Mutex<ShutdownState>,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
}

impl<F: FinalSave> ShutdownCoordinator<F> {
    pub fn new(target: Arc<F>, config: ShutdownConfig) -> Self {
        let (ack_tx, ack_rx) = unbounded();
        Self {
            target,
            config,
            state: Mutex::new(ShutdownState::Idle),
            ack_tx,
            ack_rx,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock()
    }

    /// Called when the interactive layer has flushed its own work.
    /// Ignored unless a close is awaiting it.
    pub fn acknowledge_save(&self) {
        if self.state() != ShutdownState::AwaitingSave {
            debug!("save acknowledgment with no close in progress, ignoring");
            return;
        }
        let _ = self.ack_tx.send(());
    }

    /// Run one close cycle, blocking until the window is destroyed.
    pub fn request_close(&self, window: &dyn HostWindow) -> CloseOutcome {
        {
            let mut state = self.state.lock();
            if *state != ShutdownState::Idle {
                debug!(state = ?*state, "close already in progress");
                return CloseOutcome::AlreadyClosing;
            }
            *state = ShutdownState::AwaitingSave;
        }

        // Acks from an earlier, timed-out cycle don't count.
        while self.ack_rx.try_recv().is_ok() {}

        info!(timeout = ?self.config.save_timeout, "close requested, waiting for save acknowledgment");
        window.notify_save_required();

        let outcome = match self.ack_rx.recv_timeout(self.config.save_timeout) {
            Ok(()) => match self.target.final_save() {
                Ok(()) => {
                    thread::sleep(self.config.settle_delay);
                    info!("final save complete");
                    CloseOutcome::Saved
                }
                Err(e) => {
                    error!(error = %e, "final save failed, closing anyway");
                    CloseOutcome::SaveFailed(e.to_string())
                }
            },
            Err(_) => {
                warn!(
                    timeout = ?self.config.save_timeout,
                    "no save acknowledgment, forcing close"
                );
                CloseOutcome::TimedOut
            }
        };

        *self.state.lock() = ShutdownState::Closing;
        window.destroy();
        *self.state.lock() = ShutdownState::Idle;

        outcome
    }
}

impl<F: FinalSave + 'static> ShutdownCoordinator<F> {
    /// Run the close cycle on a background thread so the host's close
    /// handler can return immediately with the default action suppressed.
    pub fn spawn_close<W: HostWindow + 'static>(
        self: &Arc<Self>,
        window: Arc<W>,
    ) -> std::io::Result<JoinHandle<CloseOutcome>> {
        let coordinator = Arc::clone(self);
        thread::Builder::new()
            .name("close-coordinator".into())
            .spawn(move || coordinator.request_close(window.as_ref()))
    }
}
