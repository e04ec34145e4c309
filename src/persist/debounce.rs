//! Debounced persistence actor.
//!
//! A single background thread owns the debounce state machine:
//!
//! ```text
//!            schedule                 deadline passes
//!   Idle ─────────────────▶ Scheduled ───────────────▶ Writing ──▶ Idle
//!     ▲                      │  ▲  │ schedule (re-arm)            ▲
//!     │                      │  └──┘                              │
//!     │                      └──────── flush ─────────────────────┘
//! ```
//!
//! Every transition happens on the actor thread, so "cancel the pending
//! timer and write now" cannot race a timer firing.

use crate::error::{Result, StoreError};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Something that can write the whole document to disk.
pub trait SaveTarget: Send + Sync + 'static {
    fn save(&self, backup_first: bool) -> Result<()>;
}

/// Observable phase of the debounce state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Scheduled,
    Writing,
}

enum Command {
    Schedule { backup_first: bool },
    Flush { backup_first: bool, reply: Sender<Result<()>> },
    Shutdown { reply: Sender<Result<()>> },
}

/// Handle to the persistence actor.
pub struct Persister {
    tx: Sender<Command>,
    pending: Arc<AtomicBool>,
    state: Arc<Mutex<DebounceState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    /// Start the actor thread.
    pub fn spawn<T: SaveTarget>(target: Arc<T>, debounce: Duration) -> Result<Self> {
        let (tx, rx) = unbounded();
        let pending = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(DebounceState::Idle));

        let worker = Worker {
            target,
            rx,
            debounce,
            pending: Arc::clone(&pending),
            state: Arc::clone(&state),
        };
        let handle = thread::Builder::new()
            .name("store-persister".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            pending,
            state,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Mark a save as due and (re)arm the debounce timer.
    pub fn schedule(&self, backup_first: bool) {
        self.pending.store(true, Ordering::SeqCst);
        if self.tx.send(Command::Schedule { backup_first }).is_err() {
            debug!("persister stopped, dropping scheduled save");
        }
    }

    /// Cancel any pending timer and write now, waiting for the result.
    pub fn flush(&self, backup_first: bool) -> Result<()> {
        let (reply, result) = bounded(1);
        self.tx
            .send(Command::Flush { backup_first, reply })
            .map_err(|_| StoreError::ShuttingDown)?;
        result.recv().map_err(|_| StoreError::ShuttingDown)?
    }

    /// Whether a save is due but not yet written.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> DebounceState {
        *self.state.lock()
    }

    /// Write anything pending, then stop the actor. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };

        let (reply, result) = bounded(1);
        let outcome = match self.tx.send(Command::Shutdown { reply }) {
            Ok(()) => result.recv().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };

        if handle.join().is_err() {
            error!("persister thread panicked");
        }
        outcome
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "final save on drop failed");
        }
    }
}

struct Worker<T: SaveTarget> {
    target: Arc<T>,
    rx: Receiver<Command>,
    debounce: Duration,
    pending: Arc<AtomicBool>,
    state: Arc<Mutex<DebounceState>>,
}

impl<T: SaveTarget> Worker<T> {
    fn run(self) {
        // Some((deadline, backup_first)) while Scheduled.
        let mut scheduled: Option<(Instant, bool)> = None;

        loop {
            let command = match scheduled {
                None => match self.rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
                Some((deadline, _)) => match self.rx.recv_deadline(deadline) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        if let Err(e) = self.write_if_pending(scheduled.take()) {
                            error!(error = %e, "final save failed");
                        }
                        break;
                    }
                },
            };

            match command {
                None => {
                    let backup_first = scheduled.take().map_or(false, |(_, b)| b);
                    self.write_logged(backup_first);
                }
                Some(Command::Schedule { backup_first }) => {
                    let backup_first =
                        backup_first || scheduled.map_or(false, |(_, b)| b);
                    scheduled = Some((Instant::now() + self.debounce, backup_first));
                    self.pending.store(true, Ordering::SeqCst);
                    self.set_state(DebounceState::Scheduled);
                    debug!(debounce = ?self.debounce, "save scheduled");
                }
                Some(Command::Flush { backup_first, reply }) => {
                    let backup_first =
                        backup_first || scheduled.take().map_or(false, |(_, b)| b);
                    let result = self.write(backup_first);
                    let _ = reply.send(result);
                }
                Some(Command::Shutdown { reply }) => {
                    let result = self.write_if_pending(scheduled.take());
                    let _ = reply.send(result);
                    break;
                }
            }
        }

        self.set_state(DebounceState::Idle);
    }

    fn write(&self, backup_first: bool) -> Result<()> {
        self.set_state(DebounceState::Writing);
        self.pending.store(false, Ordering::SeqCst);
        let result = self.target.save(backup_first);
        if result.is_err() {
            // Let the next mutation or forced save retry.
            self.pending.store(true, Ordering::SeqCst);
        }
        self.set_state(DebounceState::Idle);
        result
    }

    // A failed earlier write leaves `pending` set with no timer armed;
    // that save is still owed.
    fn write_if_pending(&self, scheduled: Option<(Instant, bool)>) -> Result<()> {
        let backup_first = scheduled.map(|(_, b)| b);
        if backup_first.is_none() && !self.pending.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.write(backup_first.unwrap_or(false))
    }

    // Background path: nobody is waiting, so errors are logged only.
    fn write_logged(&self, backup_first: bool) {
        if let Err(e) = self.write(backup_first) {
            error!(error = %e, "debounced save failed");
        }
    }

    fn set_state(&self, state: DebounceState) {
        *self.state.lock() = state;
    }
}
