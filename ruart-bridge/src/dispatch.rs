use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, warn};

use crate::bridge::LineShared;

/// Message on a dispatcher's wake channel.
pub(crate) enum Signal {
    /// The interrupt calculator left the channel pending
    Pending,
    /// Cooperative shutdown request
    Stop,
}

/// Background worker standing in for a physical interrupt line.
///
/// Exists only while interrupts are enabled for its channel; the
/// channel's wake sender is the sole producer for its signal queue.
pub(crate) struct Dispatcher {
    wake: Sender<Signal>,
    worker: thread::JoinHandle<()>,
}

impl Dispatcher {
    pub(crate) fn spawn(shared: Arc<LineShared>) -> io::Result<Dispatcher> {
        let (wake, signals) = unbounded();
        let index = shared.index;
        let worker = thread::Builder::new()
            .name(format!("ruart-irq-{}", index))
            .spawn(move || worker_loop(shared, signals))?;
        Ok(Dispatcher { wake, worker })
    }

    /// A non-blocking handle for waking the worker; safe to use while
    /// the channel lock is held or just released.
    pub(crate) fn wake_sender(&self) -> Sender<Signal> {
        self.wake.clone()
    }

    /// Cooperative, synchronous shutdown: signal, then block until
    /// the worker has observed the stop and exited. A stop issued from
    /// the worker's own thread (the host driver masking IER from
    /// inside its interrupt handler) only signals; the worker then
    /// exits on its own instead of joining itself.
    pub(crate) fn stop(self) {
        let _ = self.wake.send(Signal::Stop);
        if thread::current().id() == self.worker.thread().id() {
            warn!("dispatcher stop issued from its own worker; skipping join");
            return;
        }
        if self.worker.join().is_err() {
            error!("interrupt worker panicked before shutdown");
        }
    }
}

fn worker_loop(shared: Arc<LineShared>, signals: Receiver<Signal>) {
    debug!("line {}: interrupt worker running", shared.index);
    loop {
        match signals.recv() {
            Ok(Signal::Pending) => {}
            Ok(Signal::Stop) | Err(_) => break,
        }
        // Wake-ups can be stale by the time the worker runs; re-check
        // under the lock and snapshot what the handler needs.
        let (iir_value, handler) = match shared.pending_irq() {
            Some(snapshot) => snapshot,
            None => continue,
        };
        match handler {
            // The callback runs with no locks held so the host driver
            // may re-enter register access from inside it.
            Some(callback) => callback(iir_value),
            None => warn!(
                "line {}: interrupt pending but no handler attached; dropping wake-up",
                shared.index
            ),
        }
    }
    debug!("line {}: interrupt worker stopped", shared.index);
}
