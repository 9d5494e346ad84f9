use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, warn};

use ruart_core::chip::Chip;
use ruart_core::constants::FIFO_DEPTH;

use crate::dispatch::{Dispatcher, Signal};
use crate::{Error, IrqCallback, TxCallback};

/// Channels in the fixed line table.
pub const MAX_LINES: usize = 4;

/// Clock feeding the emulated baud-rate generator, in Hz.
pub const BAUD_BASE: u32 = 115_200;

// Classic PC identities for the four lines: base port and IRQ
const LINE_IDENTITIES: [(u16, u8); MAX_LINES] = [(0x3F8, 4), (0x2F8, 3), (0x3E8, 4), (0x2E8, 3)];

/// A poisoned channel lock still guards coherent chip state; keep
/// serving rather than propagate a panic into the host driver.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configured I/O identity and liveness of one line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineInfo {
    pub base_addr: u16,
    pub irq: u8,
    pub baud_base: u32,
    pub live: bool,
}

/// The transmit-flush consumer attached to a channel: callback plus
/// the byte threshold that triggers delivery.
struct FlushSubscription {
    callback: TxCallback,
    threshold: usize,
}

/// Everything a live channel owns. Exists from `add_device` to
/// `remove_device`; the FIFOs live inside the chip and are freed with
/// it.
struct ChannelState {
    chip: Chip,
    flush: Option<FlushSubscription>,
    irq_handler: Option<IrqCallback>,
    wake: Option<crossbeam_channel::Sender<Signal>>,
}

/// Per-line state shared with the channel's dispatcher worker.
/// `slot` is the channel lock; `None` means the line has no device.
pub(crate) struct LineShared {
    pub(crate) index: usize,
    slot: Mutex<Option<ChannelState>>,
}

impl LineShared {
    /// Worker-side snapshot: the IIR value and handler to invoke, or
    /// `None` when the wake-up turned out to be stale.
    pub(crate) fn pending_irq(&self) -> Option<(u8, Option<IrqCallback>)> {
        let slot = lock(&self.slot);
        let state = slot.as_ref()?;
        if !state.chip.irq_pending() {
            return None;
        }
        Some((state.chip.iir(), state.irq_handler.clone()))
    }
}

struct Line {
    shared: Arc<LineShared>,
    // Taken before slot when nested, and never held across a join
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Line {
    fn new(index: usize) -> Self {
        Line {
            shared: Arc::new(LineShared {
                index,
                slot: Mutex::new(None),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// Disabled -> Running: spawn the interrupt worker and publish its
    /// wake handle. A condition that became pending before the worker
    /// existed is signalled immediately.
    fn start_dispatcher(&self) {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.is_some() {
            return;
        }
        match Dispatcher::spawn(Arc::clone(&self.shared)) {
            Ok(handle) => {
                let wake = handle.wake_sender();
                let pending = {
                    let mut slot = lock(&self.shared.slot);
                    match slot.as_mut() {
                        Some(state) => {
                            state.wake = Some(wake.clone());
                            state.chip.irq_pending()
                        }
                        None => false,
                    }
                };
                if pending {
                    let _ = wake.send(Signal::Pending);
                }
                *dispatcher = Some(handle);
            }
            Err(e) => error!(
                "line {}: could not spawn interrupt worker: {}",
                self.shared.index, e
            ),
        }
    }

    /// Running -> Stopping -> Disabled: retract the wake handle,
    /// signal the worker and wait for it to exit.
    fn stop_dispatcher(&self) {
        {
            let mut slot = lock(&self.shared.slot);
            if let Some(state) = slot.as_mut() {
                state.wake = None;
            }
        }
        let handle = lock(&self.dispatcher).take();
        // The join runs with the dispatcher lock dropped: the worker
        // may be inside the host's callback re-entering register
        // access, and an IER transition there takes this same lock.
        match handle {
            Some(handle) => handle.stop(),
            None => debug!("line {}: interrupt worker already stopped", self.shared.index),
        }
    }
}

/// The fixed table of emulated channels and the register read/write
/// entry points an unmodified 16550A host driver calls into.
pub struct UartBridge {
    lines: [Line; MAX_LINES],
}

impl UartBridge {
    pub fn new() -> Self {
        UartBridge {
            lines: std::array::from_fn(Line::new),
        }
    }

    fn line(&self, index: usize) -> Result<&Line, Error> {
        self.lines.get(index).ok_or(Error::InvalidLine(index))
    }

    /// Brings a channel to life: chip in power-on state, both FIFOs
    /// allocated and empty.
    pub fn add_device(&self, line: usize) -> Result<(), Error> {
        let entry = self.line(line)?;
        let mut slot = lock(&entry.shared.slot);
        if slot.is_some() {
            return Err(Error::AlreadyAdded(line));
        }
        *slot = Some(ChannelState {
            chip: Chip::new(),
            flush: None,
            irq_handler: None,
            wake: None,
        });
        let (base_addr, irq) = LINE_IDENTITIES[line];
        debug!("line {}: device added (base {:#06x}, irq {})", line, base_addr, irq);
        Ok(())
    }

    /// Tears a channel down. The interrupt worker is stopped and
    /// joined first, so no callback can fire once this returns; the
    /// flush subscription and FIFOs go with the channel state.
    pub fn remove_device(&self, line: usize) -> Result<(), Error> {
        let entry = self.line(line)?;
        if lock(&entry.shared.slot).is_none() {
            return Err(Error::NotAdded(line));
        }
        entry.stop_dispatcher();
        *lock(&entry.shared.slot) = None;
        debug!("line {}: device removed", line);
        Ok(())
    }

    /// Feeds received bytes to the channel, as if they arrived on the
    /// wire. Accepts at most the free FIFO space and reports how many
    /// bytes landed; a full FIFO yields `Ok(0)`, not an error.
    pub fn inject_rx(&self, line: usize, bytes: &[u8]) -> Result<usize, Error> {
        if bytes.len() > FIFO_DEPTH {
            return Err(Error::TooManyBytes(bytes.len()));
        }
        let entry = self.line(line)?;
        let mut pending = false;
        let accepted;
        let wake = {
            let mut slot = lock(&entry.shared.slot);
            let state = slot.as_mut().ok_or(Error::NotAdded(line))?;
            accepted = state.chip.rx_free().min(bytes.len());
            for &byte in &bytes[..accepted] {
                pending = state.chip.deliver_rx(byte);
            }
            if pending {
                state.wake.clone()
            } else {
                None
            }
        };
        if let Some(sender) = wake {
            let _ = sender.send(Signal::Pending);
        }
        Ok(accepted)
    }

    /// Installs or clears the transmit flush subscription, atomically
    /// under the channel lock. Without one, flushed bytes are
    /// discarded.
    pub fn set_tx_callback(
        &self,
        line: usize,
        callback: Option<TxCallback>,
        threshold: usize,
    ) -> Result<(), Error> {
        let entry = self.line(line)?;
        let mut slot = lock(&entry.shared.slot);
        let state = slot.as_mut().ok_or(Error::NotAdded(line))?;
        state.flush = callback.map(|callback| FlushSubscription {
            callback,
            threshold,
        });
        Ok(())
    }

    /// Attaches or clears the host driver's interrupt handler. While
    /// absent, pending wake-ups are dropped with a warning.
    pub fn set_irq_callback(&self, line: usize, callback: Option<IrqCallback>) -> Result<(), Error> {
        let entry = self.line(line)?;
        let mut slot = lock(&entry.shared.slot);
        let state = slot.as_mut().ok_or(Error::NotAdded(line))?;
        state.irq_handler = callback;
        Ok(())
    }

    /// The configured identity of a line and whether it is live.
    pub fn line_info(&self, line: usize) -> Result<LineInfo, Error> {
        let entry = self.line(line)?;
        let (base_addr, irq) = LINE_IDENTITIES[line];
        Ok(LineInfo {
            base_addr,
            irq,
            baud_base: BAUD_BASE,
            live: lock(&entry.shared.slot).is_some(),
        })
    }

    /// Synchronized register read. Never fails toward the host
    /// driver: bad lines and offsets log and read as zero.
    pub fn read(&self, line: usize, offset: u8) -> u8 {
        self.access(line, offset, None)
    }

    /// Synchronized register write. Never fails toward the host
    /// driver: bad lines and offsets log and are ignored.
    pub fn write(&self, line: usize, offset: u8, value: u8) {
        self.access(line, offset, Some(value));
    }

    /// The shared access path: take the channel lock, mutate the chip,
    /// recompute interrupt state, then run the deferred work (flush
    /// delivery, dispatcher transitions, wake-ups) with the lock
    /// dropped.
    fn access(&self, line: usize, offset: u8, value: Option<u8>) -> u8 {
        let entry = match self.line(line) {
            Ok(entry) => entry,
            Err(_) => {
                error!("register access on invalid line {}", line);
                return 0;
            }
        };

        let ier_before;
        let ier_after;
        let access;
        let flush_callback;
        let wake = {
            let mut slot = lock(&entry.shared.slot);
            let state = match slot.as_mut() {
                Some(state) => state,
                None => {
                    warn!("line {}: register access before add_device", line);
                    return 0;
                }
            };
            let watermark = state.flush.as_ref().map(|sub| sub.threshold);
            ier_before = state.chip.ier();
            access = match value {
                Some(byte) => state.chip.write(offset, byte, watermark),
                None => state.chip.read(offset),
            };
            ier_after = state.chip.ier();
            flush_callback = match access.flush {
                Some(_) => state.flush.as_ref().map(|sub| Arc::clone(&sub.callback)),
                None => None,
            };
            if access.irq_pending {
                state.wake.clone()
            } else {
                None
            }
        };

        if let Some(handoff) = &access.flush {
            match &flush_callback {
                Some(callback) => callback(handoff.data(), handoff.reason),
                None => debug!(
                    "line {}: discarding {} flushed bytes ({:?}), no subscription",
                    line,
                    handoff.len,
                    handoff.reason
                ),
            }
        }

        if ier_before == 0 && ier_after != 0 {
            entry.start_dispatcher();
        } else if ier_before != 0 && ier_after == 0 {
            entry.stop_dispatcher();
        } else if let Some(sender) = wake {
            let _ = sender.send(Signal::Pending);
        }

        access.value
    }
}

impl Default for UartBridge {
    fn default() -> Self {
        UartBridge::new()
    }
}

#[cfg(test)]
mod bridge_tests {
    use super::*;
    use crate::FlushReason;
    use ruart_core::constants::{ier, lsr, offsets};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn live_bridge(line: usize) -> UartBridge {
        let bridge = UartBridge::new();
        bridge.add_device(line).unwrap();
        bridge
    }

    #[test]
    fn lifecycle_usage_errors() {
        let bridge = UartBridge::new();
        assert_eq!(bridge.add_device(MAX_LINES), Err(Error::InvalidLine(MAX_LINES)));
        assert_eq!(bridge.remove_device(1), Err(Error::NotAdded(1)));

        bridge.add_device(1).unwrap();
        assert_eq!(bridge.add_device(1), Err(Error::AlreadyAdded(1)));
        bridge.remove_device(1).unwrap();
        assert_eq!(bridge.remove_device(1), Err(Error::NotAdded(1)));
        assert_eq!(bridge.inject_rx(1, b"x"), Err(Error::NotAdded(1)));
    }

    #[test]
    fn facade_never_errors_toward_the_driver() {
        let bridge = UartBridge::new();
        // Unknown line, uninitialized line, impossible offset
        assert_eq!(bridge.read(9, offsets::LSR), 0);
        assert_eq!(bridge.read(0, offsets::LSR), 0);
        bridge.write(0, offsets::THR, b'x');

        bridge.add_device(0).unwrap();
        assert_eq!(bridge.read(0, 12), 0);
        bridge.write(0, 12, 0xFF);
        assert_eq!(bridge.read(0, offsets::LSR), lsr::THRE | lsr::TEMT);
    }

    #[test]
    fn injected_bytes_round_trip() {
        let bridge = live_bridge(0);
        assert_eq!(bridge.inject_rx(0, b"AB"), Ok(2));
        assert_eq!(bridge.read(0, offsets::RBR), b'A');
        assert_ne!(bridge.read(0, offsets::LSR) & lsr::DATA_READY, 0);
        assert_eq!(bridge.read(0, offsets::RBR), b'B');
        assert_eq!(bridge.read(0, offsets::LSR) & lsr::DATA_READY, 0);
    }

    #[test]
    fn injection_respects_fifo_capacity() {
        let bridge = live_bridge(2);
        assert_eq!(
            bridge.inject_rx(2, &[0u8; FIFO_DEPTH + 1]),
            Err(Error::TooManyBytes(FIFO_DEPTH + 1))
        );
        assert_eq!(bridge.inject_rx(2, &[7u8; FIFO_DEPTH]), Ok(FIFO_DEPTH));
        // Full FIFO: zero bytes accepted, not an error
        assert_eq!(bridge.inject_rx(2, b"more"), Ok(0));

        // Partial acceptance once some space frees up
        for _ in 0..4 {
            bridge.read(2, offsets::RBR);
        }
        assert_eq!(bridge.inject_rx(2, b"12345678"), Ok(4));
    }

    #[test]
    fn threshold_flush_reaches_subscriber() {
        let bridge = live_bridge(0);
        let seen: Arc<Mutex<Vec<(Vec<u8>, FlushReason)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: TxCallback = Arc::new(move |bytes, reason| {
            sink.lock().unwrap().push((bytes.to_vec(), reason));
        });
        bridge.set_tx_callback(0, Some(callback), 4).unwrap();

        for byte in b"wxyz" {
            bridge.write(0, offsets::THR, *byte);
        }
        let flushes = seen.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].0, b"wxyz");
        assert_eq!(flushes[0].1, FlushReason::Threshold);
    }

    #[test]
    fn disabling_thre_interrupt_flushes_idle_tail() {
        let bridge = live_bridge(0);
        let seen: Arc<Mutex<Vec<(Vec<u8>, FlushReason)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: TxCallback = Arc::new(move |bytes, reason| {
            sink.lock().unwrap().push((bytes.to_vec(), reason));
        });
        bridge.set_tx_callback(0, Some(callback), 10).unwrap();

        bridge.write(0, offsets::IER, ier::THRE);
        for byte in b"hello" {
            bridge.write(0, offsets::THR, *byte);
        }
        assert!(seen.lock().unwrap().is_empty());

        // End of burst: returns only after the worker has stopped
        bridge.write(0, offsets::IER, 0);
        let flushes = seen.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].0, b"hello");
        assert_eq!(flushes[0].1, FlushReason::Idle);
    }

    #[test]
    fn dispatcher_invokes_handler_with_iir() {
        let bridge = live_bridge(1);
        let (fired, interrupts) = crossbeam_channel::unbounded();
        let handler: IrqCallback = Arc::new(move |iir_value| {
            let _ = fired.send(iir_value);
        });
        bridge.set_irq_callback(1, Some(handler)).unwrap();
        bridge.write(1, offsets::IER, ier::RDA);

        bridge.inject_rx(1, b"!").unwrap();
        let iir_value = interrupts
            .recv_timeout(Duration::from_secs(5))
            .expect("virtual interrupt");
        assert_eq!(iir_value & 0x0F, 0x04); // received-data-available

        bridge.remove_device(1).unwrap();
    }

    #[test]
    fn no_callback_after_disable_or_remove() {
        let bridge = live_bridge(0);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: IrqCallback = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        bridge.set_irq_callback(0, Some(handler)).unwrap();

        bridge.write(0, offsets::IER, ier::RDA);
        bridge.inject_rx(0, b"a").unwrap();
        bridge.write(0, offsets::IER, 0); // joins the worker

        let fired = count.load(Ordering::SeqCst);
        bridge.inject_rx(0, b"b").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), fired);

        bridge.write(0, offsets::IER, ier::RDA);
        bridge.remove_device(0).unwrap();
        let fired = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn reentrant_register_access_from_handler() {
        // A handler that behaves like a real driver ISR: drain RX and
        // echo it back through THR.
        let bridge = Arc::new(UartBridge::new());
        bridge.add_device(3).unwrap();

        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: TxCallback = Arc::new(move |bytes, _| {
            sink.lock().unwrap().extend_from_slice(bytes);
        });
        bridge.set_tx_callback(3, Some(callback), 4).unwrap();

        let isr_bridge = Arc::clone(&bridge);
        let handler: IrqCallback = Arc::new(move |_| {
            while isr_bridge.read(3, offsets::LSR) & lsr::DATA_READY != 0 {
                let byte = isr_bridge.read(3, offsets::RBR);
                isr_bridge.write(3, offsets::THR, byte);
            }
        });
        bridge.set_irq_callback(3, Some(handler)).unwrap();
        bridge.write(3, offsets::IER, ier::RDA);

        bridge.inject_rx(3, b"ping").unwrap();
        for _ in 0..100 {
            if seen.lock().unwrap().len() >= 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(&*seen.lock().unwrap(), b"ping");

        bridge.remove_device(3).unwrap();
    }

    #[test]
    fn masking_returns_while_handler_rewrites_ier() {
        // A driver ISR may itself write IER while another context is
        // masking interrupts; the disabling write must still return.
        let bridge = Arc::new(UartBridge::new());
        bridge.add_device(2).unwrap();

        let (entered, in_handler) = crossbeam_channel::bounded(1);
        let (resume, hold) = crossbeam_channel::bounded::<()>(1);
        let first = Arc::new(AtomicBool::new(true));
        let isr_bridge = Arc::clone(&bridge);
        let handler: IrqCallback = Arc::new(move |_| {
            if first.swap(false, Ordering::SeqCst) {
                let _ = entered.send(());
                // Stay inside the callback until the mask is underway,
                // then re-enable from here
                let _ = hold.recv_timeout(Duration::from_secs(5));
                isr_bridge.write(2, offsets::IER, ier::RDA);
            } else {
                while isr_bridge.read(2, offsets::LSR) & lsr::DATA_READY != 0 {
                    isr_bridge.read(2, offsets::RBR);
                }
            }
        });
        bridge.set_irq_callback(2, Some(handler)).unwrap();
        bridge.write(2, offsets::IER, ier::RDA);
        bridge.inject_rx(2, b"x").unwrap();
        in_handler
            .recv_timeout(Duration::from_secs(5))
            .expect("interrupt callback");

        let (done, disabled) = crossbeam_channel::bounded(1);
        let masking = Arc::clone(&bridge);
        std::thread::spawn(move || {
            masking.write(2, offsets::IER, 0);
            let _ = done.send(());
        });
        // Let the mask reach the worker join before the ISR resumes
        std::thread::sleep(Duration::from_millis(50));
        let _ = resume.send(());
        disabled
            .recv_timeout(Duration::from_secs(5))
            .expect("disabling write returned");

        bridge.remove_device(2).unwrap();
    }

    #[test]
    fn line_info_reports_identity_and_liveness() {
        let bridge = UartBridge::new();
        let info = bridge.line_info(0).unwrap();
        assert_eq!(info.base_addr, 0x3F8);
        assert_eq!(info.irq, 4);
        assert_eq!(info.baud_base, BAUD_BASE);
        assert!(!info.live);

        bridge.add_device(0).unwrap();
        assert!(bridge.line_info(0).unwrap().live);
        assert_eq!(bridge.line_info(MAX_LINES), Err(Error::InvalidLine(MAX_LINES)));
    }
}
