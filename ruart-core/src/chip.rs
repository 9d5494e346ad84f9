use crate::constants::{fcr, ier, lsr, offsets, FIFO_DEPTH};
use crate::fifo::Fifo;
use crate::flush;
use crate::flush::FlushReason;
use crate::interrupt;
use crate::registers::RegisterFile;

use log::{debug, error};

/// Transmit bytes handed off by a flush, together with the trigger
/// that caused it. Delivery to the subscriber happens outside the
/// channel lock, so the bytes are copied out of the FIFO here.
pub struct TxFlush {
    pub reason: FlushReason,
    pub bytes: [u8; FIFO_DEPTH],
    pub len: usize,
}

impl TxFlush {
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Outcome of one register access. `value` carries the read result
/// (zero for writes); the rest is deferred work the caller performs
/// after dropping the channel lock.
pub struct Access {
    pub value: u8,
    pub flush: Option<TxFlush>,
    pub irq_pending: bool,
}

/// One emulated 16550A channel: register file plus both FIFOs.
///
/// The chip is purely synchronous and lock-free; serialization and
/// callback delivery belong to the layer that owns it.
pub struct Chip {
    regs: RegisterFile,
    rx: Fifo,
    tx: Fifo,
}

impl Chip {
    /// A channel in datasheet power-on state.
    pub fn new() -> Self {
        Chip {
            regs: RegisterFile::new(),
            rx: Fifo::new(),
            tx: Fifo::new(),
        }
    }

    /// Back to power-on state: registers at reset values, both FIFOs
    /// empty. Runs under the channel lock at creation time.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.rx.clear();
        self.tx.clear();
    }

    /// Register read at `offset` (0..=7), DLAB-multiplexed.
    pub fn read(&mut self, offset: u8) -> Access {
        let value = match offset {
            offsets::RBR if !self.regs.dlab() => self.read_rbr(),
            offsets::DLL => self.regs.dll,
            offsets::IER if !self.regs.dlab() => self.regs.ier,
            offsets::DLM => self.regs.dlm,
            offsets::IIR => self.regs.iir,
            offsets::LCR => self.regs.lcr,
            offsets::MCR => self.regs.mcr,
            offsets::LSR => {
                // Snapshot, then clear overrun as the read side effect
                let snapshot = self.regs.lsr;
                self.regs.lsr &= !lsr::OVERRUN;
                snapshot
            }
            offsets::MSR => self.regs.msr,
            offsets::SCR => self.regs.scr,
            _ => {
                error!("read from impossible register offset {}", offset);
                0
            }
        };
        let irq_pending = self.recompute_interrupt_state();
        Access {
            value,
            flush: None,
            irq_pending,
        }
    }

    /// Register write at `offset` (0..=7), DLAB-multiplexed.
    /// `tx_watermark` is the active flush subscription's threshold, if
    /// any, and only steers the transmit flush decision.
    pub fn write(&mut self, offset: u8, value: u8, tx_watermark: Option<usize>) -> Access {
        let mut tx_flush = None;
        match offset {
            offsets::THR if !self.regs.dlab() => {
                tx_flush = self.accept_tx(value, tx_watermark);
            }
            offsets::DLL => self.regs.dll = value,
            offsets::IER if !self.regs.dlab() => {
                let previous = self.regs.ier;
                self.regs.ier = value & ier::MASK;
                // Dropping the transmit-empty source mid-burst marks
                // the end of a transmission; hand off what accumulated.
                if previous & ier::THRE != 0
                    && self.regs.ier & ier::THRE == 0
                    && !self.tx.is_empty()
                {
                    tx_flush = Some(self.flush_tx(FlushReason::Idle));
                }
            }
            offsets::DLM => self.regs.dlm = value,
            offsets::FCR => {
                self.regs.fcr = value;
                if value & fcr::CLEAR_RX != 0 {
                    self.rx.clear();
                    self.regs.lsr &= !lsr::DATA_READY;
                }
                if value & fcr::CLEAR_TX != 0 {
                    self.tx.clear();
                    self.regs.lsr |= lsr::THRE | lsr::TEMT;
                }
            }
            offsets::LCR => self.regs.lcr = value,
            offsets::MCR => self.regs.mcr = value & crate::constants::mcr::MASK,
            offsets::LSR => {
                debug!("ignoring write {:#04x} to read-only LSR", value);
            }
            offsets::MSR => self.regs.msr = value,
            offsets::SCR => self.regs.scr = value,
            _ => error!("write to impossible register offset {}", offset),
        }
        let irq_pending = self.recompute_interrupt_state();
        Access {
            value: 0,
            flush: tx_flush,
            irq_pending,
        }
    }

    /// One byte arriving on the emulated wire. The byte always lands
    /// in RBR so non-FIFO reads see the latest value; a full FIFO sets
    /// overrun and drops the newest byte, never the queued ones.
    /// Returns whether an interrupt is pending afterwards.
    pub fn deliver_rx(&mut self, value: u8) -> bool {
        self.regs.rbr = value;
        if self.rx.push(value).is_err() {
            self.regs.lsr |= lsr::OVERRUN;
        } else {
            self.regs.lsr &= !lsr::OVERRUN;
            self.regs.lsr |= lsr::DATA_READY;
        }
        self.recompute_interrupt_state()
    }

    pub fn ier(&self) -> u8 {
        self.regs.ier
    }

    pub fn iir(&self) -> u8 {
        self.regs.iir
    }

    pub fn irq_pending(&self) -> bool {
        interrupt::pending(self.regs.iir)
    }

    /// Receive FIFO space still available to an injector.
    pub fn rx_free(&self) -> usize {
        self.rx.free()
    }

    fn read_rbr(&mut self) -> u8 {
        if let Some(byte) = self.rx.pop() {
            self.regs.rbr = byte;
        }
        if self.rx.is_empty() {
            self.regs.lsr &= !lsr::DATA_READY;
        }
        // Break/framing/parity have read-and-clear semantics on a data
        // read; overrun only clears on an explicit LSR read.
        self.regs.lsr &= !lsr::READ_CLEARED;
        self.regs.rbr
    }

    fn accept_tx(&mut self, value: u8, tx_watermark: Option<usize>) -> Option<TxFlush> {
        // A FIFO still sitting at capacity is handed off first so the
        // new byte has room.
        let mut tx_flush = flush::before_accept(self.tx.len()).map(|reason| self.flush_tx(reason));

        self.regs.thr = value;
        if self.tx.push(value).is_err() {
            self.regs.lsr |= lsr::OVERRUN;
        }
        self.regs.lsr &= !lsr::TEMT;
        // Holding-register-empty drops only once occupancy crosses
        // half capacity, not on reaching it
        if self.tx.len() > FIFO_DEPTH / 2 {
            self.regs.lsr &= !lsr::THRE;
        }

        if tx_flush.is_none() {
            tx_flush = flush::after_accept(self.tx.len(), tx_watermark)
                .map(|reason| self.flush_tx(reason));
        }
        tx_flush
    }

    /// Empties the transmit FIFO into a handoff buffer and restores
    /// the transmitter-empty status bits.
    fn flush_tx(&mut self, reason: FlushReason) -> TxFlush {
        let mut handoff = TxFlush {
            reason,
            bytes: [0; FIFO_DEPTH],
            len: 0,
        };
        handoff.len = self.tx.drain_into(&mut handoff.bytes);
        self.regs.lsr |= lsr::THRE | lsr::TEMT;
        handoff
    }

    /// Rederives IIR from the enable bits and current status. Runs
    /// after every register or FIFO mutation, while the channel lock
    /// is held. Returns whether the caller should wake the dispatcher.
    fn recompute_interrupt_state(&mut self) -> bool {
        self.regs.iir = interrupt::compute_iir(&self.regs, self.tx.is_empty());
        interrupt::pending(self.regs.iir)
    }
}

impl Default for Chip {
    fn default() -> Self {
        Chip::new()
    }
}
