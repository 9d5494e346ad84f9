use crate::constants::{iir, lcr, lsr, mcr};

/// The addressable 16550A register set for one channel.
///
/// Holding registers and the divisor latch are plain bytes here; which
/// of them a bus offset addresses is decided by the access layer using
/// the DLAB latch in LCR.
pub struct RegisterFile {
    pub rbr: u8, // Receive Buffer Register
    pub thr: u8, // Transmit Holding Register
    pub ier: u8, // Interrupt Enable Register
    pub iir: u8, // Interrupt Identification Register
    pub fcr: u8, // FIFO Control Register
    pub lcr: u8, // Line Control Register
    pub mcr: u8, // Modem Control Register
    pub lsr: u8, // Line Status Register
    pub msr: u8, // Modem Status Register
    pub scr: u8, // Scratch Register
    pub dll: u8, // Divisor Latch, low byte
    pub dlm: u8, // Divisor Latch, high byte
}

impl RegisterFile {
    /// Datasheet power-on state: no interrupt pending, FIFOs disabled,
    /// 5-bit words, OUT2 asserted, transmitter empty and idle.
    pub fn new() -> Self {
        RegisterFile {
            rbr: 0,
            thr: 0,
            ier: 0,
            iir: iir::NO_PENDING,
            fcr: 0,
            lcr: 0,
            mcr: mcr::OUT2,
            lsr: lsr::THRE | lsr::TEMT,
            msr: 0,
            scr: 0,
            dll: 0,
            dlm: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = RegisterFile::new();
    }

    /// Divisor latch access: offsets 0/1 address DLL/DLM while set.
    pub fn dlab(&self) -> bool {
        self.lcr & lcr::DLAB != 0
    }

    /// The 16-bit baud-rate divisor currently latched.
    pub fn divisor(&self) -> u16 {
        (self.dlm as u16) << 8 | self.dll as u16
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}
