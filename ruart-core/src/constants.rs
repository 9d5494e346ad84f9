// Bytes per transfer direction in the emulated 16550A FIFOs
pub const FIFO_DEPTH: usize = 16;

pub mod offsets {
    // Register offsets relative to the channel base (0..=7)
    pub const RBR: u8 = 0; // Receive Buffer Register (read)
    pub const THR: u8 = 0; // Transmit Holding Register (write)
    pub const IER: u8 = 1; // Interrupt Enable Register
    pub const IIR: u8 = 2; // Interrupt Identification Register (read)
    pub const FCR: u8 = 2; // FIFO Control Register (write)
    pub const LCR: u8 = 3; // Line Control Register
    pub const MCR: u8 = 4; // Modem Control Register
    pub const LSR: u8 = 5; // Line Status Register
    pub const MSR: u8 = 6; // Modem Status Register
    pub const SCR: u8 = 7; // Scratch Register

    // Divisor latch bytes share offsets 0/1 while LCR.DLAB is set
    pub const DLL: u8 = 0;
    pub const DLM: u8 = 1;
}

pub mod ier {
    // Interrupt Enable Register bits
    pub const RDA: u8 = 0x01; // Received data available
    pub const THRE: u8 = 0x02; // Transmitter holding register empty
    pub const RLS: u8 = 0x04; // Receiver line status
    pub const MODEM: u8 = 0x08; // Modem status change

    pub const MASK: u8 = 0x0F; // Upper nibble reads back as zero
}

pub mod iir {
    // Interrupt Identification Register encoding
    pub const NO_PENDING: u8 = 0x01; // Set when no interrupt is pending
    pub const THRE: u8 = 0x02; // Priority 3: transmitter empty
    pub const RDA: u8 = 0x04; // Priority 2: received data available
    pub const RLS: u8 = 0x06; // Priority 1: receiver line status

    pub const FIFO_ENABLED: u8 = 0xC0; // Mirrors FCR bit 0 in bits 6-7
}

pub mod fcr {
    // FIFO Control Register bits
    pub const ENABLE: u8 = 0x01;
    pub const CLEAR_RX: u8 = 0x02;
    pub const CLEAR_TX: u8 = 0x04;
}

pub mod lcr {
    // Line Control Register bits
    pub const DLAB: u8 = 0x80; // Divisor latch access
}

pub mod mcr {
    // Modem Control Register bits
    pub const OUT2: u8 = 0x08; // Auxiliary output 2, set at power-on

    pub const MASK: u8 = 0x1F; // Bits 5-7 are not wired
}

pub mod lsr {
    // Line Status Register bits
    pub const DATA_READY: u8 = 0x01;
    pub const OVERRUN: u8 = 0x02;
    pub const PARITY_ERROR: u8 = 0x04;
    pub const FRAMING_ERROR: u8 = 0x08;
    pub const BREAK: u8 = 0x10;
    pub const THRE: u8 = 0x20; // Transmitter holding register empty
    pub const TEMT: u8 = 0x40; // Transmitter fully idle

    // The receiver-line-status interrupt sources
    pub const ERROR_BITS: u8 = OVERRUN | PARITY_ERROR | FRAMING_ERROR | BREAK;

    // Break, framing and parity clear on a data read; overrun does not
    pub const READ_CLEARED: u8 = PARITY_ERROR | FRAMING_ERROR | BREAK;
}
