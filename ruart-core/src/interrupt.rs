use crate::constants::{fcr, ier, iir, lsr};
use crate::registers::RegisterFile;

/// Derives the IIR value from the enable bits, line status and
/// transmit occupancy. Sources are evaluated in descending hardware
/// priority; the first enabled source with its condition true wins and
/// lower-priority sources are not considered.
pub fn compute_iir(regs: &RegisterFile, tx_empty: bool) -> u8 {
    // Bits 6-7 mirror the FIFO-enable state regardless of the chain
    let fifo_bits = if regs.fcr & fcr::ENABLE != 0 {
        iir::FIFO_ENABLED
    } else {
        0
    };

    if regs.ier & ier::RLS != 0 && regs.lsr & lsr::ERROR_BITS != 0 {
        fifo_bits | iir::RLS
    } else if regs.ier & ier::RDA != 0 && regs.lsr & lsr::DATA_READY != 0 {
        fifo_bits | iir::RDA
    } else if regs.ier & ier::THRE != 0 && (regs.lsr & lsr::TEMT != 0 || tx_empty) {
        fifo_bits | iir::THRE
    } else {
        fifo_bits | iir::NO_PENDING
    }
}

/// True when the IIR value reports a pending interrupt.
pub fn pending(iir_value: u8) -> bool {
    iir_value & iir::NO_PENDING == 0
}
