use crate::constants::FIFO_DEPTH;

/// Why the transmit FIFO was handed to the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// Occupancy reached the subscriber's configured byte threshold
    Threshold,
    /// The transmit-empty interrupt was disabled mid-burst
    Idle,
    /// Occupancy reached the hard FIFO capacity with no threshold hit
    Full,
}

/// Flush decision taken before a byte is accepted: a FIFO still
/// sitting at capacity is handed off so the new byte has room.
pub fn before_accept(occupancy: usize) -> Option<FlushReason> {
    if occupancy >= FIFO_DEPTH {
        Some(FlushReason::Full)
    } else {
        None
    }
}

/// Flush decision taken after a byte landed in the FIFO. A
/// caller-configured threshold always outranks the implicit capacity
/// event, so a threshold equal to the FIFO depth reports `Threshold`
/// on the filling byte and `Full` never fires. Thresholds beyond the
/// FIFO depth can never trigger; only idle and capacity flushes apply.
pub fn after_accept(occupancy: usize, watermark: Option<usize>) -> Option<FlushReason> {
    match watermark {
        Some(mark) if mark <= FIFO_DEPTH && occupancy >= mark => Some(FlushReason::Threshold),
        _ => None,
    }
}

#[cfg(test)]
mod flush_tests {
    use super::*;

    #[test]
    fn threshold_fires_at_watermark() {
        assert_eq!(after_accept(9, Some(10)), None);
        assert_eq!(after_accept(10, Some(10)), Some(FlushReason::Threshold));
    }

    #[test]
    fn capacity_watermark_outranks_full() {
        // Threshold equal to the FIFO depth wins the tie on the byte
        // that fills the queue; the capacity path never gets a look-in.
        assert_eq!(
            after_accept(FIFO_DEPTH, Some(FIFO_DEPTH)),
            Some(FlushReason::Threshold)
        );
    }

    #[test]
    fn oversized_watermark_never_triggers() {
        assert_eq!(after_accept(FIFO_DEPTH, Some(FIFO_DEPTH + 4)), None);
        assert_eq!(
            before_accept(FIFO_DEPTH),
            Some(FlushReason::Full)
        );
    }

    #[test]
    fn no_watermark_leaves_only_capacity() {
        assert_eq!(after_accept(FIFO_DEPTH, None), None);
        assert_eq!(before_accept(FIFO_DEPTH - 1), None);
        assert_eq!(before_accept(FIFO_DEPTH), Some(FlushReason::Full));
    }
}
