#![cfg_attr(not(test), no_std)]

pub mod chip;
pub mod constants;
pub mod fifo;
pub mod flush;
pub mod interrupt;
pub mod registers;
