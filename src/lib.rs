#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod board;
mod bxcan;
pub mod config;
pub mod filters;
mod interrupt;
mod message;
pub mod pac;
mod queue;
mod tx_rx;
mod util;

pub use board::{Board, ClockGate, Mcu, NvicLines};
pub use bxcan::{Can, DriverState};
pub use config::{BeginError, BitTiming, ModuleMode, Settings, TransmitPriority};
pub use filters::{Action, Callback, FilterError, Filters, Format, ListEntry, MaskEntry};
pub use interrupt::{CanInterrupt, InterruptBinding};
pub use message::{CanMessage, EXTENDED_IDENTIFIER_MAX, STANDARD_IDENTIFIER_MAX};
pub use pac::{Mmio, Reg, RegisterBlock};
pub use queue::FrameQueue;
pub use tx_rx::SendError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// [`InterruptBinding::init`] called a second time.
    AlreadyBound,
}
