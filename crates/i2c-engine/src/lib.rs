#![no_std]
//! Interrupt- and DMA-driven two-wire bus master engine.
//!
//! Sensor drivers register as slaves, then start register reads and writes
//! that run on DMA in the background. Each bus carries one transaction at a
//! time; the DMA completion interrupt closes the frame, returns the bus to
//! idle and calls the slave's [`CompletionCallback`].
//!
//! The board wires three things to an [`I2cEngine`]:
//!
//! - an [`I2cPeripheral`] implementation per physical instance,
//! - the RX/TX DMA transfer-complete interrupts, forwarded to
//!   [`I2cEngine::on_rx_complete`] / [`I2cEngine::on_tx_complete`],
//! - a delay source for [`I2cEngine::wait_standby`].
//!
//! Ordinary transactions poll hardware with no timeout. A missing device or
//! a lost completion interrupt wedges the bus; detecting that is left to an
//! external watchdog.

// Must come first so the log macros are visible to the other modules.
mod fmt;

mod bus;
mod callback;
mod engine;
mod error;
mod hal;
mod registry;
mod wait;

#[cfg(feature = "mock")]
pub mod mock;

pub use bus::{BusId, MAX_BUSES};
pub use callback::{CompletionCallback, NoopCallback};
pub use engine::{
    AddressWidth, I2cEngine, STANDBY_MAX_TRIALS, STANDBY_RETRY_INTERVAL_MS,
};
pub use error::BusError;
pub use hal::{Direction, DmaBuffer, Event, Flag, I2cPeripheral, Stream};
pub use registry::{
    AtomicSlaveHandle, SlaveDevice, SlaveHandle, SlaveRegistry,
    DEFAULT_SLAVE_CAPACITY,
};
