#![no_std]
//! MAG3110 three-axis magnetometer on the [`i2c_engine`] bus master.
//!
//! Every data-ready edge starts a DMA read of the six output registers into
//! the next slot of a [`CaptureRing`]. The control loop then calls
//! [`Mag3110::decode`], which averages whatever captures have landed and
//! runs them through the [`CalibrationModel`].
//!
//! Board wiring, in order:
//!
//! 1. [`Mag3110::register`] before the engine runs;
//! 2. [`Mag3110::init`] from a task, with the parameter store and the
//!    [`DataReadyLine`] whose interrupt calls [`Mag3110::on_data_ready`];
//! 3. [`Mag3110::enable`], then [`Mag3110::decode`] each control cycle.

// Must come first so the log macros are visible to the other modules.
mod fmt;

mod calibration;
mod driver;
mod error;
pub mod registers;
mod ring;

pub use calibration::{
    Alignment, CalibrationModel, Flip, Param, ParamStore, Rotation, TempPoly,
    PARAM_COUNT,
};
pub use driver::{DataReadyLine, Mag3110, Mag3110Config, Reading, State};
pub use error::Error;
pub use micromath::vector::F32x3;
pub use ring::{CaptureRing, SAMPLE_BYTES, SLOTS, SLOT_SIZE};
