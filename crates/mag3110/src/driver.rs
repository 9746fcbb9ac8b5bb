use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;
use i2c_engine::{
    AddressWidth, AtomicSlaveHandle, BusError, BusId, CompletionCallback,
    I2cEngine, I2cPeripheral, SlaveHandle, DEFAULT_SLAVE_CAPACITY,
};
use micromath::vector::F32x3;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::calibration::{CalibrationModel, ParamStore};
use crate::error::Error;
use crate::registers::{
    CtrlReg1, CtrlReg2, Register, DEFAULT_ADDRESS, WHO_AM_I_VALUE,
};
use crate::ring::{CaptureRing, SLOTS};

/// The Z output counts opposite to X and Y relative to the board frame.
const WIRING: [f32; 3] = [1.0, 1.0, -1.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mag3110Config {
    pub bus: BusId,
    pub address: u8,
    /// WHO_AM_I reads before giving up.
    pub probe_retries: u32,
    pub probe_interval_ms: u32,
    /// Pause after each configuration write.
    pub settle_ms: u32,
    /// Gauss per LSB.
    pub lsb_scale: f32,
}

impl Default for Mag3110Config {
    fn default() -> Self {
        Self {
            bus: BusId::I2c1,
            address: DEFAULT_ADDRESS,
            probe_retries: 5,
            probe_interval_ms: 100,
            settle_ms: 10,
            // 1 LSB = 1 mG
            lsb_scale: 1.0 / 1000.0,
        }
    }
}

impl Mag3110Config {
    pub fn with_bus(mut self, bus: BusId) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_probe_retries(mut self, retries: u32) -> Self {
        self.probe_retries = retries;
        self
    }

    pub fn with_probe_interval_ms(mut self, ms: u32) -> Self {
        self.probe_interval_ms = ms;
        self
    }

    pub fn with_settle_ms(mut self, ms: u32) -> Self {
        self.settle_ms = ms;
        self
    }

    pub fn with_lsb_scale(mut self, scale: f32) -> Self {
        self.lsb_scale = scale;
        self
    }
}

/// Driver lifecycle.
///
/// `Uninitialized → Registered → Probing → Configured → Enabled ⇄ Disabled`.
/// A failed probe lands in `Disabled` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    Uninitialized,
    Registered,
    Probing,
    Configured,
    Enabled,
    Disabled,
}

/// The board's data-ready edge interrupt for the sensor's INT pin.
pub trait DataReadyLine {
    /// Start delivering rising edges to [`Mag3110::on_data_ready`].
    fn enable_rising_edge(&mut self);
}

/// One decode pass worth of output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Averaged, orientation-corrected gauss before calibration.
    ///
    /// Z already carries the sensor's inverted wiring: it is the negated
    /// register value. Bias fits made from this vector must negate their Z
    /// term, since [`CalibrationModel::apply_bias`] subtracts it.
    pub raw: F32x3,
    pub calibrated: F32x3,
    pub timestamp: Instant,
}

pub struct Mag3110<
    'd,
    'a,
    M: RawMutex,
    P: I2cPeripheral,
    const N: usize = DEFAULT_SLAVE_CAPACITY,
> {
    engine: &'d I2cEngine<'a, M, P, N>,
    ring: &'a CaptureRing,
    config: Mag3110Config,
    state: AtomicU8,
    configured: AtomicBool,
    slave: AtomicSlaveHandle,
    calibration: Mutex<M, Cell<CalibrationModel>>,
    reading: Mutex<M, Cell<Option<Reading>>>,
}

impl<'d, 'a, M: RawMutex, P: I2cPeripheral, const N: usize>
    Mag3110<'d, 'a, M, P, N>
{
    pub const fn new(
        engine: &'d I2cEngine<'a, M, P, N>,
        ring: &'a CaptureRing,
        config: Mag3110Config,
    ) -> Self {
        Self {
            engine,
            ring,
            config,
            state: AtomicU8::new(State::Uninitialized as u8),
            configured: AtomicBool::new(false),
            slave: AtomicSlaveHandle::none(),
            calibration: Mutex::new(Cell::new(CalibrationModel::IDENTITY)),
            reading: Mutex::new(Cell::new(None)),
        }
    }

    /// Register with the bus engine. Completions advance the capture ring.
    pub fn register(&self) -> Result<SlaveHandle, Error> {
        if self.state() != State::Uninitialized {
            return Err(Error::InvalidState);
        }
        let callback: &'a dyn CompletionCallback = self.ring;
        let handle = self.engine.register_slave(
            self.config.bus,
            self.config.address,
            Some(callback),
        )?;
        self.slave.store(Some(handle));
        self.set_state(State::Registered);
        Ok(handle)
    }

    /// Load calibration, probe the part, configure continuous 80 Hz
    /// measurement and enable the data-ready line.
    ///
    /// On any failure the sensor is left [`State::Disabled`] and cannot be
    /// enabled again.
    pub async fn init<S, D, L>(
        &self,
        store: &S,
        delay: &mut D,
        line: &mut L,
    ) -> Result<(), Error>
    where
        S: ParamStore + ?Sized,
        D: DelayNs,
        L: DataReadyLine,
    {
        let slave = self.slave().ok_or(Error::NotRegistered)?;
        if self.state() != State::Registered {
            return Err(Error::InvalidState);
        }

        let model = CalibrationModel::load(store);
        self.calibration.lock(|c| c.set(model));

        self.set_state(State::Probing);
        if let Err(e) = self.bring_up(slave, delay).await {
            self.set_state(State::Disabled);
            return Err(e);
        }

        self.configured.store(true, Ordering::Release);
        self.set_state(State::Configured);
        line.enable_rising_edge();
        info!(
            "mag3110 ready on {} at {:#x}",
            self.config.bus,
            self.config.address
        );
        Ok(())
    }

    async fn bring_up<D: DelayNs>(
        &self,
        slave: SlaveHandle,
        delay: &mut D,
    ) -> Result<(), Error> {
        if !self.probe(slave, delay).await? {
            error!(
                "mag3110 not found after {} attempts",
                self.config.probe_retries
            );
            return Err(Error::ProbeFailed);
        }

        self.engine
            .write_byte(
                slave,
                AddressWidth::Bits8,
                Register::CtrlReg2.addr(),
                CtrlReg2::AUTO_MRST_EN.bits(),
            )
            .await?;
        delay.delay_ms(self.config.settle_ms).await;

        self.engine
            .write_byte(
                slave,
                AddressWidth::Bits8,
                Register::CtrlReg1.addr(),
                CtrlReg1::ACTIVE.bits(),
            )
            .await?;
        delay.delay_ms(self.config.settle_ms).await;
        Ok(())
    }

    async fn probe<D: DelayNs>(
        &self,
        slave: SlaveHandle,
        delay: &mut D,
    ) -> Result<bool, BusError> {
        let retries = self.config.probe_retries;
        for attempt in 1..=retries {
            let id = self
                .engine
                .read_byte(slave, AddressWidth::Bits8, Register::WhoAmI.addr())
                .await?;
            if id == WHO_AM_I_VALUE {
                return Ok(true);
            }
            trace!("WHO_AM_I {:#x} ({} of {})", id, attempt, retries);
            if attempt < retries {
                delay.delay_ms(self.config.probe_interval_ms).await;
            }
        }
        Ok(false)
    }

    /// Start acting on data-ready edges. Only valid once configured.
    pub fn enable(&self) -> Result<(), Error> {
        if !self.configured.load(Ordering::Acquire) {
            return Err(Error::InvalidState);
        }
        self.set_state(State::Enabled);
        Ok(())
    }

    /// Ignore data-ready edges from now on. A capture already in flight
    /// still completes.
    pub fn disable(&self) {
        if self.configured.load(Ordering::Acquire) {
            self.set_state(State::Disabled);
        }
    }

    /// Data-ready edge handler. Call from the interrupt, at a priority no
    /// higher than the engine's DMA completion interrupt. Takes no lock.
    ///
    /// Starts a capture into the slot at the ring cursor. If the bus is
    /// still busy the edge is dropped; the previous capture is then simply
    /// excluded from the next decode.
    pub fn on_data_ready(&self) {
        if self.state() != State::Enabled {
            return;
        }
        let Some(slave) = self.slave() else {
            return;
        };
        let buffer = self.ring.slot_buffer(self.ring.cursor());
        match self.engine.try_begin_read(
            slave,
            AddressWidth::Bits8,
            Register::OutXMsb.addr(),
            buffer,
        ) {
            Ok(()) => {}
            Err(BusError::Busy) => trace!("data ready on busy bus, skipped"),
            Err(e) => warn!("capture not started: {}", e),
        }
    }

    /// Average the completed captures and run them through calibration.
    ///
    /// `temperature` drives the compensation polynomials. `now` stamps the
    /// result and must come from a monotonic clock, normally
    /// [`Instant::now`]. Returns `None`, keeping the previous reading, when the
    /// sensor is not enabled.
    pub fn decode(&self, temperature: f32, now: Instant) -> Option<Reading> {
        if self.state() != State::Enabled {
            return None;
        }

        let in_flight = self.engine.is_busy(self.config.bus);
        let cursor = self.ring.cursor();

        let mut sums = [0i32; 3];
        let mut used = 0u32;
        for slot in 0..SLOTS {
            if slot == cursor && in_flight {
                continue;
            }
            for (sum, sample) in sums.iter_mut().zip(self.ring.sample(slot)) {
                *sum += i32::from(sample);
            }
            used += 1;
        }
        if used == 0 {
            return None;
        }

        let model = self.calibration();
        let signs = model.flip.signs();
        let scale = self.config.lsb_scale / used as f32;
        let axis = |i: usize| sums[i] as f32 * scale * signs[i] * WIRING[i];
        let raw = F32x3 { x: axis(0), y: axis(1), z: axis(2) };

        let reading = Reading {
            raw,
            calibrated: model.apply(raw, temperature),
            timestamp: now,
        };
        self.reading.lock(|r| r.set(Some(reading)));
        Some(reading)
    }

    pub fn state(&self) -> State {
        State::try_from(self.state.load(Ordering::Acquire))
            .unwrap_or(State::Disabled)
    }

    fn set_state(&self, state: State) {
        self.state.store(state.into(), Ordering::Release);
    }

    pub fn slave(&self) -> Option<SlaveHandle> {
        self.slave.load()
    }

    pub fn config(&self) -> &Mag3110Config {
        &self.config
    }

    pub fn calibration(&self) -> CalibrationModel {
        self.calibration.lock(Cell::get)
    }

    /// Latest decode output.
    pub fn reading(&self) -> Option<Reading> {
        self.reading.lock(Cell::get)
    }

    pub fn raw(&self) -> Option<F32x3> {
        self.reading().map(|r| r.raw)
    }

    pub fn calibrated(&self) -> Option<F32x3> {
        self.reading().map(|r| r.calibrated)
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.reading().map(|r| r.timestamp)
    }
}
