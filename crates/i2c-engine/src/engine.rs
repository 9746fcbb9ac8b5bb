use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;

use crate::bus::{BusId, BusState, MAX_BUSES};
use crate::callback::{CompletionCallback, NOOP_CALLBACK};
use crate::error::BusError;
use crate::hal::{Direction, DmaBuffer, Event, Flag, I2cPeripheral, Stream};
use crate::registry::{
    SlaveDevice, SlaveHandle, SlaveRegistry, DEFAULT_SLAVE_CAPACITY,
};
use crate::wait::{self, Attempt};

/// Address attempts made by [`I2cEngine::wait_standby`] before giving up.
pub const STANDBY_MAX_TRIALS: u32 = 10;
/// Pause between standby attempts; slow devices such as EEPROMs need it.
pub const STANDBY_RETRY_INTERVAL_MS: u32 = 1;

/// Width of the register address sent before the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressWidth {
    /// One address byte (sensor register maps).
    Bits8,
    /// High byte then low byte (EEPROMs).
    Bits16,
}

/// Interrupt- and DMA-driven master engine for up to [`MAX_BUSES`] buses.
///
/// Multi-byte transfers are armed on DMA and return immediately; the
/// matching completion handler ([`on_rx_complete`](Self::on_rx_complete) /
/// [`on_tx_complete`](Self::on_tx_complete)) closes the transaction from
/// interrupt context and calls the slave's [`CompletionCallback`].
/// Single-byte transfers run to completion synchronously and do not call
/// back.
///
/// Each bus carries at most one transaction at a time. A new request waits,
/// yielding to the executor, until the bus is idle.
pub struct I2cEngine<
    'a,
    M: RawMutex,
    P: I2cPeripheral,
    const N: usize = DEFAULT_SLAVE_CAPACITY,
> {
    ports: [Option<P>; MAX_BUSES],
    buses: [BusState; MAX_BUSES],
    registry: SlaveRegistry<'a, M, N>,
}

impl<'a, M: RawMutex, P: I2cPeripheral, const N: usize> I2cEngine<'a, M, P, N> {
    /// Create an engine over the present peripheral instances, indexed by
    /// [`BusId`]. `None` marks an instance the board does not provide.
    pub const fn new(ports: [Option<P>; MAX_BUSES]) -> Self {
        Self {
            ports,
            buses: [BusState::new(), BusState::new(), BusState::new()],
            registry: SlaveRegistry::new(),
        }
    }

    /// Initialize every present bus. Already initialized buses are skipped.
    pub fn init(&self) {
        for bus in BusId::ALL {
            if let Ok(port) = self.port(bus) {
                self.init_bus(bus, port);
            }
        }
    }

    /// Register a slave, initializing its bus on first use.
    ///
    /// Without a callback, completions on this slave are silently dropped.
    pub fn register_slave(
        &self,
        bus: BusId,
        address: u8,
        callback: Option<&'a dyn CompletionCallback>,
    ) -> Result<SlaveHandle, BusError> {
        if address > 0x7F {
            return Err(BusError::InvalidAddress(address));
        }
        let port = match self.port(bus) {
            Ok(port) => port,
            Err(e) => {
                warn!("register {:#x}: bus {} not present", address, bus);
                return Err(e);
            }
        };
        self.init_bus(bus, port);

        let callback = callback.unwrap_or(&NOOP_CALLBACK);
        match self.registry.insert(bus, address, callback) {
            Ok(handle) => {
                debug!(
                    "registered slave {:#x} on {} as {}",
                    address,
                    bus,
                    handle.index()
                );
                Ok(handle)
            }
            Err(e) => {
                warn!("register {:#x} on {} failed: {}", address, bus, e);
                Err(e)
            }
        }
    }

    /// Look up a registered slave. Lock-free.
    pub fn slave(&self, handle: SlaveHandle) -> Option<SlaveDevice<'a>> {
        self.registry.get(handle)
    }

    pub fn slave_count(&self) -> usize {
        self.registry.len()
    }

    /// The peripheral behind `bus`, if the board provides one.
    pub fn peripheral(&self, bus: BusId) -> Option<&P> {
        self.ports[bus.index()].as_ref()
    }

    pub fn is_initialized(&self, bus: BusId) -> bool {
        self.state(bus).is_initialized()
    }

    /// Whether `bus` has a transaction in flight. Safe to poll from any
    /// context; a single atomic load.
    pub fn is_busy(&self, bus: BusId) -> bool {
        self.state(bus).is_busy()
    }

    /// The slave owning `bus`, present exactly while the bus is busy.
    pub fn active_slave(&self, bus: BusId) -> Option<SlaveHandle> {
        self.state(bus).active()
    }

    /// Read `buffer.len()` bytes starting at `register`.
    ///
    /// Two or more bytes: waits for the bus, addresses the register, arms
    /// the RX stream and returns; the slave's callback fires when the data
    /// has landed. Fewer than two: completes synchronously before
    /// returning, without a callback.
    ///
    /// The address phases have no timeout.
    pub async fn begin_read(
        &self,
        slave: SlaveHandle,
        width: AddressWidth,
        register: u16,
        buffer: DmaBuffer,
    ) -> Result<(), BusError> {
        let (dev, port) = self.resolve(slave)?;
        if buffer.is_empty() {
            return Ok(());
        }
        self.claim(dev.bus, slave).await;
        self.start_read(&dev, port, width, register, buffer);
        Ok(())
    }

    /// Like [`begin_read`](Self::begin_read) but never waits for the bus:
    /// returns [`BusError::Busy`] if a transaction is in flight. Intended
    /// for interrupt handlers, which cannot yield.
    pub fn try_begin_read(
        &self,
        slave: SlaveHandle,
        width: AddressWidth,
        register: u16,
        buffer: DmaBuffer,
    ) -> Result<(), BusError> {
        let (dev, port) = self.resolve(slave)?;
        if buffer.is_empty() {
            return Ok(());
        }
        if !self.state(dev.bus).try_claim(slave) {
            return Err(BusError::Busy);
        }
        self.start_read(&dev, port, width, register, buffer);
        Ok(())
    }

    /// Write `buffer` starting at `register`. Same completion rules as
    /// [`begin_read`](Self::begin_read); the buffer must stay untouched
    /// until the callback fires.
    pub async fn begin_write(
        &self,
        slave: SlaveHandle,
        width: AddressWidth,
        register: u16,
        buffer: DmaBuffer,
    ) -> Result<(), BusError> {
        let (dev, port) = self.resolve(slave)?;
        if buffer.is_empty() {
            return Ok(());
        }
        self.claim(dev.bus, slave).await;
        self.start_write(&dev, port, width, register, buffer);
        Ok(())
    }

    /// Non-waiting variant of [`begin_write`](Self::begin_write).
    pub fn try_begin_write(
        &self,
        slave: SlaveHandle,
        width: AddressWidth,
        register: u16,
        buffer: DmaBuffer,
    ) -> Result<(), BusError> {
        let (dev, port) = self.resolve(slave)?;
        if buffer.is_empty() {
            return Ok(());
        }
        if !self.state(dev.bus).try_claim(slave) {
            return Err(BusError::Busy);
        }
        self.start_write(&dev, port, width, register, buffer);
        Ok(())
    }

    /// Read one register synchronously.
    pub async fn read_byte(
        &self,
        slave: SlaveHandle,
        width: AddressWidth,
        register: u16,
    ) -> Result<u8, BusError> {
        let (dev, port) = self.resolve(slave)?;
        self.claim(dev.bus, slave).await;
        let value = polled_read(port, dev.address, width, register);
        self.state(dev.bus).release();
        Ok(value)
    }

    /// Write one register synchronously.
    pub async fn write_byte(
        &self,
        slave: SlaveHandle,
        width: AddressWidth,
        register: u16,
        value: u8,
    ) -> Result<(), BusError> {
        let (dev, port) = self.resolve(slave)?;
        self.claim(dev.bus, slave).await;
        polled_write(port, dev.address, width, register, value);
        self.state(dev.bus).release();
        Ok(())
    }

    /// Poll the slave with bare address frames until it acknowledges.
    ///
    /// Used after EEPROM page writes, where the device ignores its address
    /// while the internal write cycle runs. Gives up with
    /// [`BusError::StandbyTimeout`] after [`STANDBY_MAX_TRIALS`] attempts.
    pub async fn wait_standby<D: DelayNs>(
        &self,
        slave: SlaveHandle,
        delay: &mut D,
    ) -> Result<(), BusError> {
        let (dev, port) = self.resolve(slave)?;
        self.claim(dev.bus, slave).await;

        let acknowledged = wait::retry_bounded(
            STANDBY_MAX_TRIALS,
            STANDBY_RETRY_INTERVAL_MS,
            delay,
            || {
                port.generate_start();
                wait::until_event(port, Event::MasterModeSelect);
                port.send_address(dev.address, Direction::Transmitter);
                wait::until(|| {
                    port.flag(Flag::AddressSent)
                        || port.flag(Flag::AcknowledgeFailure)
                });

                if port.flag(Flag::AddressSent) {
                    port.clear_address_flag();
                    port.generate_stop();
                    Attempt::Done
                } else {
                    port.clear_ack_failure();
                    Attempt::Retry
                }
            },
        )
        .await;

        if !acknowledged {
            port.generate_stop();
        }
        self.state(dev.bus).release();

        if acknowledged {
            Ok(())
        } else {
            warn!("slave {:#x} on {} never acknowledged", dev.address, dev.bus);
            Err(BusError::StandbyTimeout)
        }
    }

    /// RX DMA transfer-complete interrupt handler for `bus`.
    ///
    /// Ends the frame, re-enables acknowledge (the automatic NACK of the
    /// last byte clears it), idles the bus and notifies the slave.
    ///
    /// The bus is idle before the callback runs. An interrupt that starts a
    /// transfer on this bus must not preempt this handler, or it can claim
    /// the bus before the slave has seen the completion. Give it equal or
    /// lower priority.
    pub fn on_rx_complete(&self, bus: BusId) {
        let Ok(port) = self.port(bus) else {
            return;
        };
        if !port.take_transfer_complete(Stream::Rx) {
            return;
        }
        port.generate_stop();
        port.disable_stream(Stream::Rx);
        port.set_dma_requests(false);
        port.set_ack(true);
        self.finish(bus);
    }

    /// TX DMA transfer-complete interrupt handler for `bus`.
    ///
    /// The stream finishes when the last byte is loaded, not sent, so this
    /// spins briefly on byte-transfer-finished before the STOP.
    pub fn on_tx_complete(&self, bus: BusId) {
        let Ok(port) = self.port(bus) else {
            return;
        };
        if !port.take_transfer_complete(Stream::Tx) {
            return;
        }
        port.disable_stream(Stream::Tx);
        port.set_dma_requests(false);
        wait::until_flag(port, Flag::ByteTransferFinished);
        port.generate_stop();
        self.finish(bus);
    }

    fn finish(&self, bus: BusId) {
        let Some(handle) = self.state(bus).release() else {
            warn!("transfer complete on idle bus {}", bus);
            return;
        };
        match self.registry.get(handle) {
            Some(dev) => dev.notify(),
            None => error!("bus {} held by unregistered slave {}", bus, handle),
        }
    }

    /// Caller holds the bus. Releases it again on the synchronous path.
    fn start_read(
        &self,
        dev: &SlaveDevice<'a>,
        port: &P,
        width: AddressWidth,
        register: u16,
        buffer: DmaBuffer,
    ) {
        if buffer.len() < 2 {
            buffer.write_first(polled_read(port, dev.address, width, register));
            self.state(dev.bus).release();
            return;
        }

        select_register(port, dev.address, width, register);
        wait::until_flag(port, Flag::ByteTransferFinished);

        port.generate_start();
        wait::until_event(port, Event::MasterModeSelect);
        port.send_address(dev.address, Direction::Receiver);
        wait::until_event(port, Event::ReceiverModeSelected);

        port.arm_stream(Stream::Rx, buffer);
        port.set_dma_last_transfer(true);
        port.set_dma_requests(true);
    }

    /// Caller holds the bus. Releases it again on the synchronous path.
    fn start_write(
        &self,
        dev: &SlaveDevice<'a>,
        port: &P,
        width: AddressWidth,
        register: u16,
        buffer: DmaBuffer,
    ) {
        if buffer.len() < 2 {
            if let Some(value) = buffer.read_first() {
                polled_write(port, dev.address, width, register, value);
            }
            self.state(dev.bus).release();
            return;
        }

        select_register(port, dev.address, width, register);
        wait::until_event(port, Event::ByteTransmitting);

        port.arm_stream(Stream::Tx, buffer);
        port.set_dma_requests(true);
    }

    async fn claim(&self, bus: BusId, slave: SlaveHandle) {
        let state = self.state(bus);
        while !state.try_claim(slave) {
            yield_now().await;
        }
    }

    fn resolve(
        &self,
        slave: SlaveHandle,
    ) -> Result<(SlaveDevice<'a>, &P), BusError> {
        let dev = self.registry.get(slave).ok_or(BusError::UnknownSlave)?;
        let port = self.port(dev.bus)?;
        Ok((dev, port))
    }

    fn init_bus(&self, bus: BusId, port: &P) {
        if self.state(bus).mark_initialized() {
            port.configure();
            info!("bus {} initialized", bus);
        }
    }

    #[inline]
    fn port(&self, bus: BusId) -> Result<&P, BusError> {
        self.ports[bus.index()].as_ref().ok_or(BusError::UnknownBus)
    }

    #[inline]
    fn state(&self, bus: BusId) -> &BusState {
        &self.buses[bus.index()]
    }
}

/// START, address for write, then the register address. Leaves the last
/// address byte in flight.
fn select_register<P: I2cPeripheral>(
    port: &P,
    address: u8,
    width: AddressWidth,
    register: u16,
) {
    port.generate_start();
    wait::until_event(port, Event::MasterModeSelect);
    port.send_address(address, Direction::Transmitter);
    wait::until_event(port, Event::TransmitterModeSelected);

    if width == AddressWidth::Bits16 {
        port.send_byte((register >> 8) as u8);
        wait::until_event(port, Event::ByteTransmitted);
    }
    port.send_byte(register as u8);
}

fn polled_read<P: I2cPeripheral>(
    port: &P,
    address: u8,
    width: AddressWidth,
    register: u16,
) -> u8 {
    select_register(port, address, width, register);
    wait::until_event(port, Event::ByteTransmitted);

    port.generate_start();
    wait::until_event(port, Event::MasterModeSelect);
    port.send_address(address, Direction::Receiver);
    wait::until_event(port, Event::ReceiverModeSelected);

    // Single byte: NACK it and queue the STOP before it arrives.
    port.set_ack(false);
    port.clear_address_flag();
    port.generate_stop();
    wait::until_flag(port, Flag::RxNotEmpty);
    let value = port.receive_byte();
    wait::until(|| !port.stop_pending());
    port.set_ack(true);
    value
}

fn polled_write<P: I2cPeripheral>(
    port: &P,
    address: u8,
    width: AddressWidth,
    register: u16,
    value: u8,
) {
    select_register(port, address, width, register);
    wait::until_event(port, Event::ByteTransmitted);
    port.send_byte(value);
    wait::until_event(port, Event::ByteTransmitted);
    port.generate_stop();
}
