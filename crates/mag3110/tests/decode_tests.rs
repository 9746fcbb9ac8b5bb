use approx::assert_relative_eq;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Instant;
use i2c_engine::mock::{MockDelay, MockPeripheral, Op};
use i2c_engine::{
    AddressWidth, BusError, BusId, Direction, DmaBuffer, I2cEngine, Stream,
};
use mag3110::registers::WHO_AM_I_VALUE;
use mag3110::{
    CaptureRing, DataReadyLine, Error, Mag3110, Mag3110Config, Param, State,
    PARAM_COUNT,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

type Engine<'a> = I2cEngine<'a, NoopRawMutex, MockPeripheral>;

#[derive(Default)]
struct Line {
    armed: bool,
}

impl DataReadyLine for Line {
    fn enable_rising_edge(&mut self) {
        self.armed = true;
    }
}

fn neutral_store() -> [f32; PARAM_COUNT] {
    let mut store = [0.0; PARAM_COUNT];
    store[Param::ScaleX0 as usize] = 1.0;
    store[Param::ScaleY0 as usize] = 1.0;
    store[Param::ScaleZ0 as usize] = 1.0;
    store
}

fn engine<'a>() -> Engine<'a> {
    I2cEngine::new([Some(MockPeripheral::new()), None, None])
}

fn port<'e>(engine: &'e Engine<'_>) -> &'e MockPeripheral {
    engine.peripheral(BusId::I2c1).unwrap()
}

fn counts(config: Mag3110Config) -> Mag3110Config {
    config.with_lsb_scale(1.0)
}

fn sample(x: i16, y: i16, z: i16) -> [u8; 6] {
    let [x0, x1] = x.to_be_bytes();
    let [y0, y1] = y.to_be_bytes();
    let [z0, z1] = z.to_be_bytes();
    [x0, x1, y0, y1, z0, z1]
}

/// Data-ready edge, DMA finishing and the completion interrupt.
fn capture(
    mag: &Mag3110<'_, '_, NoopRawMutex, MockPeripheral>,
    engine: &Engine<'_>,
    bytes: [u8; 6],
) {
    mag.on_data_ready();
    assert!(port(engine).finish_rx(&bytes), "no capture was armed");
    engine.on_rx_complete(BusId::I2c1);
}

async fn bring_up(
    mag: &Mag3110<'_, '_, NoopRawMutex, MockPeripheral>,
    engine: &Engine<'_>,
    store: &[f32; PARAM_COUNT],
) {
    mag.register().unwrap();
    port(engine).set_rx_default(WHO_AM_I_VALUE);
    let mut delay = MockDelay::default();
    let mut line = Line::default();
    mag.init(store, &mut delay, &mut line).await.unwrap();
    mag.enable().unwrap();
}

// ---------------------------------------------------------------------------
// Probe and configuration
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn init_configures_part_and_arms_line() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());

    assert_eq!(mag.state(), State::Uninitialized);
    mag.register().unwrap();
    assert_eq!(mag.state(), State::Registered);
    let dev = engine.slave(mag.slave().unwrap()).unwrap();
    assert_eq!((dev.bus, dev.address), (BusId::I2c1, 0x0E));

    port(&engine).set_rx_default(WHO_AM_I_VALUE);
    port(&engine).clear_ops();
    let mut delay = MockDelay::default();
    let mut line = Line::default();
    mag.init(&neutral_store(), &mut delay, &mut line).await.unwrap();

    assert_eq!(mag.state(), State::Configured);
    assert!(line.armed);

    let ops = port(&engine).ops();
    let writes: Vec<u8> = ops
        .iter()
        .filter_map(|op| match op {
            Op::Send(b) => Some(*b),
            _ => None,
        })
        .collect();
    // WHO_AM_I select, then CTRL_REG2 and CTRL_REG1 writes.
    assert_eq!(writes, vec![0x07, 0x11, 0x80, 0x10, 0x01]);
    assert_eq!(delay.calls, 2);
    assert_eq!(delay.total_ns, 20_000_000);
    assert!(!engine.is_busy(BusId::I2c1));
}

#[futures_test::test]
async fn probe_retries_until_signature_matches() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());
    mag.register().unwrap();

    port(&engine).queue_rx(&[0x00, 0xFF, WHO_AM_I_VALUE]);
    let mut delay = MockDelay::default();
    let mut line = Line::default();
    mag.init(&neutral_store(), &mut delay, &mut line).await.unwrap();

    assert_eq!(port(&engine).count(Op::Address(0x0E, Direction::Receiver)), 3);
    // Two probe intervals, two settle delays.
    assert_eq!(delay.calls, 4);
    assert_eq!(delay.total_ns, 220_000_000);
}

#[futures_test::test]
async fn failed_probe_leaves_sensor_disabled() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());
    mag.register().unwrap();

    port(&engine).set_rx_default(0x00);
    let mut delay = MockDelay::default();
    let mut line = Line::default();
    assert_eq!(
        mag.init(&neutral_store(), &mut delay, &mut line).await,
        Err(Error::ProbeFailed)
    );

    assert_eq!(mag.state(), State::Disabled);
    assert!(!line.armed);
    assert_eq!(port(&engine).count(Op::Address(0x0E, Direction::Receiver)), 5);
    assert_eq!(delay.calls, 4);

    assert_eq!(mag.enable(), Err(Error::InvalidState));
    mag.on_data_ready();
    assert_eq!(port(&engine).armed(), None);
    assert_eq!(
        mag.init(&neutral_store(), &mut delay, &mut line).await,
        Err(Error::InvalidState)
    );
}

#[futures_test::test]
async fn init_requires_registration() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());

    let mut delay = MockDelay::default();
    let mut line = Line::default();
    assert_eq!(
        mag.init(&neutral_store(), &mut delay, &mut line).await,
        Err(Error::NotRegistered)
    );
    assert_eq!(mag.enable(), Err(Error::InvalidState));
}

#[test]
fn register_on_missing_bus_fails() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(
        &engine,
        &ring,
        Mag3110Config::default().with_bus(BusId::I2c3),
    );
    assert_eq!(mag.register(), Err(Error::Bus(BusError::UnknownBus)));
    assert_eq!(mag.state(), State::Uninitialized);
}

// ---------------------------------------------------------------------------
// Capture and decode
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn two_slots_are_averaged() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, counts(Mag3110Config::default()));
    bring_up(&mag, &engine, &neutral_store()).await;

    capture(&mag, &engine, sample(100, -40, 8));
    capture(&mag, &engine, sample(300, -20, 4));
    assert_eq!(ring.cursor(), 0);

    let reading = mag.decode(0.0, Instant::from_micros(1_000)).unwrap();
    assert_eq!(reading.raw.x, 200.0);
    assert_eq!(reading.raw.y, -30.0);
    // Z counts run opposite to the board frame.
    assert_eq!(reading.raw.z, -6.0);
    assert_eq!(mag.raw(), Some(reading.raw));
    assert_eq!(mag.last_update(), Some(Instant::from_micros(1_000)));
}

#[futures_test::test]
async fn in_flight_slot_is_excluded() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, counts(Mag3110Config::default()));
    bring_up(&mag, &engine, &neutral_store()).await;

    capture(&mag, &engine, sample(500, 0, 0));
    capture(&mag, &engine, sample(700, 0, 0));
    capture(&mag, &engine, sample(100, 0, 0));
    assert_eq!(ring.cursor(), 1);

    // Next capture armed into slot 1 but not finished.
    mag.on_data_ready();
    assert!(engine.is_busy(BusId::I2c1));
    assert_eq!(port(&engine).armed(), Some((Stream::Rx, 6)));

    let reading = mag.decode(0.0, Instant::from_micros(2_000)).unwrap();
    assert_eq!(reading.raw.x, 100.0);

    // Completing it brings slot 1 back into the average.
    port(&engine).finish_rx(&sample(300, 0, 0));
    engine.on_rx_complete(BusId::I2c1);
    let reading = mag.decode(0.0, Instant::from_micros(3_000)).unwrap();
    assert_eq!(reading.raw.x, 200.0);
}

#[futures_test::test]
async fn next_edge_after_completion_fills_the_next_slot() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, counts(Mag3110Config::default()));
    bring_up(&mag, &engine, &neutral_store()).await;

    mag.on_data_ready();
    port(&engine).finish_rx(&sample(40, 0, 0));
    engine.on_rx_complete(BusId::I2c1);
    // Bus idle and cursor already past the finished slot.
    assert!(!engine.is_busy(BusId::I2c1));
    assert_eq!(ring.cursor(), 1);

    mag.on_data_ready();
    port(&engine).finish_rx(&sample(60, 0, 0));
    engine.on_rx_complete(BusId::I2c1);
    assert_eq!(ring.cursor(), 0);

    let reading = mag.decode(0.0, Instant::from_micros(1)).unwrap();
    assert_eq!(reading.raw.x, 50.0);
}

#[futures_test::test]
async fn data_ready_on_busy_bus_is_dropped() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, counts(Mag3110Config::default()));
    bring_up(&mag, &engine, &neutral_store()).await;
    let eeprom = engine.register_slave(BusId::I2c1, 0x50, None).unwrap();

    let page: &'static mut [u8] = Box::leak(vec![0u8; 4].into_boxed_slice());
    engine
        .try_begin_read(eeprom, AddressWidth::Bits16, 0x0100, DmaBuffer::from(page))
        .unwrap();

    mag.on_data_ready();
    assert_eq!(engine.active_slave(BusId::I2c1), Some(eeprom));
    assert_eq!(port(&engine).armed(), Some((Stream::Rx, 4)));
    assert_eq!(ring.cursor(), 0);
}

#[futures_test::test]
async fn disabled_sensor_ignores_edges_and_decode() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, counts(Mag3110Config::default()));
    bring_up(&mag, &engine, &neutral_store()).await;

    capture(&mag, &engine, sample(10, 10, 10));
    mag.disable();
    assert_eq!(mag.state(), State::Disabled);

    mag.on_data_ready();
    assert_eq!(port(&engine).armed(), None);
    assert_eq!(mag.decode(0.0, Instant::from_micros(5)), None);
    assert_eq!(mag.raw(), None);

    mag.enable().unwrap();
    assert_eq!(mag.state(), State::Enabled);
    assert!(mag.decode(0.0, Instant::from_micros(6)).is_some());
}

#[futures_test::test]
async fn flip_and_lsb_scale_apply_before_calibration() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());
    let mut store = neutral_store();
    store[Param::Flip as usize] = 1.0;
    bring_up(&mag, &engine, &store).await;

    capture(&mag, &engine, sample(1000, 1000, 1000));
    capture(&mag, &engine, sample(1000, 1000, 1000));

    let raw = mag.decode(25.0, Instant::from_micros(10)).unwrap().raw;
    assert_relative_eq!(raw.x, 1.0, epsilon = 1e-6);
    assert_relative_eq!(raw.y, -1.0, epsilon = 1e-6);
    assert_relative_eq!(raw.z, 1.0, epsilon = 1e-6);
}

#[futures_test::test]
async fn calibration_runs_through_rotation() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());
    let mut store = neutral_store();
    store[Param::Rotation as usize] = 90.0;
    store[Param::BiasX0 as usize] = 0.5;
    store[Param::ScaleY0 as usize] = 2.0;
    bring_up(&mag, &engine, &store).await;

    capture(&mag, &engine, sample(500, 1000, 0));
    capture(&mag, &engine, sample(500, 1000, 0));

    // raw (0.5, 1, 0) → bias (1, 1, 0) → scale (1, 0.5, 0) → rotate 90°.
    let out = mag.decode(0.0, Instant::from_micros(20)).unwrap().calibrated;
    assert_relative_eq!(out.x, -0.5, epsilon = 1e-2);
    assert_relative_eq!(out.y, 1.0, epsilon = 1e-2);
    assert_relative_eq!(out.z, 0.0, epsilon = 1e-6);
    assert_eq!(mag.calibrated(), Some(out));
}

#[futures_test::test]
async fn z_bias_is_subtracted_from_inverted_raw() {
    let ring = CaptureRing::new();
    let engine = engine();
    let mag = Mag3110::new(&engine, &ring, Mag3110Config::default());
    let mut store = neutral_store();
    store[Param::BiasZ0 as usize] = 0.25;
    bring_up(&mag, &engine, &store).await;

    capture(&mag, &engine, sample(0, 0, 1000));
    capture(&mag, &engine, sample(0, 0, 1000));

    let reading = mag.decode(0.0, Instant::from_micros(30)).unwrap();
    assert_relative_eq!(reading.raw.z, -1.0, epsilon = 1e-6);
    assert_relative_eq!(reading.calibrated.z, -1.25, epsilon = 1e-6);
}
