//! Scripted in-memory peripheral for host tests.
//!
//! Every status check succeeds immediately, so transactions never stall.
//! Register accesses are recorded as [`Op`]s; DMA transfers stay armed until
//! the test finishes them with [`MockPeripheral::finish_rx`] or
//! [`MockPeripheral::finish_tx`] and then calls the engine's completion
//! handler, standing in for the interrupt.

use core::cell::{Cell, RefCell};

use embedded_hal_async::delay::DelayNs;
use heapless::{Deque, Vec};

use crate::hal::{Direction, DmaBuffer, Event, Flag, I2cPeripheral, Stream};

const OP_LOG: usize = 256;

/// One recorded register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Configure,
    Start,
    Stop,
    Address(u8, Direction),
    Send(u8),
    Receive(u8),
    Ack(bool),
    LastTransfer(bool),
    DmaRequests(bool),
    Arm(Stream, usize),
    Disable(Stream),
    ClearAddress,
    ClearAckFailure,
}

#[derive(Default)]
pub struct MockPeripheral {
    ops: RefCell<Vec<Op, OP_LOG>>,
    armed: RefCell<Option<(Stream, DmaBuffer)>>,
    complete: Cell<[bool; 2]>,
    rx_queue: RefCell<Deque<u8, 32>>,
    rx_default: Cell<u8>,
    nacks_left: Cell<u32>,
    always_nack: Cell<bool>,
    addressed: Cell<bool>,
    ack_failure: Cell<bool>,
}

impl MockPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes returned by successive single-byte receptions. Once drained,
    /// [`set_rx_default`](Self::set_rx_default) applies.
    pub fn queue_rx(&self, bytes: &[u8]) {
        let mut queue = self.rx_queue.borrow_mut();
        for &b in bytes {
            let _ = queue.push_back(b);
        }
    }

    pub fn set_rx_default(&self, value: u8) {
        self.rx_default.set(value);
    }

    /// NACK the next `count` write-direction address frames.
    pub fn nack_next(&self, count: u32) {
        self.nacks_left.set(count);
    }

    /// NACK every write-direction address frame.
    pub fn nack_always(&self, enable: bool) {
        self.always_nack.set(enable);
    }

    pub fn ops(&self) -> Vec<Op, OP_LOG> {
        self.ops.borrow().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn count(&self, op: Op) -> usize {
        self.ops.borrow().iter().filter(|o| **o == op).count()
    }

    /// Stream and length of the transfer currently armed, if any.
    pub fn armed(&self) -> Option<(Stream, usize)> {
        self.armed.borrow().as_ref().map(|(s, b)| (*s, b.len()))
    }

    /// Copy `data` into the armed RX buffer and raise its transfer-complete
    /// flag. Returns `false` if no RX transfer is armed.
    pub fn finish_rx(&self, data: &[u8]) -> bool {
        let Some(buffer) = self.take_armed(Stream::Rx) else {
            return false;
        };
        let len = data.len().min(buffer.len());
        // SAFETY: the buffer is valid for `buffer.len()` bytes until the
        // transfer completes, which is what this call models.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), buffer.as_ptr(), len)
        };
        self.raise_complete(Stream::Rx);
        true
    }

    /// Drain the armed TX buffer and raise its transfer-complete flag.
    pub fn finish_tx(&self) -> Option<Vec<u8, 64>> {
        let buffer = self.take_armed(Stream::Tx)?;
        let mut sent = Vec::new();
        for i in 0..buffer.len() {
            // SAFETY: in bounds and valid per the buffer contract.
            let _ = sent.push(unsafe { buffer.as_ptr().add(i).read_volatile() });
        }
        self.raise_complete(Stream::Tx);
        Some(sent)
    }

    /// Raise a transfer-complete flag without moving data.
    pub fn raise_complete(&self, stream: Stream) {
        let mut flags = self.complete.get();
        flags[stream_index(stream)] = true;
        self.complete.set(flags);
    }

    fn take_armed(&self, stream: Stream) -> Option<DmaBuffer> {
        let mut armed = self.armed.borrow_mut();
        match armed.as_ref() {
            Some((s, _)) if *s == stream => armed.take().map(|(_, b)| b),
            _ => None,
        }
    }

    fn record(&self, op: Op) {
        let _ = self.ops.borrow_mut().push(op);
    }
}

fn stream_index(stream: Stream) -> usize {
    match stream {
        Stream::Tx => 0,
        Stream::Rx => 1,
    }
}

impl I2cPeripheral for MockPeripheral {
    fn configure(&self) {
        self.record(Op::Configure);
    }

    fn generate_start(&self) {
        self.record(Op::Start);
    }

    fn generate_stop(&self) {
        self.record(Op::Stop);
    }

    fn stop_pending(&self) -> bool {
        false
    }

    fn send_address(&self, address: u8, direction: Direction) {
        self.record(Op::Address(address, direction));
        let nack = direction == Direction::Transmitter
            && (self.always_nack.get() || self.nacks_left.get() > 0);
        if nack {
            self.nacks_left.set(self.nacks_left.get().saturating_sub(1));
        }
        self.ack_failure.set(nack);
        self.addressed.set(!nack);
    }

    fn send_byte(&self, byte: u8) {
        self.record(Op::Send(byte));
    }

    fn receive_byte(&self) -> u8 {
        let value = self
            .rx_queue
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.rx_default.get());
        self.record(Op::Receive(value));
        value
    }

    fn check_event(&self, _event: Event) -> bool {
        true
    }

    fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::ByteTransferFinished | Flag::RxNotEmpty => true,
            Flag::AddressSent => self.addressed.get(),
            Flag::AcknowledgeFailure => self.ack_failure.get(),
        }
    }

    fn clear_address_flag(&self) {
        self.addressed.set(false);
        self.record(Op::ClearAddress);
    }

    fn clear_ack_failure(&self) {
        self.ack_failure.set(false);
        self.record(Op::ClearAckFailure);
    }

    fn set_ack(&self, enable: bool) {
        self.record(Op::Ack(enable));
    }

    fn set_dma_last_transfer(&self, enable: bool) {
        self.record(Op::LastTransfer(enable));
    }

    fn set_dma_requests(&self, enable: bool) {
        self.record(Op::DmaRequests(enable));
    }

    fn arm_stream(&self, stream: Stream, buffer: DmaBuffer) {
        self.record(Op::Arm(stream, buffer.len()));
        *self.armed.borrow_mut() = Some((stream, buffer));
    }

    fn disable_stream(&self, stream: Stream) {
        self.record(Op::Disable(stream));
    }

    fn take_transfer_complete(&self, stream: Stream) -> bool {
        let mut flags = self.complete.get();
        let idx = stream_index(stream);
        let was_set = flags[idx];
        flags[idx] = false;
        self.complete.set(flags);
        was_set
    }
}

/// Delay that returns at once and tallies what was requested.
#[derive(Debug, Default)]
pub struct MockDelay {
    pub calls: u32,
    pub total_ns: u64,
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.calls += 1;
        self.total_ns += u64::from(ns);
    }
}
