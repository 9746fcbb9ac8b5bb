use core::ptr::NonNull;

use grounded::uninit::GroundedArrayCell;
use i2c_engine::{BusId, CompletionCallback, DmaBuffer};
use portable_atomic::{AtomicU8, Ordering};

/// Captures averaged by one decode pass.
pub const SLOTS: usize = 2;
/// Stride between slots. Only the first [`SAMPLE_BYTES`] are transferred.
pub const SLOT_SIZE: usize = 8;
/// X, Y and Z output registers, MSB first.
pub const SAMPLE_BYTES: usize = 6;

const RING_BYTES: usize = SLOTS * SLOT_SIZE;

/// DMA landing area for data-ready captures.
///
/// The data-ready interrupt starts a read into the slot at the cursor; the
/// engine's completion interrupt advances the cursor through the
/// [`CompletionCallback`] impl. That is the only place the cursor moves.
/// The decode loop reads slots concurrently and skips the cursor slot while
/// the bus is busy. The ring must be deep enough that captures cannot wrap
/// onto a slot during one decode pass; at 80 Hz two slots are.
///
/// The data-ready interrupt must not outrank the DMA completion interrupt.
/// The engine idles the bus before advancing the cursor, so a data-ready
/// edge landing in between would arm the slot that just completed.
pub struct CaptureRing {
    slots: GroundedArrayCell<u8, RING_BYTES>,
    cursor: AtomicU8,
}

impl CaptureRing {
    pub const fn new() -> Self {
        Self {
            slots: GroundedArrayCell::const_init(),
            cursor: AtomicU8::new(0),
        }
    }

    /// Slot the next (or current) capture writes to.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire) as usize
    }

    fn advance(&self) {
        let next = (self.cursor() + 1) % SLOTS;
        self.cursor.store(next as u8, Ordering::Release);
    }

    /// DMA target for `slot`.
    pub(crate) fn slot_buffer(&self, slot: usize) -> DmaBuffer {
        let slot = slot % SLOTS;
        // SAFETY: the offset stays inside the cell and its base is never
        // null. The ring outlives the engine it is registered with, so the
        // memory is valid until the transfer completes. Decode only reads
        // it with volatile loads.
        unsafe {
            let ptr = self.slots.as_mut_ptr().add(slot * SLOT_SIZE);
            DmaBuffer::from_raw_parts(NonNull::new_unchecked(ptr), SAMPLE_BYTES)
        }
    }

    /// Decode the three big-endian axis samples held in `slot`.
    pub(crate) fn sample(&self, slot: usize) -> [i16; 3] {
        let base = (slot % SLOTS) * SLOT_SIZE;
        let mut bytes = [0u8; SAMPLE_BYTES];
        for (i, b) in bytes.iter_mut().enumerate() {
            // SAFETY: in bounds of the cell. Volatile because DMA writes
            // the memory behind the compiler's back.
            *b = unsafe { self.slots.as_mut_ptr().add(base + i).read_volatile() };
        }
        [
            i16::from_be_bytes([bytes[0], bytes[1]]),
            i16::from_be_bytes([bytes[2], bytes[3]]),
            i16::from_be_bytes([bytes[4], bytes[5]]),
        ]
    }
}

impl Default for CaptureRing {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionCallback for CaptureRing {
    fn on_complete(&self, _bus: BusId) {
        self.advance();
    }
}
