use core::ptr::NonNull;

/// Direction bit sent with the slave address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Transmitter,
    Receiver,
}

/// One of the two DMA streams attached to a bus peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stream {
    Tx,
    Rx,
}

/// Compound master events, each a combination of status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// START generated, bus owned by this master.
    MasterModeSelect,
    /// Address acknowledged, master transmitting.
    TransmitterModeSelected,
    /// Address acknowledged, master receiving.
    ReceiverModeSelected,
    /// Last byte shifted out and acknowledged.
    ByteTransmitted,
    /// Data register empty while the previous byte is still shifting.
    ByteTransmitting,
}

/// Single status flags inspected directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    ByteTransferFinished,
    RxNotEmpty,
    AddressSent,
    AcknowledgeFailure,
}

/// Memory handed to a DMA stream.
///
/// The engine never touches the bytes itself on the asynchronous path; the
/// peripheral reads or writes them until the matching transfer-complete
/// interrupt fires.
#[derive(Debug)]
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl DmaBuffer {
    /// Wrap raw memory for a transfer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// transfer using this buffer has completed, and no reference to that
    /// memory may be live while the peripheral owns it.
    pub const unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `byte` at the start of the buffer. No-op on an empty buffer.
    pub(crate) fn write_first(&self, byte: u8) {
        if self.len > 0 {
            // SAFETY: non-empty and valid for writes per the constructor contract.
            unsafe { self.ptr.as_ptr().write_volatile(byte) }
        }
    }

    /// Load the first byte of the buffer, or `None` when empty.
    pub(crate) fn read_first(&self) -> Option<u8> {
        if self.len > 0 {
            // SAFETY: non-empty and valid for reads per the constructor contract.
            Some(unsafe { self.ptr.as_ptr().read_volatile() })
        } else {
            None
        }
    }
}

impl From<&'static mut [u8]> for DmaBuffer {
    fn from(buf: &'static mut [u8]) -> Self {
        let len = buf.len();
        // SAFETY: a leaked exclusive borrow outlives any transfer and cannot
        // be observed by anyone else.
        unsafe { Self::from_raw_parts(NonNull::from(buf).cast(), len) }
    }
}

/// Register-level access to one two-wire peripheral and its DMA streams.
///
/// Board support implements this for each physical instance; clock, pin and
/// interrupt-priority setup happen in [`configure`](Self::configure). Every
/// method is a short register access and must be callable from interrupt
/// context.
pub trait I2cPeripheral {
    /// Bring up clocks, pins, DMA streams and interrupts, then enable the
    /// peripheral with acknowledge on.
    fn configure(&self);

    fn generate_start(&self);
    fn generate_stop(&self);
    /// A STOP request has been issued and not yet released by hardware.
    fn stop_pending(&self) -> bool;

    /// Send a 7-bit address with the direction bit.
    fn send_address(&self, address: u8, direction: Direction);
    fn send_byte(&self, byte: u8);
    fn receive_byte(&self) -> u8;

    fn check_event(&self, event: Event) -> bool;
    fn flag(&self, flag: Flag) -> bool;
    /// Clear the address-sent flag (status register read sequence).
    fn clear_address_flag(&self);
    fn clear_ack_failure(&self);

    /// Enable or suppress acknowledge of received bytes.
    fn set_ack(&self, enable: bool);
    /// NACK the final byte of the next DMA reception automatically.
    fn set_dma_last_transfer(&self, enable: bool);
    /// Gate DMA request generation from the peripheral.
    fn set_dma_requests(&self, enable: bool);

    /// Point `stream` at `buffer` and enable it. The transfer length is the
    /// buffer length.
    fn arm_stream(&self, stream: Stream, buffer: DmaBuffer);
    fn disable_stream(&self, stream: Stream);
    /// Return whether the transfer-complete flag of `stream` was set,
    /// clearing it.
    fn take_transfer_complete(&self, stream: Stream) -> bool;
}
