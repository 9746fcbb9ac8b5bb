use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use grounded::uninit::GroundedArrayCell;
use portable_atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::bus::BusId;
use crate::callback::CompletionCallback;
use crate::error::BusError;

/// Default number of slaves the registry holds.
pub const DEFAULT_SLAVE_CAPACITY: usize = 2;

/// Encoding of "no slave" in an [`AtomicSlaveHandle`].
const NO_SLAVE: u8 = u8::MAX;

/// Largest registry capacity representable next to the [`NO_SLAVE`]
/// sentinel.
const MAX_SLAVE_INDEX: usize = NO_SLAVE as usize;

/// Index of a registered slave. Only the registry hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveHandle(u8);

impl SlaveHandle {
    pub(crate) const fn new(index: u8) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// `Option<SlaveHandle>` in one atomic byte.
///
/// Plain loads and stores, no lock, so both sides of an interrupt boundary
/// can use it whatever mutex flavour the rest of the system runs on.
pub struct AtomicSlaveHandle(AtomicU8);

impl AtomicSlaveHandle {
    pub const fn none() -> Self {
        Self(AtomicU8::new(NO_SLAVE))
    }

    #[inline]
    pub fn load(&self) -> Option<SlaveHandle> {
        decode(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, handle: Option<SlaveHandle>) {
        self.0.store(encode(handle), Ordering::Release);
    }

    /// Empty the cell, returning what it held.
    #[inline]
    pub fn take(&self) -> Option<SlaveHandle> {
        decode(self.0.swap(NO_SLAVE, Ordering::AcqRel))
    }

    /// Store `handle` only if the cell is empty. Returns `false` if it was
    /// occupied.
    #[inline]
    pub fn try_set(&self, handle: SlaveHandle) -> bool {
        self.0
            .compare_exchange(
                NO_SLAVE,
                handle.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    pub fn is_some(&self) -> bool {
        self.0.load(Ordering::Acquire) != NO_SLAVE
    }
}

impl Default for AtomicSlaveHandle {
    fn default() -> Self {
        Self::none()
    }
}

#[inline]
const fn encode(handle: Option<SlaveHandle>) -> u8 {
    match handle {
        Some(h) => h.0,
        None => NO_SLAVE,
    }
}

#[inline]
const fn decode(raw: u8) -> Option<SlaveHandle> {
    match raw {
        NO_SLAVE => None,
        index => Some(SlaveHandle(index)),
    }
}

/// A registered device: where it lives and who to tell when a transfer ends.
#[derive(Clone, Copy)]
pub struct SlaveDevice<'a> {
    pub bus: BusId,
    pub address: u8,
    pub(crate) callback: &'a dyn CompletionCallback,
}

impl SlaveDevice<'_> {
    #[inline]
    pub(crate) fn notify(&self) {
        self.callback.on_complete(self.bus);
    }
}

impl core::fmt::Debug for SlaveDevice<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlaveDevice")
            .field("bus", &self.bus)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity slave table.
///
/// Entries are appended and never removed, so a handle stays valid for the
/// life of the registry. An entry is written in full before the length
/// publishing it is stored, so lookups are a length load plus a copy and
/// take no lock. The mutex only serializes writers.
pub struct SlaveRegistry<'a, M: RawMutex, const N: usize> {
    slaves: GroundedArrayCell<SlaveDevice<'a>, N>,
    len: AtomicUsize,
    writer: Mutex<M, ()>,
}

impl<'a, M: RawMutex, const N: usize> SlaveRegistry<'a, M, N> {
    const CAPACITY_FITS: () =
        assert!(N < MAX_SLAVE_INDEX, "registry capacity must be below 255");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_FITS;
        Self {
            slaves: GroundedArrayCell::uninit(),
            len: AtomicUsize::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Append a slave. Fails if the table is full or the (bus, address)
    /// pair is already taken.
    pub fn insert(
        &self,
        bus: BusId,
        address: u8,
        callback: &'a dyn CompletionCallback,
    ) -> Result<SlaveHandle, BusError> {
        self.writer.lock(|()| {
            let taken =
                self.entries().iter().any(|s| s.bus == bus && s.address == address);
            if taken {
                return Err(BusError::AlreadyRegistered);
            }
            let index = self.len();
            if index == N {
                return Err(BusError::RegistryFull);
            }
            // SAFETY: `index < N`, and the slot is past the published length
            // so no reader looks at it. Writers are serialized by the lock.
            unsafe {
                self.slaves
                    .as_mut_ptr()
                    .add(index)
                    .write(SlaveDevice { bus, address, callback });
            }
            self.len.store(index + 1, Ordering::Release);
            Ok(SlaveHandle::new(index as u8))
        })
    }

    /// Resolve a handle, validating it against the table. Lock-free.
    pub fn get(&self, handle: SlaveHandle) -> Option<SlaveDevice<'a>> {
        self.entries().get(handle.index()).copied()
    }

    /// Published entries.
    fn entries(&self) -> &[SlaveDevice<'a>] {
        // SAFETY: the first `len` slots were written before `len` was
        // released and are never written again.
        unsafe {
            core::slice::from_raw_parts(self.slaves.as_mut_ptr(), self.len())
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<M: RawMutex, const N: usize> Default for SlaveRegistry<'_, M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::NOOP_CALLBACK;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn insert_then_get_matches() {
        let registry: SlaveRegistry<'_, NoopRawMutex, 4> = SlaveRegistry::new();
        let a = registry.insert(BusId::I2c1, 0x0E, &NOOP_CALLBACK).unwrap();
        let b = registry.insert(BusId::I2c2, 0x0E, &NOOP_CALLBACK).unwrap();

        let dev = registry.get(a).unwrap();
        assert_eq!((dev.bus, dev.address), (BusId::I2c1, 0x0E));
        let dev = registry.get(b).unwrap();
        assert_eq!((dev.bus, dev.address), (BusId::I2c2, 0x0E));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn full_table_rejects() {
        let registry: SlaveRegistry<'_, NoopRawMutex, 1> = SlaveRegistry::new();
        registry.insert(BusId::I2c1, 0x10, &NOOP_CALLBACK).unwrap();
        assert_eq!(
            registry.insert(BusId::I2c1, 0x11, &NOOP_CALLBACK),
            Err(BusError::RegistryFull)
        );
    }

    #[test]
    fn duplicate_pair_rejects() {
        let registry: SlaveRegistry<'_, NoopRawMutex, 4> = SlaveRegistry::new();
        registry.insert(BusId::I2c3, 0x50, &NOOP_CALLBACK).unwrap();
        assert_eq!(
            registry.insert(BusId::I2c3, 0x50, &NOOP_CALLBACK),
            Err(BusError::AlreadyRegistered)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn handle_cell_is_claimed_once() {
        let cell = AtomicSlaveHandle::none();
        assert_eq!(cell.load(), None);
        assert!(cell.try_set(SlaveHandle::new(0)));
        assert!(!cell.try_set(SlaveHandle::new(1)));
        assert_eq!(cell.load(), Some(SlaveHandle::new(0)));
        assert_eq!(cell.take(), Some(SlaveHandle::new(0)));
        assert!(!cell.is_some());
        cell.store(Some(SlaveHandle::new(3)));
        assert_eq!(cell.load(), Some(SlaveHandle::new(3)));
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let registry: SlaveRegistry<'_, NoopRawMutex, 2> = SlaveRegistry::new();
        assert!(registry.get(SlaveHandle::new(1)).is_none());
    }
}
