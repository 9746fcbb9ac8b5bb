use portable_atomic::{AtomicBool, Ordering};

use crate::error::BusError;
use crate::registry::{AtomicSlaveHandle, SlaveHandle};

/// Number of peripheral instances the engine can drive.
pub const MAX_BUSES: usize = 3;

/// Identity of one physical bus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BusId {
    I2c1 = 0,
    I2c2 = 1,
    I2c3 = 2,
}

impl BusId {
    pub const ALL: [BusId; MAX_BUSES] = [BusId::I2c1, BusId::I2c2, BusId::I2c3];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for BusId {
    type Error = BusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BusId::I2c1),
            1 => Ok(BusId::I2c2),
            2 => Ok(BusId::I2c3),
            _ => Err(BusError::UnknownBus),
        }
    }
}

/// Per-instance transaction state shared between tasks and interrupts.
///
/// The active slave and the busy state live in one atomic byte: the bus is
/// busy exactly when it holds a slave. Claims go through compare-exchange,
/// so a task and an interrupt racing for an idle bus cannot both win.
pub(crate) struct BusState {
    active: AtomicSlaveHandle,
    initialized: AtomicBool,
}

impl BusState {
    pub(crate) const fn new() -> Self {
        Self {
            active: AtomicSlaveHandle::none(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Move Idle → Busy(`slave`). Returns `false` if the bus was busy.
    #[inline]
    pub(crate) fn try_claim(&self, slave: SlaveHandle) -> bool {
        self.active.try_set(slave)
    }

    /// Move to Idle, returning the slave that held the bus.
    #[inline]
    pub(crate) fn release(&self) -> Option<SlaveHandle> {
        self.active.take()
    }

    #[inline]
    pub(crate) fn active(&self) -> Option<SlaveHandle> {
        self.active.load()
    }

    #[inline]
    pub(crate) fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Flip the initialized flag. Returns `true` for the caller that
    /// performed the transition.
    pub(crate) fn mark_initialized(&self) -> bool {
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_release() {
        let state = BusState::new();
        assert!(!state.is_busy());
        assert!(state.try_claim(SlaveHandle::new(0)));
        assert!(!state.try_claim(SlaveHandle::new(1)));
        assert_eq!(state.active(), Some(SlaveHandle::new(0)));
        assert_eq!(state.release(), Some(SlaveHandle::new(0)));
        assert_eq!(state.release(), None);
        assert!(state.try_claim(SlaveHandle::new(1)));
    }

    #[test]
    fn initialization_happens_once() {
        let state = BusState::new();
        assert!(state.mark_initialized());
        assert!(!state.mark_initialized());
        assert!(state.is_initialized());
    }

    #[test]
    fn bus_id_round_trips_through_index() {
        for bus in BusId::ALL {
            assert_eq!(BusId::try_from(bus.index() as u8), Ok(bus));
        }
        assert_eq!(BusId::try_from(3), Err(BusError::UnknownBus));
    }
}
