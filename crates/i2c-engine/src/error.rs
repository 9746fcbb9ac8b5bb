/// Errors reported by the bus engine.
///
/// Ordinary transactions have no timeout: a device that never answers its
/// address stalls the caller instead of producing an error here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Every entry of the slave table is taken.
    RegistryFull,
    /// The bus reference does not map to a present peripheral instance.
    UnknownBus,
    /// The address does not fit in 7 bits.
    InvalidAddress(u8),
    /// A slave with the same (bus, address) is already registered.
    AlreadyRegistered,
    /// The handle does not refer to a registered slave.
    UnknownSlave,
    /// The standby probe used up its trial budget without an acknowledge.
    StandbyTimeout,
    /// The bus already has a transaction in flight.
    Busy,
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusError::RegistryFull => write!(f, "slave registry is full"),
            BusError::UnknownBus => write!(f, "unknown bus instance"),
            BusError::InvalidAddress(address) => {
                write!(f, "invalid 7-bit address: {:#04x}", address)
            }
            BusError::AlreadyRegistered => {
                write!(f, "slave already registered on this bus")
            }
            BusError::UnknownSlave => write!(f, "unknown slave handle"),
            BusError::StandbyTimeout => {
                write!(f, "device did not acknowledge within the trial budget")
            }
            BusError::Busy => write!(f, "bus has a transaction in flight"),
        }
    }
}
