use i2c_engine::BusError;

#[derive(derive_more::From, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Bus(BusError),
    /// WHO_AM_I never matched within the retry budget. The sensor stays
    /// disabled until reset.
    ProbeFailed,
    /// The driver has not registered with the bus engine.
    NotRegistered,
    /// The operation is not valid in the sensor's current state.
    InvalidState,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Bus(e) => write!(f, "bus error: {}", e),
            Error::ProbeFailed => write!(f, "MAG3110 not found"),
            Error::NotRegistered => write!(f, "sensor not registered on a bus"),
            Error::InvalidState => write!(f, "invalid sensor state"),
        }
    }
}
