//! The two ways the engine waits on hardware.
//!
//! Ordinary transaction phases spin on a status condition with no upper
//! bound: an absent or wedged device stalls the caller. Recovery from that
//! is left to whatever supervises the firmware (e.g. a watchdog reset).
//! The standby probe is the only bounded wait; it retries a whole attempt
//! a fixed number of times with a delay in between.

use embedded_hal_async::delay::DelayNs;

use crate::hal::{Event, Flag, I2cPeripheral};

/// Spin until `ready` returns `true`. Never times out.
#[inline]
pub(crate) fn until(mut ready: impl FnMut() -> bool) {
    while !ready() {
        core::hint::spin_loop();
    }
}

#[inline]
pub(crate) fn until_event<P: I2cPeripheral>(port: &P, event: Event) {
    until(|| port.check_event(event));
}

#[inline]
pub(crate) fn until_flag<P: I2cPeripheral>(port: &P, flag: Flag) {
    until(|| port.flag(flag));
}

/// Outcome of one attempt inside [`retry_bounded`].
pub(crate) enum Attempt {
    Done,
    Retry,
}

/// Run `attempt` up to `trials` times, sleeping `interval_ms` between
/// failed attempts. Returns `true` as soon as an attempt reports
/// [`Attempt::Done`].
pub(crate) async fn retry_bounded<D: DelayNs>(
    trials: u32,
    interval_ms: u32,
    delay: &mut D,
    mut attempt: impl FnMut() -> Attempt,
) -> bool {
    for trial in 0..trials {
        if let Attempt::Done = attempt() {
            return true;
        }
        trace!("attempt {} of {} not acknowledged", trial + 1, trials);
        if trial + 1 < trials {
            delay.delay_ms(interval_ms).await;
        }
    }
    false
}
