use crate::bus::BusId;

/// Completion notification for asynchronous transfers.
///
/// Invoked from the DMA transfer-complete interrupt after the bus has been
/// returned to idle. Implementations run in interrupt context and must not
/// block; update an atomic or signal a task instead.
pub trait CompletionCallback: Sync {
    fn on_complete(&self, bus: BusId);
}

/// Callback used when a slave registers without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl CompletionCallback for NoopCallback {
    #[inline]
    fn on_complete(&self, _bus: BusId) {}
}

pub(crate) static NOOP_CALLBACK: NoopCallback = NoopCallback;
