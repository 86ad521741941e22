use std::{
    num::{NonZeroU64, NonZeroUsize},
    sync::Arc,
    time::Duration,
};

/// Opaque per-arm token.
///
/// Every arm of a timer mints a new generation; a fire delivered with a
/// generation that is no longer current belongs to a cancelled or
/// reconfigured arm and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(NonZeroU64);

impl Generation {
    pub fn new(value: NonZeroU64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

/// Handle of an armed wakeup, returned by [`Scheduler`] and passed back to
/// [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulingHandle(NonZeroUsize);

impl SchedulingHandle {
    pub fn new(value: NonZeroUsize) -> Self {
        Self(value)
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

/// Callback invoked by a scheduler on every fire, with the token captured at
/// arm time.
pub type FireCallback = Arc<dyn Fn(Generation) + Send + Sync>;

/// Clock and wakeup provider consumed by [`Timer`].
pub trait Scheduler: Send + Sync {
    /// Fire `callback` once after `duration`.
    ///
    /// # Parameters
    /// * `duration` - Delay before the fire
    /// * `token` - Generation passed back to `callback`
    /// * `callback` - See [`FireCallback`]
    fn arm_once(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle;

    /// Fire `callback` every `duration`, starting after `duration`.
    fn arm_repeating(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle;

    /// Release an armed wakeup. Cancelling an expired or unknown handle is a no-op.
    fn cancel(&self, handle: SchedulingHandle);
}

/// Target context that elapsed events can be redirected to, e.g. a thread
/// that owns the subscribers' state.
pub trait MarshalTarget: Send + Sync {
    /// Whether delivery from the calling context must go through
    /// [`invoke_redirected`](MarshalTarget::invoke_redirected).
    fn requires_redirection(&self) -> bool;

    /// Run `job` on the target context. Fire-and-forget for the caller.
    fn invoke_redirected(&self, job: Box<dyn FnOnce() + Send>);
}

mod error;
pub use error::*;

mod registry;
pub use registry::*;

mod timer;
pub use timer::*;

mod dispatch;

/// Marshal targets shipped with the crate
pub mod marshal;

/// Scheduler implementation using hashed timewheel algorithm
pub mod hashed;
