use std::{
    fmt,
    num::{NonZeroU64, NonZeroUsize},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::{Duration, Instant, SystemTime},
};

use crate::{
    hashed::global_timer_executor, registry::Registry, ElapsedHandler, Generation, HandlerId,
    MarshalTarget, Scheduler, SchedulingHandle, TimerError, TimerResult,
};

/// Interval of a timer created with [`Timer::new`].
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Largest accepted interval, `i32::MAX` milliseconds.
pub const MAX_INTERVAL: Duration = Duration::from_millis(i32::MAX as u64);

/// Lifecycle state of a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    /// Between [`Timer::begin_init`] and [`Timer::end_init`].
    Initializing,
    Running,
    /// Terminal.
    Disposed,
}

/// Payload of the elapsed event.
#[derive(Debug, Clone)]
pub struct ElapsedEventArgs {
    signal_time: SystemTime,
    instant: Instant,
    generation: Generation,
}

impl ElapsedEventArgs {
    pub(crate) fn new(generation: Generation) -> Self {
        Self {
            signal_time: SystemTime::now(),
            instant: Instant::now(),
            generation,
        }
    }

    /// Wall clock time the event was raised.
    pub fn signal_time(&self) -> SystemTime {
        self.signal_time
    }

    /// Monotonic time the event was raised.
    pub fn instant(&self) -> Instant {
        self.instant
    }

    /// Generation of the arm that produced this event.
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Validate `interval` and round it up to whole milliseconds.
fn interval_millis(interval: Duration) -> TimerResult<u32> {
    if interval.is_zero() {
        return Err(TimerError::InvalidArgument {
            name: "interval",
            reason: "must be greater than zero",
        });
    }

    let millis = (interval.as_nanos() + 999_999) / 1_000_000;

    if millis > MAX_INTERVAL.as_millis() {
        return Err(TimerError::InvalidArgument {
            name: "interval",
            reason: "must not exceed i32::MAX milliseconds",
        });
    }

    Ok(millis as u32)
}

/// State shared between the owning [`Timer`] and the scheduler thread.
///
/// `generation` and `handle` are read by both sides and are never guarded by
/// a lock. The timer is enabled while `generation` is non-zero, so a one-shot
/// fire disables exactly its own arm by swapping its token out. Each side
/// only releases a handle it can compare-exchange against the one it armed.
pub(crate) struct TimerCore {
    pub(crate) this: Weak<TimerCore>,
    interval_ms: AtomicU32,
    auto_reset: AtomicBool,
    initializing: AtomicBool,
    pending_enabled: AtomicBool,
    disposed: AtomicBool,
    generation_seq: AtomicU64,
    /// Current generation, `0` when nothing is armed.
    pub(crate) generation: AtomicU64,
    /// Armed scheduling handle, `0` when none.
    handle: AtomicUsize,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    marshal_target: Mutex<Option<Weak<dyn MarshalTarget>>>,
    pub(crate) subscribers: Registry,
}

impl TimerCore {
    fn new(interval_ms: u32, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            interval_ms: AtomicU32::new(interval_ms),
            auto_reset: AtomicBool::new(true),
            initializing: AtomicBool::new(false),
            pending_enabled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            generation_seq: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            handle: AtomicUsize::new(0),
            scheduler,
            marshal_target: Mutex::new(None),
            subscribers: Registry::default(),
        })
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst) as u64)
    }

    fn set_interval(&self, interval: Duration) -> TimerResult<()> {
        let millis = interval_millis(interval)?;

        self.interval_ms.store(millis, Ordering::SeqCst);

        if self.enabled() {
            self.rearm();
        }

        Ok(())
    }

    fn auto_reset(&self) -> bool {
        self.auto_reset.load(Ordering::SeqCst)
    }

    fn set_auto_reset(&self, value: bool) {
        self.auto_reset.store(value, Ordering::SeqCst);

        if self.enabled() {
            self.rearm();
        }
    }

    fn enabled(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != 0
    }

    fn set_enabled(&self, value: bool) -> TimerResult<()> {
        if !value {
            self.disarm_or_defer();
            return Ok(());
        }

        if self.disposed.load(Ordering::SeqCst) {
            return Err(TimerError::ObjectDisposed);
        }

        if self.initializing.load(Ordering::SeqCst) {
            log::trace!("defer enable until end of init");
            self.pending_enabled.store(true, Ordering::SeqCst);
            return Ok(());
        }

        if !self.enabled() {
            self.arm();
        }

        Ok(())
    }

    /// `set_enabled(false)`, which cannot fail.
    fn disarm_or_defer(&self) {
        if self.initializing.load(Ordering::SeqCst) {
            self.pending_enabled.store(false, Ordering::SeqCst);
        } else {
            self.disarm();
        }
    }

    fn begin_init(&self) {
        self.close();
        self.initializing.store(true, Ordering::SeqCst);
    }

    fn end_init(&self) -> TimerResult<()> {
        self.initializing.store(false, Ordering::SeqCst);
        self.set_enabled(self.pending_enabled.load(Ordering::SeqCst))
    }

    fn close(&self) {
        self.initializing.store(false, Ordering::SeqCst);
        self.pending_enabled.store(false, Ordering::SeqCst);
        self.disarm();
    }

    fn dispose(&self) {
        self.close();

        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::debug!("timer disposed");
        }
    }

    fn state(&self) -> TimerState {
        if self.disposed.load(Ordering::SeqCst) {
            TimerState::Disposed
        } else if self.initializing.load(Ordering::SeqCst) {
            TimerState::Initializing
        } else if self.enabled() {
            TimerState::Running
        } else {
            TimerState::Stopped
        }
    }

    fn generation(&self) -> Option<Generation> {
        NonZeroU64::new(self.generation.load(Ordering::SeqCst)).map(Generation::new)
    }

    fn marshal_target_slot(&self) -> MutexGuard<'_, Option<Weak<dyn MarshalTarget>>> {
        self.marshal_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn marshal_target(&self) -> Option<Arc<dyn MarshalTarget>> {
        self.marshal_target_slot().as_ref().and_then(Weak::upgrade)
    }

    fn set_marshal_target(&self, target: Option<&Arc<dyn MarshalTarget>>) {
        *self.marshal_target_slot() = target.map(Arc::downgrade);
    }

    fn mint_generation(&self) -> Generation {
        Generation::new(
            NonZeroU64::MIN.saturating_add(self.generation_seq.fetch_add(1, Ordering::Relaxed)),
        )
    }

    fn take_handle(&self) -> Option<SchedulingHandle> {
        NonZeroUsize::new(self.handle.swap(0, Ordering::SeqCst)).map(SchedulingHandle::new)
    }

    /// Release `handle` only if it is still the published one.
    pub(crate) fn release_handle(&self, handle: usize) {
        if handle == 0 {
            return;
        }

        if self
            .handle
            .compare_exchange(handle, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(handle) = NonZeroUsize::new(handle) {
                self.scheduler.cancel(SchedulingHandle::new(handle));
            }
        }
    }

    fn arm(&self) {
        let token = self.mint_generation();

        self.generation.store(token.get(), Ordering::SeqCst);

        let interval = self.interval();
        let repeating = self.auto_reset();
        let armed_handle = Arc::new(AtomicUsize::new(0));
        let callback = self.fire_callback(repeating, armed_handle.clone());

        let handle = if repeating {
            self.scheduler.arm_repeating(interval, token, callback)
        } else {
            self.scheduler.arm_once(interval, token, callback)
        };

        // Visible to the dispatcher before the handle is published.
        armed_handle.store(handle.get(), Ordering::SeqCst);

        if let Some(previous) =
            NonZeroUsize::new(self.handle.swap(handle.get(), Ordering::SeqCst))
        {
            self.scheduler.cancel(SchedulingHandle::new(previous));
        }

        log::debug!(
            "armed generation {} every {:?}, repeating {}",
            token.get(),
            interval,
            repeating
        );

        // A one-shot that fired before the handle was published has already
        // swapped its generation out; release the handle on its behalf.
        if self.generation.load(Ordering::SeqCst) != token.get() {
            self.release_handle(handle.get());
        }
    }

    fn disarm(&self) {
        let previous = self.generation.swap(0, Ordering::SeqCst);

        if let Some(handle) = self.take_handle() {
            self.scheduler.cancel(handle);

            log::debug!("disarmed generation {}", previous);
        }
    }

    fn rearm(&self) {
        self.disarm();
        self.arm();
    }
}

/// Recurring or one-shot timer raising an elapsed event on a background
/// scheduler.
///
/// A new timer is stopped, auto-resets and uses [`DEFAULT_INTERVAL`].
/// Dropping the timer disposes it.
pub struct Timer {
    core: Arc<TimerCore>,
}

impl Timer {
    /// Create a timer with [`DEFAULT_INTERVAL`] on the global executor.
    pub fn new() -> Self {
        Self {
            core: TimerCore::new(
                DEFAULT_INTERVAL.as_millis() as u32,
                Arc::new(global_timer_executor().clone()),
            ),
        }
    }

    /// Create a timer on the global executor.
    ///
    /// # Parameters
    /// * `interval` - Time between elapsed events, `0 < interval <= MAX_INTERVAL`
    pub fn with_interval(interval: Duration) -> TimerResult<Self> {
        Self::with_scheduler(interval, Arc::new(global_timer_executor().clone()))
    }

    /// Create a timer driven by `scheduler`.
    pub fn with_scheduler(interval: Duration, scheduler: Arc<dyn Scheduler>) -> TimerResult<Self> {
        let millis = interval_millis(interval)?;

        Ok(Self {
            core: TimerCore::new(millis, scheduler),
        })
    }

    /// Interval, rounded up to whole milliseconds.
    pub fn interval(&self) -> Duration {
        self.core.interval()
    }

    /// Change the interval; a running timer is re-armed with it.
    pub fn set_interval(&self, interval: Duration) -> TimerResult<()> {
        self.core.set_interval(interval)
    }

    pub fn auto_reset(&self) -> bool {
        self.core.auto_reset()
    }

    /// `true` raises the event every interval, `false` only once after which
    /// the timer stops itself. A running timer is re-armed.
    pub fn set_auto_reset(&self, value: bool) {
        self.core.set_auto_reset(value)
    }

    pub fn enabled(&self) -> bool {
        self.core.enabled()
    }

    /// Arm (`true`) or disarm (`false`) the timer.
    ///
    /// Enabling a disposed timer fails with [`TimerError::ObjectDisposed`].
    /// Between [`begin_init`](Self::begin_init) and [`end_init`](Self::end_init)
    /// the request is only recorded.
    pub fn set_enabled(&self, value: bool) -> TimerResult<()> {
        self.core.set_enabled(value)
    }

    pub fn start(&self) -> TimerResult<()> {
        self.set_enabled(true)
    }

    pub fn stop(&self) {
        self.core.disarm_or_defer()
    }

    pub fn begin_init(&self) {
        self.core.begin_init()
    }

    /// Leave the init window and apply the last enabled value requested in it.
    pub fn end_init(&self) -> TimerResult<()> {
        self.core.end_init()
    }

    /// Stop the timer and discard any deferred init state.
    pub fn close(&self) {
        self.core.close()
    }

    /// Stop the timer for good. Idempotent.
    ///
    /// Does not wait for a callback that is already running on the scheduler.
    pub fn dispose(&self) {
        self.core.dispose()
    }

    pub fn state(&self) -> TimerState {
        self.core.state()
    }

    /// Generation of the current arm, `None` while not armed.
    pub fn generation(&self) -> Option<Generation> {
        self.core.generation()
    }

    pub fn marshal_target(&self) -> Option<Arc<dyn MarshalTarget>> {
        self.core.marshal_target()
    }

    /// Redirect event delivery through `target`. Only a weak reference is kept.
    pub fn set_marshal_target(&self, target: Option<&Arc<dyn MarshalTarget>>) {
        self.core.set_marshal_target(target)
    }

    /// Subscribe `handler` to the elapsed event.
    pub fn add_handler(&self, handler: ElapsedHandler) -> HandlerId {
        self.core.subscribers.add(handler)
    }

    /// Subscribe a closure to the elapsed event.
    pub fn on_elapsed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&TimerRef, &ElapsedEventArgs) + Send + Sync + 'static,
    {
        self.add_handler(Arc::new(handler))
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.core.subscribers.remove(id)
    }

    /// Remove the most recent registration of `handler`.
    pub fn remove_handler_instance(&self, handler: &ElapsedHandler) -> bool {
        self.core.subscribers.remove_instance(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.core.subscribers.len()
    }

    /// Non-owning view of this timer, as handed to elapsed handlers.
    pub fn timer_ref(&self) -> TimerRef {
        TimerRef::new(self.core.clone())
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("interval", &self.interval())
            .field("auto_reset", &self.auto_reset())
            .field("state", &self.state())
            .finish()
    }
}

/// View of a [`Timer`] passed to elapsed handlers.
///
/// Holding a `TimerRef` does not keep the timer from being disposed when its
/// owning [`Timer`] is dropped.
#[derive(Clone)]
pub struct TimerRef {
    core: Arc<TimerCore>,
}

impl TimerRef {
    pub(crate) fn new(core: Arc<TimerCore>) -> Self {
        Self { core }
    }

    pub fn enabled(&self) -> bool {
        self.core.enabled()
    }

    pub fn interval(&self) -> Duration {
        self.core.interval()
    }

    pub fn auto_reset(&self) -> bool {
        self.core.auto_reset()
    }

    pub fn state(&self) -> TimerState {
        self.core.state()
    }

    pub fn generation(&self) -> Option<Generation> {
        self.core.generation()
    }

    /// Same as [`Timer::stop`].
    pub fn stop(&self) {
        self.core.disarm_or_defer()
    }
}

impl fmt::Debug for TimerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRef")
            .field("interval", &self.interval())
            .field("state", &self.state())
            .finish()
    }
}
