use std::{
    collections::HashMap,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::Poll,
    time::{Duration, Instant},
};

mod timewheel;
use timewheel::*;

use crate::{FireCallback, Generation, Scheduler, SchedulingHandle};

struct Entry {
    token: Generation,
    /// Re-arm period in ticks, `None` for one-shot entries.
    period: Option<u64>,
    callback: FireCallback,
}

struct Fired {
    timer: NonZeroUsize,
    token: Generation,
    callback: FireCallback,
}

struct TimerExecutorImpl {
    timer_id_seq: NonZeroUsize,
    /// Ticks processed since the executor origin.
    ticks: u64,
    wheel: TimeWheel<NonZeroUsize>,
    entries: HashMap<NonZeroUsize, Entry>,
}

impl TimerExecutorImpl {
    fn new(step: u64) -> Self {
        Self {
            timer_id_seq: NonZeroUsize::MIN,
            ticks: 0,
            wheel: TimeWheel::new(step),
            entries: Default::default(),
        }
    }

    fn create_timer(&mut self, target_tick: u64, entry: Entry) -> NonZeroUsize {
        let timer = self.timer_id_seq;

        self.timer_id_seq = self.timer_id_seq.saturating_add(1);

        self.wheel.add(target_tick.saturating_sub(self.ticks), timer);
        self.entries.insert(timer, entry);

        timer
    }

    fn cancel(&mut self, timer: NonZeroUsize) -> bool {
        // The wheel slot is left behind and skipped when it expires.
        self.entries.remove(&timer).is_some()
    }

    fn tick(&mut self) -> Vec<Fired> {
        self.ticks += 1;

        let mut fired = vec![];

        if let Poll::Ready(timers) = self.wheel.tick() {
            log::trace!("ready timers {:?}", timers);

            for timer in timers {
                let Some(entry) = self.entries.get(&timer) else {
                    log::trace!("skip cancelled timer {}", timer);
                    continue;
                };

                let period = entry.period;

                fired.push(Fired {
                    timer,
                    token: entry.token,
                    callback: entry.callback.clone(),
                });

                match period {
                    Some(period) => self.wheel.add(period, timer),
                    None => {
                        self.entries.remove(&timer);
                    }
                }
            }
        }

        fired
    }
}

/// Background scheduler: a hashed time wheel advanced by a dedicated thread
/// every `tick_duration`.
///
/// Callbacks run on the wheel thread, outside of the wheel lock, so they are
/// free to arm or cancel timers on the same executor.
#[derive(Clone)]
pub struct TimerExecutor {
    tick_duration: Duration,
    origin: Instant,
    inner: Arc<Mutex<TimerExecutorImpl>>,
}

impl TimerExecutor {
    /// Create an executor and start its tick thread.
    ///
    /// # Parameters
    /// * `step` - Number of wheel slots
    /// * `tick_duration` - Wheel resolution, every armed duration is rounded up to it
    pub fn new(step: u64, tick_duration: Duration) -> Self {
        let tick_duration = tick_duration.max(Duration::from_millis(1));

        let inner: Arc<Mutex<TimerExecutorImpl>> =
            Arc::new(Mutex::new(TimerExecutorImpl::new(step)));

        let inner_tick = inner.clone();

        let origin = Instant::now();

        std::thread::spawn(move || {
            let mut deadline = origin;

            // When no other strong reference is alive, stop tick thread
            while Arc::strong_count(&inner_tick) > 1 {
                deadline += tick_duration;

                let now = Instant::now();

                if deadline > now {
                    std::thread::sleep(deadline - now);
                }

                let fired = lock(&inner_tick).tick();

                for Fired {
                    timer,
                    token,
                    callback,
                } in fired
                {
                    log::trace!("fire timer {} generation {}", timer, token.get());

                    if panic::catch_unwind(AssertUnwindSafe(|| callback(token))).is_err() {
                        log::warn!("timer {} callback panicked", timer);
                    }
                }
            }

            log::debug!("timer executor stopped");
        });

        Self {
            inner,
            origin,
            tick_duration,
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Number of armed, not yet cancelled or expired, wakeups.
    pub fn pending(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Arm `callback` to fire `delay` from now and, if `period` is set,
    /// every `period` afterwards.
    pub fn arm_at(
        &self,
        delay: Duration,
        period: Option<Duration>,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle {
        let target_tick = self.ticks_ceil(self.origin.elapsed().saturating_add(delay));

        let period = period.map(|period| self.ticks_ceil(period).max(1));

        let timer = lock(&self.inner).create_timer(
            target_tick,
            Entry {
                token,
                period,
                callback,
            },
        );

        log::debug!(
            "arm timer {} generation {} at tick {}, period {:?}",
            timer,
            token.get(),
            target_tick,
            period
        );

        SchedulingHandle::new(timer)
    }

    fn ticks_ceil(&self, duration: Duration) -> u64 {
        let tick = self.tick_duration.as_nanos();

        u64::try_from((duration.as_nanos() + tick - 1) / tick).unwrap_or(u64::MAX)
    }
}

impl Scheduler for TimerExecutor {
    fn arm_once(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle {
        self.arm_at(duration, None, token, callback)
    }

    fn arm_repeating(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle {
        self.arm_at(duration, Some(duration), token, callback)
    }

    fn cancel(&self, handle: SchedulingHandle) {
        if let Some(timer) = NonZeroUsize::new(handle.get()) {
            if lock(&self.inner).cancel(timer) {
                log::debug!("cancel timer {}", timer);
            }
        }
    }
}

fn lock(inner: &Mutex<TimerExecutorImpl>) -> MutexGuard<'_, TimerExecutorImpl> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared executor used by timers created without an explicit scheduler
pub fn global_timer_executor() -> &'static TimerExecutor {
    use once_cell::sync::OnceCell;

    static INSTANCE: OnceCell<TimerExecutor> = OnceCell::new();

    INSTANCE.get_or_init(|| TimerExecutor::new(4096, Duration::from_millis(1)))
}
