#![allow(dead_code)]

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use event_timer_rs::{FireCallback, Generation, Scheduler, SchedulingHandle, Timer};

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

#[derive(Clone)]
pub struct Armed {
    pub duration: Duration,
    pub token: Generation,
    pub repeating: bool,
    pub handle: SchedulingHandle,
    pub callback: FireCallback,
    pub cancelled: bool,
}

/// Scheduler that never fires on its own; tests fire recorded arms by hand.
#[derive(Default)]
pub struct ManualScheduler {
    armed: Mutex<Vec<Armed>>,
    fire_on_arm: AtomicBool,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fire every new arm once before returning its handle.
    pub fn set_fire_on_arm(&self, value: bool) {
        self.fire_on_arm.store(value, Ordering::SeqCst);
    }

    fn arm(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
        repeating: bool,
    ) -> SchedulingHandle {
        let handle = {
            let mut armed = self.armed.lock().unwrap();

            let handle = SchedulingHandle::new(NonZeroUsize::new(armed.len() + 1).unwrap());

            armed.push(Armed {
                duration,
                token,
                repeating,
                handle,
                callback: callback.clone(),
                cancelled: false,
            });

            handle
        };

        if self.fire_on_arm.load(Ordering::SeqCst) {
            callback(token);
        }

        handle
    }

    /// Every arm so far, in order.
    pub fn arms(&self) -> Vec<Armed> {
        self.armed.lock().unwrap().clone()
    }

    /// Arms that were not cancelled.
    pub fn live(&self) -> Vec<Armed> {
        self.arms().into_iter().filter(|armed| !armed.cancelled).collect()
    }

    pub fn arm_count(&self) -> usize {
        self.armed.lock().unwrap().len()
    }

    /// Deliver a fire for arm `index` with the token it was armed with, even
    /// if it was cancelled since: the fire was already in flight.
    pub fn fire(&self, index: usize) {
        let armed = self.armed.lock().unwrap()[index].clone();

        (armed.callback)(armed.token);
    }

    /// Fire the arm the timer currently holds, if any.
    pub fn fire_current(&self, timer: &Timer) {
        let Some(generation) = timer.generation() else {
            return;
        };

        let armed = self
            .armed
            .lock()
            .unwrap()
            .iter()
            .find(|armed| armed.token == generation)
            .cloned();

        if let Some(armed) = armed {
            (armed.callback)(armed.token);
        }
    }

    /// Timer state and scheduler state agree: one live arm carrying the
    /// current generation while enabled, none otherwise.
    pub fn assert_consistent(&self, timer: &Timer) {
        let live = self.live();

        if timer.enabled() {
            assert_eq!(live.len(), 1, "enabled timer must hold exactly one arm");
            assert_eq!(timer.generation(), Some(live[0].token));
        } else {
            assert!(live.is_empty(), "disabled timer left {} live arms", live.len());
            assert_eq!(timer.generation(), None);
        }
    }

    /// Fire the most recent arm.
    pub fn fire_last(&self) {
        let last = self.arm_count() - 1;

        self.fire(last);
    }
}

impl Scheduler for ManualScheduler {
    fn arm_once(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle {
        self.arm(duration, token, callback, false)
    }

    fn arm_repeating(
        &self,
        duration: Duration,
        token: Generation,
        callback: FireCallback,
    ) -> SchedulingHandle {
        self.arm(duration, token, callback, true)
    }

    fn cancel(&self, handle: SchedulingHandle) {
        let mut armed = self.armed.lock().unwrap();

        if let Some(armed) = armed.iter_mut().find(|armed| armed.handle == handle) {
            armed.cancelled = true;
        }
    }
}
