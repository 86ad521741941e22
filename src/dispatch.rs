use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    registry::Subscribers, timer::TimerCore, ElapsedEventArgs, FireCallback, Generation, TimerRef,
};

impl TimerCore {
    /// Callback handed to the scheduler for one arm.
    ///
    /// Only a weak reference to the core is captured, a fire for a dropped
    /// timer is a no-op. `armed_handle` receives the handle of this arm once
    /// the scheduler returned it.
    pub(crate) fn fire_callback(
        &self,
        repeating: bool,
        armed_handle: Arc<AtomicUsize>,
    ) -> FireCallback {
        let core = self.this.clone();

        Arc::new(move |token: Generation| match core.upgrade() {
            Some(core) => core.dispatch(token, repeating, &armed_handle),
            None => log::trace!("drop fire {} of released timer", token.get()),
        })
    }

    /// Deliver one fire. Never panics into the scheduler thread.
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        token: Generation,
        repeating: bool,
        armed_handle: &AtomicUsize,
    ) {
        if self.generation.load(Ordering::SeqCst) != token.get() {
            log::trace!("discard stale fire, generation {}", token.get());
            return;
        }

        if !repeating {
            // Swapping the token out disables this arm and nothing newer.
            if self
                .generation
                .compare_exchange(token.get(), 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            // Zero while the arm is still being published, the arming side
            // then releases the handle itself.
            self.release_handle(armed_handle.load(Ordering::SeqCst));
        }

        let args = ElapsedEventArgs::new(token);

        let subscribers = self.subscribers.snapshot();

        if subscribers.is_empty() {
            return;
        }

        let sender = TimerRef::new(self.clone());

        if let Some(target) = self.marshal_target() {
            let redirected = panic::catch_unwind(AssertUnwindSafe(|| {
                if !target.requires_redirection() {
                    return false;
                }

                let sender = sender.clone();
                let subscribers = subscribers.clone();
                let args = args.clone();

                target.invoke_redirected(Box::new(move || deliver(&sender, &subscribers, &args)));

                true
            }));

            match redirected {
                Ok(true) => return,
                Ok(false) => {}
                Err(_) => {
                    log::debug!("marshal target panicked, fire {} dropped", token.get());
                    return;
                }
            }
        }

        deliver(&sender, &subscribers, &args);
    }
}

/// Invoke `subscribers` in registration order, containing panics per handler.
fn deliver(sender: &TimerRef, subscribers: &Subscribers, args: &ElapsedEventArgs) {
    for (id, handler) in subscribers.iter() {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(sender, args))).is_err() {
            log::debug!(
                "elapsed handler {:?} panicked, generation {}",
                id,
                args.generation().get()
            );
        }
    }
}
