use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::{ElapsedEventArgs, TimerRef};

/// Subscriber of the elapsed event.
pub type ElapsedHandler = Arc<dyn Fn(&TimerRef, &ElapsedEventArgs) + Send + Sync>;

/// Identifies one registration of an [`ElapsedHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub(crate) type Subscribers = Arc<Vec<(HandlerId, ElapsedHandler)>>;

/// Ordered, copy-on-write list of elapsed handlers.
///
/// Delivery iterates a snapshot: handlers added or removed while a fire is
/// being delivered only affect the following fires.
#[derive(Default)]
pub(crate) struct Registry {
    handler_id_seq: AtomicU64,
    handlers: Mutex<Subscribers>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, handler: ElapsedHandler) -> HandlerId {
        let id = HandlerId(self.handler_id_seq.fetch_add(1, Ordering::Relaxed));

        Arc::make_mut(&mut self.lock()).push((id, handler));

        id
    }

    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();

        match handlers.iter().position(|(registered, _)| *registered == id) {
            Some(index) => {
                Arc::make_mut(&mut handlers).remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove the most recent registration of `handler`.
    pub(crate) fn remove_instance(&self, handler: &ElapsedHandler) -> bool {
        let mut handlers = self.lock();

        match handlers
            .iter()
            .rposition(|(_, registered)| Arc::ptr_eq(registered, handler))
        {
            Some(index) => {
                Arc::make_mut(&mut handlers).remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Subscribers {
        self.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
