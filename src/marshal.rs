use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Mutex, MutexGuard, PoisonError,
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use crate::MarshalTarget;

type Job = Box<dyn FnOnce() + Send>;

/// Marshal target that runs redirected deliveries on the thread that created
/// it.
///
/// Deliveries raised on any other thread are queued; the owner thread runs
/// them by calling [`pump`](QueueMarshal::pump). Deliveries raised on the
/// owner thread itself are not redirected.
pub struct QueueMarshal {
    owner: ThreadId,
    sender: Mutex<Sender<Job>>,
    receiver: Mutex<Receiver<Job>>,
}

impl QueueMarshal {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();

        Self {
            owner: thread::current().id(),
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn receiver(&self) -> MutexGuard<'_, Receiver<Job>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every queued delivery on the calling thread, returns how many ran.
    pub fn pump(&self) -> usize {
        let jobs: Vec<Job> = self.receiver().try_iter().collect();

        let count = jobs.len();

        for job in jobs {
            job();
        }

        count
    }

    /// Wait up to `timeout` for at least `min` deliveries, running each on the
    /// calling thread as it arrives. Returns how many ran.
    pub fn pump_for(&self, min: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;

        let mut count = 0;

        while count < min {
            let remaining = deadline.saturating_duration_since(Instant::now());

            let job = match self.receiver().recv_timeout(remaining) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            };

            job();

            count += 1;
        }

        count + self.pump()
    }
}

impl Default for QueueMarshal {
    fn default() -> Self {
        Self::new()
    }
}

impl MarshalTarget for QueueMarshal {
    fn requires_redirection(&self) -> bool {
        thread::current().id() != self.owner
    }

    fn invoke_redirected(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);

        if sender.send(job).is_err() {
            log::debug!("marshal queue closed, delivery dropped");
        }
    }
}
