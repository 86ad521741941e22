use std::task::Poll;

struct Slot<T> {
    round: u64,
    value: T,
}

/// Single level hashed time wheel with per entry round counters.
pub struct TimeWheel<T> {
    slots: Vec<Vec<Slot<T>>>,
    cursor: usize,
}

impl<T> TimeWheel<T> {
    /// Create a wheel with `step` slots.
    pub fn new(step: u64) -> Self {
        let step = step.max(1) as usize;

        let mut slots = Vec::with_capacity(step);

        slots.resize_with(step, Vec::new);

        Self { slots, cursor: 0 }
    }

    /// Add `value` to expire after `ticks` calls of [`tick`](Self::tick).
    ///
    /// A zero `ticks` is treated as one: the wheel never expires an entry on
    /// the tick it was added in.
    pub fn add(&mut self, ticks: u64, value: T) {
        let ticks = ticks.max(1);
        let step = self.slots.len() as u64;

        let index = ((self.cursor as u64 + ticks % step) % step) as usize;
        let round = (ticks - 1) / step;

        self.slots[index].push(Slot { round, value });
    }

    /// Advance the cursor one slot and return the entries that expired.
    pub fn tick(&mut self) -> Poll<Vec<T>> {
        self.cursor = (self.cursor + 1) % self.slots.len();

        let slot = &mut self.slots[self.cursor];

        if slot.is_empty() {
            return Poll::Pending;
        }

        let mut fired = vec![];
        let mut waiting = Vec::with_capacity(slot.len());

        for mut entry in slot.drain(..) {
            if entry.round == 0 {
                fired.push(entry.value);
            } else {
                entry.round -= 1;
                waiting.push(entry);
            }
        }

        *slot = waiting;

        if fired.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(fired)
        }
    }

    /// Number of entries still held by the wheel.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }
}
