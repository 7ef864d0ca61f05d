use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct TimerEntry<K> {
    key: K,
    due: Instant,
    seq: u64,
}

impl<K> Ord for TimerEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<K> PartialOrd for TimerEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for TimerEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<K> Eq for TimerEntry<K> {}

#[derive(Debug)]
struct ActiveTimer<T> {
    due: Instant,
    seq: u64,
    payload: T,
}

/// One-shot delayed events keyed by `K`.
///
/// Setting a key that is already pending replaces it; the old heap entry stays
/// behind and is skipped when it surfaces. Callers drain with [`TimerQueue::pop_ready`]
/// from their own tick and re-check their state before acting on the payload.
#[derive(Debug)]
pub struct TimerQueue<K, T> {
    heap: BinaryHeap<TimerEntry<K>>,
    active: HashMap<K, ActiveTimer<T>>,
    next_seq: u64,
}

impl<K: Copy + Eq + Hash, T> Default for TimerQueue<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash, T> TimerQueue<K, T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            active: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn set(&mut self, key: K, due: Instant, payload: T) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.active.insert(key, ActiveTimer { due, seq, payload });
        self.heap.push(TimerEntry { key, due, seq });
    }

    pub fn next_due(&mut self) -> Option<Instant> {
        self.skip_stale();
        self.heap.peek().map(|entry| entry.due)
    }

    pub fn pop_ready(&mut self, now: Instant) -> Option<(K, T)> {
        self.skip_stale();
        let entry = self.heap.peek()?;
        if entry.due > now {
            return None;
        }
        let entry = self.heap.pop()?;
        let timer = self.active.remove(&entry.key)?;
        Some((entry.key, timer.payload))
    }

    pub fn stop(&mut self, key: K) -> Option<T> {
        self.active.remove(&key).map(|timer| timer.payload)
    }

    pub fn remaining(&self, key: K, now: Instant) -> Option<Duration> {
        let timer = self.active.get(&key)?;
        Some(timer.due.saturating_duration_since(now))
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.active.keys().copied()
    }

    pub fn contains(&self, key: K) -> bool {
        self.active.contains_key(&key)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.active.clear();
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn skip_stale(&mut self) {
        while let Some(entry) = self.heap.peek() {
            match self.active.get(&entry.key) {
                Some(active) if active.seq == entry.seq => return,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn pops_earliest_first() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.set(1u32, start + ms(100), "late");
        timers.set(2u32, start + ms(50), "early");
        assert_eq!(timers.len(), 2);

        assert_eq!(timers.pop_ready(start + ms(49)), None);
        assert_eq!(timers.pop_ready(start + ms(50)), Some((2, "early")));
        assert_eq!(timers.pop_ready(start + ms(99)), None);
        assert_eq!(timers.pop_ready(start + ms(100)), Some((1, "late")));
        assert!(timers.is_empty());
    }

    #[test]
    fn replacing_a_key_drops_the_old_timer() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.set(7u32, start + ms(10), 1);
        timers.set(7u32, start + ms(500), 2);

        assert_eq!(timers.pop_ready(start + ms(20)), None);
        assert_eq!(timers.remaining(7, start), Some(ms(500)));
        assert_eq!(timers.pop_ready(start + ms(500)), Some((7, 2)));
        assert_eq!(timers.pop_ready(start + ms(900)), None);
    }

    #[test]
    fn stop_cancels_pending_timer() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.set(1u32, start + ms(10), ());
        assert_eq!(timers.stop(1), Some(()));
        assert_eq!(timers.stop(1), None);
        assert_eq!(timers.pop_ready(start + ms(10)), None);
        assert_eq!(timers.next_due(), None);
    }

    #[test]
    fn same_due_time_keeps_insertion_order() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        for key in 1u32..=3 {
            timers.set(key, start, key);
        }
        let mut ready = Vec::new();
        while let Some((key, _)) = timers.pop_ready(start) {
            ready.push(key);
        }
        assert_eq!(ready, vec![1, 2, 3]);
    }
}
