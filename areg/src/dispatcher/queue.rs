//! FIFO event queue with a blocking consumer side

use std::collections::VecDeque;

use crate::sync::{lock_state, SyncEvent, Timeout};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO.
///
/// Producers never block. Once closed the queue rejects new items and `pop`
/// returns `None`; whatever was still queued can be taken with `drain`.
#[derive(Debug)]
pub struct EventQueue<T> {
    state: std::sync::Mutex<QueueState<T>>,
    signal: SyncEvent,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            signal: SyncEvent::auto(false),
        }
    }

    /// Append an item. A closed queue hands the item back.
    pub fn push(&self, item: T) -> std::result::Result<(), T> {
        let mut state = lock_state(&self.state);
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.signal.set();
        Ok(())
    }

    /// Take the oldest item, waiting at most `timeout` for one to arrive
    pub fn pop(&self, timeout: Timeout) -> Option<T> {
        let deadline = timeout.deadline();
        loop {
            {
                let mut state = lock_state(&self.state);
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    if !state.items.is_empty() {
                        self.signal.set();
                    }
                    return Some(item);
                }
            }
            let remaining = match deadline {
                None => Timeout::Infinite,
                Some(deadline) => {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    Timeout::from(deadline - now)
                }
            };
            self.signal.wait(remaining);
        }
    }

    /// Reject further items and wake the consumer
    pub fn close(&self) {
        lock_state(&self.state).closed = true;
        self.signal.set();
    }

    /// Remove and return every queued item in FIFO order
    pub fn drain(&self) -> Vec<T> {
        lock_state(&self.state).items.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        lock_state(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock_state(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_per_producer() {
        let queue = Arc::new(EventQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|producer| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for n in 0..250u32 {
                        queue.push((producer, n)).unwrap();
                    }
                })
            })
            .collect();

        let mut last = [None::<u32>; 4];
        for _ in 0..1000 {
            let (producer, n) = queue.pop(Timeout::Millis(5000)).unwrap();
            let slot = &mut last[producer as usize];
            assert!(slot.map_or(true, |prev| prev < n));
            *slot = Some(n);
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue: EventQueue<u8> = EventQueue::new();
        assert_eq!(queue.pop(Timeout::Millis(20)), None);
    }

    #[test]
    fn test_close_rejects_and_drains() {
        let queue = EventQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.close();
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.pop(WAIT), None);
        assert_eq!(queue.drain(), vec![1, 2]);
    }

    const WAIT: Timeout = Timeout::Millis(1000);

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue: Arc<EventQueue<u8>> = Arc::new(EventQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop(Timeout::Infinite))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }
}
