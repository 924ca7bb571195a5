//! Queue between the detectors and the action dispatcher. Producers never
//! block: anything offered faster than the rate floor (or into a full
//! queue) is dropped with a warning, which bounds the action rate no
//! matter how chatty a detector gets.

use crossbeam_channel::{ bounded, Receiver, Sender };
use std::sync::{ Arc, Mutex };
use std::time::{ Duration, Instant };

use crate::detect::Action;
use crate::logger::Logger;

/// Floor between two accepted actions.
pub const MIN_ENQUEUE_INTERVAL: Duration = Duration::from_millis(10);

const QUEUE_DEPTH: usize = 64;

/// Rate-limited single-consumer action queue. `None` on the wire is the
/// shutdown sentinel; it is never produced by `enqueue`.
pub struct ActionChannel {
    tx: Sender<Option<Action>>,
    rx: Receiver<Option<Action>>,
    last_accept: Mutex<Option<Instant>>,
    logger: Arc<Logger>,
}

impl ActionChannel {
    pub fn new(logger: Arc<Logger>) -> Self {
        let (tx, rx) = bounded::<Option<Action>>(QUEUE_DEPTH);
        Self {
            tx,
            rx,
            last_accept: Mutex::new(None),
            logger,
        }
    }

    /// Offer an action. Returns whether it was accepted; rejection is
    /// policy, not an error.
    pub fn enqueue(&self, action: Action) -> bool {
        let mut last = self.last_accept.lock().unwrap();
        if let Some(t) = *last {
            if t.elapsed() < MIN_ENQUEUE_INTERVAL {
                let _ = self.logger.warn(
                    &format!("action rate floor hit, dropping {:?}", action)
                );
                return false;
            }
        }
        match self.tx.try_send(Some(action)) {
            Ok(()) => {
                *last = Some(Instant::now());
                true
            }
            Err(_) => {
                let _ = self.logger.warn(&format!("action queue full, dropping {:?}", action));
                false
            }
        }
    }

    /// Block until an action arrives. Returns `None` exactly once per
    /// `shutdown()` call (or when every producer is gone).
    pub fn dequeue(&self) -> Option<Action> {
        match self.rx.recv() {
            Ok(Some(action)) => Some(action),
            Ok(None) => None,
            Err(_) => None,
        }
    }

    /// Wake the consumer without enqueuing real data.
    pub fn shutdown(&self) {
        let _ = self.tx.send(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use std::thread;

    fn test_logger(name: &str) -> Arc<Logger> {
        let path = std::env::temp_dir()
            .join(format!("sound-mouse-chantest-{}-{}.log", name, std::process::id()));
        Arc::new(Logger::new(&path.to_string_lossy(), LogLevel::Error).unwrap())
    }

    #[test]
    fn rate_floor_bounds_accepted_actions() {
        let chan = ActionChannel::new(test_logger("floor"));

        let started = Instant::now();
        let mut accepted = 0usize;
        for _ in 0..100 {
            if chan.enqueue(Action::LeftDown) {
                accepted += 1;
            }
        }
        let elapsed = started.elapsed();

        // producer never blocked
        assert!(elapsed < Duration::from_millis(500));
        // at most one accepted item per 10 ms window
        let windows = (elapsed.as_millis() as usize) / 10 + 1;
        assert!(accepted <= windows, "accepted {} in {} windows", accepted, windows);
        assert!(accepted >= 1);

        // everything accepted is drainable, nothing else is
        for _ in 0..accepted {
            assert_eq!(chan.dequeue(), Some(Action::LeftDown));
        }
        chan.shutdown();
        assert_eq!(chan.dequeue(), None);
    }

    #[test]
    fn spaced_enqueues_all_pass() {
        let chan = ActionChannel::new(test_logger("spaced"));
        assert!(chan.enqueue(Action::ScrollUp));
        thread::sleep(Duration::from_millis(12));
        assert!(chan.enqueue(Action::ScrollDown));
        assert_eq!(chan.dequeue(), Some(Action::ScrollUp));
        assert_eq!(chan.dequeue(), Some(Action::ScrollDown));
    }

    #[test]
    fn shutdown_wakes_blocked_consumer_once() {
        let chan = Arc::new(ActionChannel::new(test_logger("shutdown")));

        let consumer = {
            let chan = chan.clone();
            thread::spawn(move || chan.dequeue())
        };
        thread::sleep(Duration::from_millis(20));
        chan.shutdown();
        assert_eq!(consumer.join().unwrap(), None);

        // the channel keeps working after a shutdown signal is consumed
        thread::sleep(Duration::from_millis(12));
        assert!(chan.enqueue(Action::LeftUp));
        assert_eq!(chan.dequeue(), Some(Action::LeftUp));
    }
}
