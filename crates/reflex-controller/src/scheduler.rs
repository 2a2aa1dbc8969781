//! Timer wheel and backoff policy
//!
//! The wheel runs on its own task and only ever enqueues fire events back
//! onto the controller mailbox; it never executes device logic itself.
//! Periodic tasks cancel cooperatively by returning [`TaskOutcome::Cancel`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::controller::Command;

/// Identifier for a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

/// What a periodic task body tells the scheduler after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Reschedule per the task's schedule
    Continue,
    /// Stop future rescheduling; not an error
    Cancel,
}

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub step: Duration,
    /// Fractional jitter applied symmetrically (0.33 ⇒ ±33 %)
    pub jitter: f64,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(90),
            step: Duration::from_secs(90),
            jitter: 0.33,
            cap: Duration::from_secs(15 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = (self.initial + self.step * attempt).min(self.cap);
        let spread = 1.0 + self.jitter * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_secs_f64(base.as_secs_f64() * spread)
    }
}

/// When a task fires again
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire once after the delay
    Once(Duration),
    /// Fire repeatedly at a fixed interval
    Every(Duration),
    /// Fire repeatedly under a backoff policy
    Backoff(BackoffPolicy),
}

impl Schedule {
    /// Delay before the next fire, given how many runs have completed
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match self {
            Schedule::Once(delay) => *delay,
            Schedule::Every(interval) => *interval,
            Schedule::Backoff(policy) => policy.delay(attempt),
        }
    }

    /// Whether the task reschedules after a run
    pub fn is_periodic(&self) -> bool {
        !matches!(self, Schedule::Once(_))
    }
}

/// Handle used by the controller to arm deadlines on the wheel
#[derive(Clone)]
pub struct WheelHandle {
    tx: mpsc::UnboundedSender<(TimerId, Instant)>,
}

impl WheelHandle {
    /// Arm a deadline; the wheel enqueues `Command::TimerFired` when it lapses
    pub fn arm(&self, id: TimerId, delay: Duration) {
        let _ = self.tx.send((id, Instant::now() + delay));
    }
}

/// Spawn the timer wheel task
pub fn spawn_wheel(commands: mpsc::Sender<Command>) -> WheelHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<(TimerId, Instant)>();

    tokio::spawn(async move {
        let mut heap: BinaryHeap<Reverse<(Instant, TimerId)>> = BinaryHeap::new();

        loop {
            let next = heap.peek().map(|Reverse((when, _))| *when);

            tokio::select! {
                inserted = rx.recv() => match inserted {
                    Some((id, when)) => heap.push(Reverse((when, id))),
                    None => break,
                },
                () = async {
                    match next {
                        Some(when) => tokio::time::sleep_until(when).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(Reverse((_, id))) = heap.pop() {
                        if commands.send(Command::TimerFired(id)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        debug!("Timer wheel stopped");
    });

    WheelHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };

        assert_eq!(policy.delay(0), Duration::from_secs(90));
        assert_eq!(policy.delay(1), Duration::from_secs(180));
        assert_eq!(policy.delay(5), Duration::from_secs(540));
        // 90 + 90 * 20 = 1980s caps at 900s
        assert_eq!(policy.delay(20), Duration::from_secs(900));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..8 {
            let base = (policy.initial + policy.step * attempt).min(policy.cap);
            let delay = policy.delay(attempt).as_secs_f64();
            assert!(delay >= base.as_secs_f64() * 0.66);
            assert!(delay <= base.as_secs_f64() * 1.34);
        }
    }

    #[test]
    fn test_schedule_next_delay() {
        let every = Schedule::Every(Duration::from_secs(30));
        assert_eq!(every.next_delay(0), Duration::from_secs(30));
        assert_eq!(every.next_delay(7), Duration::from_secs(30));
        assert!(every.is_periodic());
        assert!(!Schedule::Once(Duration::from_secs(1)).is_periodic());
    }

    #[tokio::test]
    async fn test_wheel_fires_in_deadline_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let wheel = spawn_wheel(tx);

        wheel.arm(TimerId(2), Duration::from_millis(40));
        wheel.arm(TimerId(1), Duration::from_millis(10));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        assert!(matches!(first, Command::TimerFired(TimerId(1))));
        assert!(matches!(second, Command::TimerFired(TimerId(2))));
    }
}
