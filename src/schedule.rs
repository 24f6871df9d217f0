use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::dispatch::Clock;
use crate::error::DispatchError;

/// One-shot deferred start. Cloning shares the waiting flag.
#[derive(Debug, Clone, Default)]
pub struct ScheduleGate {
    waiting: Arc<AtomicBool>,
}

impl ScheduleGate {
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Marks the gate as waiting if `target` lies in the future.
    ///
    /// Returns how long to wait, or `None` to run immediately. The flag is
    /// set before returning so a caller can hand the wait to a background task.
    pub fn arm(
        &self,
        now: DateTime<Utc>,
        target: Option<DateTime<Utc>>,
    ) -> Result<Option<std::time::Duration>, DispatchError> {
        if self.is_waiting() {
            return Err(DispatchError::AlreadyScheduled);
        }
        let Some(target) = target else {
            return Ok(None);
        };
        match (target - now).to_std() {
            Ok(wait) if !wait.is_zero() => {
                if self
                    .waiting
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return Err(DispatchError::AlreadyScheduled);
                }
                info!(%target, wait_secs = wait.as_secs(), "campaign scheduled");
                Ok(Some(wait))
            }
            _ => {
                info!(%target, "scheduled time already passed, starting now");
                Ok(None)
            }
        }
    }

    /// Waits out an armed delay, clears the flag, then runs `run` exactly once.
    pub async fn fire<C, F, Fut>(&self, clock: &C, wait: Option<std::time::Duration>, run: F) -> Fut::Output
    where
        C: Clock,
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        if let Some(wait) = wait {
            clock.sleep(wait).await;
        }
        self.waiting.store(false, Ordering::SeqCst);
        run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    async fn schedule_or_run_now<C, F, Fut>(
        gate: &ScheduleGate,
        clock: &C,
        target: Option<DateTime<Utc>>,
        run: F,
    ) -> Result<Fut::Output, DispatchError>
    where
        C: Clock,
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let wait = gate.arm(clock.now(), target)?;
        Ok(gate.fire(clock, wait, run).await)
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_target_waits_then_runs_once() {
        let clock = Arc::new(ManualClock::at(t0()));
        let gate = ScheduleGate::default();
        let runs = Arc::new(AtomicUsize::new(0));

        let task = {
            let (gate, clock, runs) = (gate.clone(), clock.clone(), runs.clone());
            tokio::spawn(async move {
                schedule_or_run_now(&gate, &clock, Some(t0() + chrono::Duration::minutes(10)), || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        assert!(gate.is_waiting());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            gate.arm(t0(), Some(t0() + chrono::Duration::minutes(20))),
            Err(DispatchError::AlreadyScheduled)
        );

        task.await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!gate.is_waiting());
        assert_eq!(*clock.sleeps.lock().unwrap(), vec![Duration::from_secs(600)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_target_runs_immediately() {
        let clock = ManualClock::at(t0());
        let gate = ScheduleGate::default();
        let target = Some(t0() - chrono::Duration::minutes(1));
        let seen_waiting = schedule_or_run_now(&gate, &clock, target, || async { gate.is_waiting() })
            .await
            .unwrap();

        assert!(!seen_waiting);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_target_runs_immediately() {
        let clock = ManualClock::at(t0());
        let gate = ScheduleGate::default();
        let out = schedule_or_run_now(&gate, &clock, None, || async { 7 })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert!(!gate.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_cleared_when_run_starts() {
        let clock = ManualClock::at(t0());
        let gate = ScheduleGate::default();
        let target = Some(t0() + chrono::Duration::seconds(5));
        let observed = schedule_or_run_now(&gate, &clock, target, || async { gate.is_waiting() })
            .await
            .unwrap();
        assert!(!observed);
    }
}
