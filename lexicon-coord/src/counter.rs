//! Optimistic compare-and-set counter.
//!
//! ```text
//! loop:
//!   C = get_count(path)
//!   compare_and_set(path, C, C + 1) ── won ──→ return C
//!            │
//!           lost → back off, retry (bounded by attempts and deadline)
//! ```
//!
//! At most one caller can win any given `C`, so returned codes are unique
//! across every process sharing the coordination service.

use std::time::{Duration, Instant};

use lexicon_core::{Code, CoordinationConfig, CoordinationError, LexiconResult};

use crate::CoordinationSession;

/// Bounds on the compare-and-set retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterPolicy {
    pub max_attempts: u32,
    pub deadline: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CounterPolicy {
    fn default() -> Self {
        Self::from(&CoordinationConfig::default())
    }
}

impl From<&CoordinationConfig> for CounterPolicy {
    fn from(config: &CoordinationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            deadline: config.deadline(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// The global code counter stored at one coordination path.
#[derive(Debug, Clone)]
pub struct SharedCounter {
    path: String,
    policy: CounterPolicy,
}

impl SharedCounter {
    pub fn new(path: impl Into<String>, policy: CounterPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::new(config.counter_path.clone(), CounterPolicy::from(config))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Claim the next code, returning the counter's value before the swap.
    pub async fn next_value(&self, session: &dyn CoordinationSession) -> LexiconResult<Code> {
        let started = Instant::now();
        let mut backoff = self.policy.initial_backoff;
        let warn_at = (self.policy.max_attempts / 2).max(1);

        for attempt in 1..=self.policy.max_attempts {
            let current = session.get_count(&self.path).await?;
            let next = current
                .checked_add(1)
                .ok_or_else(|| CoordinationError::CounterExhausted {
                    path: self.path.clone(),
                })?;

            if session.compare_and_set(&self.path, current, next).await? {
                return Ok(Code::new(current));
            }

            tracing::trace!(path = %self.path, attempt, observed = current, "Counter swap lost, retrying");
            if attempt == warn_at {
                tracing::warn!(
                    path = %self.path,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    "Counter under heavy contention"
                );
            }

            let elapsed = started.elapsed();
            if elapsed >= self.policy.deadline {
                return Err(CoordinationError::DeadlineExceeded {
                    path: self.path.clone(),
                    elapsed_ms: elapsed.as_millis() as u64,
                }
                .into());
            }

            if backoff.is_zero() {
                tokio::task::yield_now().await;
                backoff = Duration::from_millis(1).min(self.policy.max_backoff);
            } else {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.policy.max_backoff);
            }
        }

        Err(CoordinationError::ContentionExhausted {
            path: self.path.clone(),
            attempts: self.policy.max_attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoordinationService, InMemoryCoordinationService};
    use lexicon_core::LexiconError;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    const PATH: &str = "/lexicon/code-counter";

    fn fast_policy(max_attempts: u32) -> CounterPolicy {
        CounterPolicy {
            max_attempts,
            deadline: Duration::from_secs(10),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    async fn started_session(
        service: &InMemoryCoordinationService,
    ) -> Box<dyn crate::CoordinationSession> {
        let mut session = service
            .connect("memory://test")
            .await
            .expect("connect should succeed");
        session.start().await.expect("start should succeed");
        session
    }

    #[tokio::test]
    async fn test_sequential_values_start_at_zero() {
        let service = InMemoryCoordinationService::new();
        let session = started_session(&service).await;
        let counter = SharedCounter::new(PATH, fast_policy(10));

        for expected in 0..5 {
            let code = counter
                .next_value(session.as_ref())
                .await
                .expect("next_value should succeed");
            assert_eq!(code, Code::new(expected));
        }
        assert_eq!(service.counter_value(PATH).await, 5);
    }

    #[tokio::test]
    async fn test_retries_after_lost_swaps() {
        let service = InMemoryCoordinationService::new();
        let session = started_session(&service).await;
        let counter = SharedCounter::new(PATH, fast_policy(10));

        // Two competitors win first; each takes one value.
        service.inject_contention(2);
        let code = counter
            .next_value(session.as_ref())
            .await
            .expect("next_value should succeed after retries");
        assert_eq!(code, Code::new(2));
    }

    #[tokio::test]
    async fn test_contention_is_bounded() {
        let service = InMemoryCoordinationService::new();
        let session = started_session(&service).await;
        let counter = SharedCounter::new(PATH, fast_policy(3));

        service.inject_contention(100);
        let err = counter
            .next_value(session.as_ref())
            .await
            .expect_err("contention should exhaust the attempt budget");
        assert!(matches!(
            err,
            LexiconError::Coordination(CoordinationError::ContentionExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let service = InMemoryCoordinationService::new();
        let session = started_session(&service).await;
        let counter = SharedCounter::new(
            PATH,
            CounterPolicy {
                max_attempts: u32::MAX,
                deadline: Duration::from_millis(20),
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(5),
            },
        );

        service.inject_contention(u32::MAX);
        let err = counter
            .next_value(session.as_ref())
            .await
            .expect_err("deadline should stop the loop");
        assert!(matches!(
            err,
            LexiconError::Coordination(CoordinationError::DeadlineExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_counter_exhausted_at_max() {
        let service = InMemoryCoordinationService::new();
        service.set_counter(PATH, i32::MAX).await;
        let session = started_session(&service).await;
        let counter = SharedCounter::new(PATH, fast_policy(3));

        let err = counter
            .next_value(session.as_ref())
            .await
            .expect_err("counter at i32::MAX cannot advance");
        assert!(matches!(
            err,
            LexiconError::Coordination(CoordinationError::CounterExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_unstarted_session_is_rejected() {
        let service = InMemoryCoordinationService::new();
        let session = service
            .connect("memory://test")
            .await
            .expect("connect should succeed");
        let counter = SharedCounter::new(PATH, fast_policy(3));

        let err = counter
            .next_value(session.as_ref())
            .await
            .expect_err("unstarted session should fail");
        assert!(matches!(
            err,
            LexiconError::Coordination(CoordinationError::SessionNotStarted)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_callers_get_consecutive_distinct_values() {
        let service = InMemoryCoordinationService::new();
        service.set_counter(PATH, 1000).await;
        let counter = Arc::new(SharedCounter::new(PATH, fast_policy(10_000)));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let service = service.clone();
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let session = started_session(&service).await;
                let mut codes = Vec::with_capacity(50);
                for _ in 0..50 {
                    codes.push(
                        counter
                            .next_value(session.as_ref())
                            .await
                            .expect("next_value should succeed"),
                    );
                }
                codes
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.expect("task should not panic"));
        }

        let distinct: BTreeSet<i32> = all.iter().map(|c| c.get()).collect();
        assert_eq!(all.len(), 100);
        assert_eq!(distinct.len(), 100, "no code may be handed out twice");
        assert_eq!(distinct, (1000..1100).collect::<BTreeSet<i32>>(), "no gaps");
    }
}
