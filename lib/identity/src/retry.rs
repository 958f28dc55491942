//! Bounded retry with a fixed delay and an overall ceiling.
//!
//! Every network stage of a resolution cycle goes through [`BoundedRetry`]:
//! the profile lookup retries transient absence, the others run a single
//! attempt, and all of them are capped by a ceiling that covers attempts
//! and delays together.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// A network stage of identity resolution, used to label logs and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// One-shot fetch of the current session.
    Session,
    /// Profile lookup.
    Profile,
    /// Role-binding lookup.
    Roles,
    /// Organization lookup.
    Organization,
    /// A whole resolution cycle.
    Cycle,
}

impl Stage {
    /// Returns the stage name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Profile => "profile",
            Self::Roles => "roles",
            Self::Organization => "organization",
            Self::Cycle => "cycle",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Worth trying again after the delay.
    Transient,
    /// Trying again will not help.
    Terminal,
}

/// Why a bounded retry gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// An attempt failed with a terminal error.
    Terminal { attempts: u32, error: E },
    /// Every allowed attempt failed transiently.
    Exhausted { attempts: u32, error: E },
    /// The ceiling elapsed before the sequence finished.
    TimedOut { stage: Stage, after: Duration },
}

impl<E> RetryError<E> {
    /// Returns the last collaborator error, if the sequence did not time out.
    #[must_use]
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Terminal { error, .. } | Self::Exhausted { error, .. } => Some(error),
            Self::TimedOut { .. } => None,
        }
    }

    /// Returns true if the ceiling elapsed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal { attempts, error } => {
                write!(f, "gave up after {attempts} attempt(s): {error}")
            }
            Self::Exhausted { attempts, error } => {
                write!(f, "still failing after {attempts} attempt(s): {error}")
            }
            Self::TimedOut { stage, after } => {
                write!(f, "{stage} did not finish within {}ms", after.as_millis())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// A timeout-wrapped retrying task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRetry {
    stage: Stage,
    max_attempts: u32,
    delay: Duration,
    ceiling: Duration,
}

impl BoundedRetry {
    /// A single attempt bounded by `ceiling`.
    #[must_use]
    pub fn once(stage: Stage, ceiling: Duration) -> Self {
        Self {
            stage,
            max_attempts: 1,
            delay: Duration::ZERO,
            ceiling,
        }
    }

    /// Allows up to `max_attempts` attempts separated by `delay`.
    ///
    /// A cap of zero is treated as one attempt.
    #[must_use]
    pub fn with_attempts(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Runs `op` until it succeeds, fails terminally, runs out of attempts
    /// or the ceiling elapses.
    ///
    /// Dropping the returned future abandons the in-flight attempt; it does
    /// not guarantee the underlying request is aborted remotely.
    pub async fn run<T, E, F, Fut, C>(&self, op: F, classify: C) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Attempt,
    {
        match tokio::time::timeout(self.ceiling, self.attempts(op, classify)).await {
            Ok(result) => result,
            Err(_) => Err(RetryError::TimedOut {
                stage: self.stage,
                after: self.ceiling,
            }),
        }
    }

    async fn attempts<T, E, F, Fut, C>(&self, mut op: F, classify: C) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Attempt,
    {
        let mut attempt = 1;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match classify(&error) {
                Attempt::Terminal => {
                    return Err(RetryError::Terminal {
                        attempts: attempt,
                        error,
                    });
                }
                Attempt::Transient if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Attempt::Transient => {
                    debug!(
                        stage = %self.stage,
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum FakeError {
        Missing,
        Broken,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Missing => write!(f, "missing"),
                Self::Broken => write!(f, "broken"),
            }
        }
    }

    fn classify(error: &FakeError) -> Attempt {
        match error {
            FakeError::Missing => Attempt::Transient,
            FakeError::Broken => Attempt::Terminal,
        }
    }

    fn profile_retry() -> BoundedRetry {
        BoundedRetry::once(Stage::Profile, Duration::from_secs(8))
            .with_attempts(2, Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_miss() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = profile_retry()
            .run(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(FakeError::Missing)
                        } else {
                            Ok("row")
                        }
                    }
                },
                classify,
            )
            .await;

        assert_eq!(result, Ok("row"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_attempt_cap() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = profile_retry()
            .run(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(FakeError::Missing)
                    }
                },
                classify,
            )
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                error: FakeError::Missing
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = profile_retry()
            .run(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(FakeError::Broken)
                    }
                },
                classify,
            )
            .await;

        assert_eq!(
            result.map_err(RetryError::into_error),
            Err(Some(FakeError::Broken))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_covers_hanging_attempt() {
        let start = tokio::time::Instant::now();
        let retry = BoundedRetry::once(Stage::Roles, Duration::from_secs(3));

        let result: Result<(), RetryError<FakeError>> = retry
            .run(std::future::pending::<Result<(), FakeError>>, classify)
            .await;

        assert!(result.as_ref().is_err_and(RetryError::is_timeout));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
        assert!(result.unwrap_err().to_string().contains("roles"));
    }

    #[test]
    fn zero_attempts_means_one() {
        let retry = BoundedRetry::once(Stage::Profile, Duration::from_secs(1))
            .with_attempts(0, Duration::ZERO);
        assert_eq!(retry.max_attempts(), 1);
    }
}
