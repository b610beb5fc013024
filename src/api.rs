//! Upstream request plumbing with bounded retries and increasing backoff.
//!
//! # Architecture
//!
//! The module uses a trait-based design so the retry policy can be exercised
//! without a network or a real clock:
//! - [`FetchAsync`]: Core trait defining one upstream request
//! - [`Pause`]: Where the retry loop waits; [`TokioPause`] sleeps for real
//! - [`BackoffPolicy`]: Attempt budget and delay functions
//! - [`RetryFetch`]: Decorator that adds the retry loop to any `FetchAsync`
//! - [`fetch_or_default`]: Runs the decorator and degrades to an empty value
//!
//! # Retry Strategy
//!
//! - At most `max_attempts` attempts (3 by default)
//! - Before attempt `n` the loop waits `warmup_step * n` to spread load
//! - After a failed attempt `n` it waits `retry_step * n` (30s, 60s, ...)
//! - Failures that cannot succeed on retry (client errors) stop the loop early

use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Failure of a single upstream request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Connection, TLS or body transfer failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    /// The request or the upstream query ran out of its time budget.
    #[error("upstream timed out: {0}")]
    Timeout(String),
    /// The response arrived but could not be understood.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether repeating the identical request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout(_) | FetchError::Malformed(_) => true,
            FetchError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Trait for a single async upstream request.
///
/// Implementors perform exactly one round trip per call. Retrying is the job
/// of [`RetryFetch`].
pub trait FetchAsync {
    /// The decoded response.
    type Response;

    async fn fetch(&self) -> Result<Self::Response, FetchError>;
}

/// Where the retry loop waits between attempts.
pub trait Pause {
    async fn pause(&self, delay: StdDuration);
}

/// [`Pause`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPause;

impl Pause for TokioPause {
    async fn pause(&self, delay: StdDuration) {
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

/// Attempt budget and delay growth for upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    /// Delay after failed attempt `n` is `retry_step * n`.
    pub retry_step: StdDuration,
    /// Delay before attempt `n` is `warmup_step * n`.
    pub warmup_step: StdDuration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_step: StdDuration::from_secs(30),
            warmup_step: StdDuration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Policy that never waits, for tests and dry runs.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            retry_step: StdDuration::ZERO,
            warmup_step: StdDuration::ZERO,
        }
    }

    /// Wait before attempt `attempt` (1-based).
    pub fn warmup_delay(&self, attempt: usize) -> StdDuration {
        self.warmup_step.saturating_mul(to_factor(attempt))
    }

    /// Wait after attempt `attempt` (1-based) has failed.
    pub fn retry_delay(&self, attempt: usize) -> StdDuration {
        self.retry_step.saturating_mul(to_factor(attempt))
    }

    /// Total wait in front of every attempt, in attempt order.
    pub fn schedule(&self) -> Vec<StdDuration> {
        (1..=self.max_attempts)
            .map(|attempt| {
                let backoff = if attempt > 1 {
                    self.retry_delay(attempt - 1)
                } else {
                    StdDuration::ZERO
                };
                backoff.saturating_add(self.warmup_delay(attempt))
            })
            .collect()
    }
}

fn to_factor(attempt: usize) -> u32 {
    u32::try_from(attempt).unwrap_or(u32::MAX)
}

/// Result of running the retry loop to completion.
#[derive(Debug)]
pub struct Attempted<R> {
    pub result: Result<R, FetchError>,
    /// Number of attempts actually made.
    pub attempts: usize,
}

/// Wrapper that adds bounded retries with increasing backoff to any [`FetchAsync`].
pub struct RetryFetch<T, P = TokioPause> {
    inner: T,
    policy: BackoffPolicy,
    pause: P,
    /// Name of the upstream used in log lines.
    source: String,
}

impl<T> RetryFetch<T, TokioPause>
where
    T: FetchAsync,
{
    /// Wrap `inner` with the retry loop, sleeping on the tokio clock.
    ///
    /// # Arguments
    ///
    /// * `inner` - The single-request fetcher to retry
    /// * `policy` - Attempt budget and delays
    /// * `source` - Upstream name used in log lines
    pub fn new(inner: T, policy: BackoffPolicy, source: impl Into<String>) -> Self {
        Self::with_pause(inner, policy, TokioPause, source)
    }
}

impl<T, P> RetryFetch<T, P>
where
    T: FetchAsync,
    P: Pause,
{
    pub fn with_pause(
        inner: T,
        policy: BackoffPolicy,
        pause: P,
        source: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            policy,
            pause,
            source: source.into(),
        }
    }

    /// Run attempts until one succeeds, a failure is not retryable, or the
    /// budget is spent. Emits one log line per attempt.
    #[instrument(level = "info", skip_all, fields(source = %self.source))]
    pub async fn attempt_all(&self) -> Attempted<T::Response> {
        let total_t0 = Instant::now();
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let warmup = self.policy.warmup_delay(attempt);
            debug!(attempt, ?warmup, "Pausing before attempt");
            self.pause.pause(warmup).await;

            let attempt_t0 = Instant::now();
            match self.inner.fetch().await {
                Ok(resp) => {
                    info!(
                        attempt,
                        max,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                        "fetch attempt succeeded"
                    );
                    return Attempted {
                        result: Ok(resp),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if attempt >= max || !e.is_retryable() {
                        error!(
                            attempt,
                            max,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            retryable = e.is_retryable(),
                            error = %e,
                            "fetch attempt failed; giving up"
                        );
                        return Attempted {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }

                    let delay = self.policy.retry_delay(attempt);
                    warn!(
                        attempt,
                        max,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    self.pause.pause(delay).await;
                }
            }
        }
    }
}

impl<T, P> fmt::Debug for RetryFetch<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("source", &self.source)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T, P> FetchAsync for RetryFetch<T, P>
where
    T: FetchAsync,
    P: Pause,
{
    type Response = T::Response;

    async fn fetch(&self) -> Result<Self::Response, FetchError> {
        self.attempt_all().await.result
    }
}

/// A fetched value together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<R> {
    pub value: R,
    pub attempts: usize,
    /// `true` when every attempt failed and `value` is the empty default.
    pub degraded: bool,
}

/// Run the retry loop and replace exhaustion with an empty-but-valid value.
///
/// The caller can always persist what comes back, so an unreachable upstream
/// still yields a (possibly empty) snapshot instead of a crashed run.
pub async fn fetch_or_default<T, P>(retry: &RetryFetch<T, P>) -> Fetched<T::Response>
where
    T: FetchAsync,
    T::Response: Default,
    P: Pause,
{
    let Attempted { result, attempts } = retry.attempt_all().await;
    match result {
        Ok(value) => Fetched {
            value,
            attempts,
            degraded: false,
        },
        Err(e) => {
            warn!(
                source = %retry.source,
                attempts,
                error = %e,
                "Upstream unavailable; continuing with no data"
            );
            Fetched {
                value: T::Response::default(),
                attempts,
                degraded: true,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Replays a scripted sequence of results, one per call.
    pub(crate) struct ScriptedFetch<R> {
        script: Mutex<VecDeque<Result<R, FetchError>>>,
        pub calls: Mutex<usize>,
    }

    impl<R> ScriptedFetch<R> {
        pub(crate) fn new(script: Vec<Result<R, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl<R> FetchAsync for &ScriptedFetch<R> {
        type Response = R;

        async fn fetch(&self) -> Result<R, FetchError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".into())))
        }
    }

    /// Records requested pauses instead of sleeping.
    #[derive(Default)]
    pub(crate) struct RecordingPause {
        pub delays: Mutex<Vec<StdDuration>>,
    }

    impl Pause for &RecordingPause {
        async fn pause(&self, delay: StdDuration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    /// In-memory log sink for a test-local subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn lines(&self) -> Vec<String> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn timeout() -> FetchError {
        FetchError::Timeout("runtime error: Query timed out".into())
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_delay(1), StdDuration::from_secs(30));
        assert_eq!(policy.retry_delay(2), StdDuration::from_secs(60));
    }

    #[test]
    fn test_schedule_is_non_decreasing() {
        for max_attempts in 1..8 {
            let policy = BackoffPolicy {
                max_attempts,
                ..BackoffPolicy::default()
            };
            let schedule = policy.schedule();
            assert_eq!(schedule.len(), max_attempts);
            assert!(schedule.windows(2).all(|w| w[0] <= w[1]), "{schedule:?}");
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Status(504).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Status(400).is_retryable());
        assert!(timeout().is_retryable());
        assert!(FetchError::Malformed("eof".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            FetchError::Status(503).to_string(),
            "upstream returned HTTP 503"
        );
        assert_eq!(
            timeout().to_string(),
            "upstream timed out: runtime error: Query timed out"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(FetchError::Transport("reset".into()));
        assert_eq!(boxed.to_string(), "transport error: reset");
    }

    #[tokio::test]
    async fn test_two_timeouts_then_success() {
        let script = vec![Err(timeout()), Err(timeout()), Ok(vec![1, 2, 3, 4, 5])];
        let inner = ScriptedFetch::new(script);
        let pause = RecordingPause::default();
        let retry = RetryFetch::with_pause(&inner, BackoffPolicy::default(), &pause, "test");

        let fetched = fetch_or_default(&retry).await;
        assert_eq!(fetched.value, vec![1, 2, 3, 4, 5]);
        assert_eq!(fetched.attempts, 3);
        assert!(!fetched.degraded);
        assert_eq!(inner.calls(), 3);

        let delays = pause.delays.lock().unwrap().clone();
        let policy = BackoffPolicy::default();
        assert_eq!(
            delays,
            vec![
                policy.warmup_delay(1),
                policy.retry_delay(1),
                policy.warmup_delay(2),
                policy.retry_delay(2),
                policy.warmup_delay(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_one_log_line_per_attempt() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let script = vec![Err(timeout()), Err(timeout()), Ok(vec![1, 2, 3, 4, 5])];
        let inner = ScriptedFetch::new(script);
        let pause = RecordingPause::default();
        let retry = RetryFetch::with_pause(&inner, BackoffPolicy::default(), &pause, "test");
        let fetched = fetch_or_default(&retry).await;
        assert_eq!(fetched.value.len(), 5);

        let attempt_lines: Vec<String> = logs
            .lines()
            .into_iter()
            .filter(|line| line.contains("fetch attempt"))
            .collect();
        assert_eq!(attempt_lines.len(), 3, "{attempt_lines:#?}");
        for (i, line) in attempt_lines.iter().enumerate() {
            let expected = format!("attempt={} max=3", i + 1);
            assert!(line.contains(&expected), "{line}");
        }
        assert!(attempt_lines[0].contains("backing off"));
        assert!(attempt_lines[1].contains("backing off"));
        assert!(attempt_lines[2].contains("succeeded"));
    }

    #[tokio::test]
    async fn test_exhaustion_degrades_to_empty() {
        let script = vec![
            Err(timeout()),
            Err(FetchError::Status(503)),
            Err(timeout()),
            Ok(vec![9]),
        ];
        let inner: ScriptedFetch<Vec<u8>> = ScriptedFetch::new(script);
        let pause = RecordingPause::default();
        let retry = RetryFetch::with_pause(&inner, BackoffPolicy::default(), &pause, "test");

        let fetched = fetch_or_default(&retry).await;
        assert!(fetched.value.is_empty());
        assert!(fetched.degraded);
        assert_eq!(fetched.attempts, 3);
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let script = vec![Err(FetchError::Status(400)), Ok(vec![1])];
        let inner: ScriptedFetch<Vec<u8>> = ScriptedFetch::new(script);
        let pause = RecordingPause::default();
        let retry = RetryFetch::with_pause(&inner, BackoffPolicy::default(), &pause, "test");

        let attempted = retry.attempt_all().await;
        assert_eq!(attempted.result, Err(FetchError::Status(400)));
        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let inner = ScriptedFetch::new(vec![Ok(7u8)]);
        let pause = RecordingPause::default();
        let retry = RetryFetch::with_pause(&inner, BackoffPolicy::immediate(0), &pause, "test");

        assert_eq!(retry.fetch().await, Ok(7));
        assert_eq!(inner.calls(), 1);
    }
}
