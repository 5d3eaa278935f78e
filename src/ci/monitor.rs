//! Polling CI until it settles.
//!
//! [`CiMonitor::check_ci`] performs a single status check with a bounded retry
//! on command timeouts. [`CiMonitor::wait_for_ci_with_progress`] drives one
//! polling loop: an immediate check (unless disabled), an initial delay, then
//! fixed-interval polls under an overall deadline. A faster progress tick only emits events.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use super::{CIResult, CiCounts};
use crate::clock::{Clock, Ticker};
use crate::config::CiSettings;
use crate::errors::{CiError, GatewayError};
use crate::review::ReviewGateway;

/// Attempts per status check before giving up on timeouts.
pub const MAX_CHECK_ATTEMPTS: u32 = 3;
/// Backoff grows linearly: `attempt * BACKOFF_STEP`.
pub const BACKOFF_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    /// Matching jobs are dropped from failed/cancelled before `passed` is computed.
    pub ignore_pattern: Option<Regex>,
    /// Check once before the initial delay. Off after a rerun or fix push,
    /// when the checks still report the previous run.
    pub check_immediately: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            progress_interval: Duration::from_secs(5),
            ignore_pattern: Regex::new(crate::config::DEFAULT_CI_IGNORE_PATTERN).ok(),
            check_immediately: true,
        }
    }
}

impl From<&CiSettings> for WaitOptions {
    fn from(settings: &CiSettings) -> Self {
        Self {
            initial_delay: settings.initial_delay,
            poll_interval: settings.poll_interval,
            progress_interval: settings.progress_interval,
            ignore_pattern: settings.ignore_pattern.clone(),
            check_immediately: true,
        }
    }
}

/// Observational events emitted while waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiProgress {
    /// Still inside the initial delay.
    Waiting { elapsed: Duration, remaining: Duration },
    /// About to run status check number `attempt`.
    Checking { attempt: u32, elapsed: Duration },
    /// A check failed transiently and will be retried after `delay`.
    Retry {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// Latest known job counts.
    Status { counts: CiCounts, elapsed: Duration },
}

/// Progress observer. Called synchronously on the polling path; keep it cheap.
pub type ProgressFn<'a> = &'a (dyn Fn(&CiProgress) + Send + Sync);

#[derive(Debug, Clone)]
pub struct CiWaitOutcome {
    /// Final result, after the ignore filter.
    pub result: CIResult,
    pub passed: bool,
    pub ignored_jobs: Vec<String>,
    pub elapsed: Duration,
    pub checks: u32,
}

enum Poll {
    Done(CIResult),
    Transient,
    DeadlineReached,
}

pub struct CiMonitor {
    review: Arc<dyn ReviewGateway>,
    clock: Arc<dyn Clock>,
}

impl CiMonitor {
    pub fn new(review: Arc<dyn ReviewGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { review, clock }
    }

    /// One CI status check for `pr_number` (0 selects the current branch's PR).
    ///
    /// Only command timeouts are retried. Malformed or empty payloads come
    /// back as a pending result.
    pub async fn check_ci(&self, pr_number: u64) -> Result<CIResult, CiError> {
        self.check_observed(pr_number, &|_: &CiProgress| {}).await
    }

    async fn check_observed(
        &self,
        pr_number: u64,
        on_progress: ProgressFn<'_>,
    ) -> Result<CIResult, CiError> {
        let mut attempt = 1;
        loop {
            match self.review.pr_checks(pr_number).await {
                Ok(raw) => return Ok(CIResult::from_json(&raw)),
                Err(e) if e.is_timeout() => {
                    if attempt >= MAX_CHECK_ATTEMPTS {
                        tracing::warn!(pr = pr_number, attempts = attempt, "CI check timed out repeatedly");
                        return Err(CiError::TimeoutExhausted { attempts: attempt });
                    }
                    let delay = BACKOFF_STEP * attempt;
                    tracing::debug!(pr = pr_number, attempt, ?delay, "CI check timed out, backing off");
                    on_progress(&CiProgress::Retry {
                        attempt,
                        delay,
                        reason: e.to_string(),
                    });
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(GatewayError::ToolMissing { program }) => {
                    return Err(CiError::ToolMissing { program });
                }
                Err(GatewayError::NoPullRequest { .. }) => return Err(CiError::NoPullRequest),
                Err(e) => return Err(CiError::Command(e)),
            }
        }
    }

    async fn poll(
        &self,
        pr_number: u64,
        attempt: u32,
        start: Instant,
        deadline: Instant,
        options: &WaitOptions,
        on_progress: ProgressFn<'_>,
    ) -> Result<Poll, CiError> {
        on_progress(&CiProgress::Checking {
            attempt,
            elapsed: self.clock.now() - start,
        });

        let outcome = tokio::select! {
            outcome = self.check_observed(pr_number, on_progress) => outcome,
            _ = self.clock.sleep_until(deadline) => return Ok(Poll::DeadlineReached),
        };

        match outcome {
            Ok(result) => {
                on_progress(&CiProgress::Status {
                    counts: result.counts(),
                    elapsed: self.clock.now() - start,
                });
                Ok(Poll::Done(result))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(pr = pr_number, attempt, error = %e, "CI check failed, will poll again");
                on_progress(&CiProgress::Retry {
                    attempt,
                    delay: options.poll_interval,
                    reason: e.to_string(),
                });
                Ok(Poll::Transient)
            }
        }
    }

    fn finish(
        &self,
        mut result: CIResult,
        options: &WaitOptions,
        start: Instant,
        checks: u32,
    ) -> CiWaitOutcome {
        let ignored_jobs = options
            .ignore_pattern
            .as_ref()
            .map(|pattern| result.ignore_matching(pattern))
            .unwrap_or_default();
        if !ignored_jobs.is_empty() {
            tracing::info!(jobs = ?ignored_jobs, "ignoring non-blocking CI jobs");
        }
        CiWaitOutcome {
            passed: result.passed(),
            result,
            ignored_jobs,
            elapsed: self.clock.now() - start,
            checks,
        }
    }

    fn timed_out(timeout: Duration, last: Option<&CIResult>) -> CiError {
        CiError::WaitTimeout {
            timeout,
            pending: last.map(|r| r.counts().pending).unwrap_or(0),
        }
    }

    /// Wait for CI on `pr_number` to reach a terminal state.
    pub async fn wait_for_ci_with_progress(
        &self,
        pr_number: u64,
        timeout: Duration,
        options: &WaitOptions,
        on_progress: ProgressFn<'_>,
    ) -> Result<CiWaitOutcome, CiError> {
        let start = self.clock.now();
        let deadline = start + timeout;
        let mut checks = 0;
        let mut last: Option<CIResult> = None;

        if options.check_immediately {
            checks += 1;
            match self
                .poll(pr_number, checks, start, deadline, options, on_progress)
                .await?
            {
                Poll::Done(result) if result.is_terminal() => {
                    return Ok(self.finish(result, options, start, checks));
                }
                Poll::Done(result) => last = Some(result),
                Poll::Transient => {}
                Poll::DeadlineReached => return Err(Self::timed_out(timeout, last.as_ref())),
            }
        }

        let mut progress = Ticker::new(start, options.progress_interval);
        let first_poll_at = (start + options.initial_delay).min(deadline);
        loop {
            let now = self.clock.now();
            if now >= first_poll_at {
                break;
            }
            self.clock
                .sleep_until(progress.deadline().min(first_poll_at))
                .await;
            let now = self.clock.now();
            if now >= progress.deadline() {
                progress.advance(now);
                if now < first_poll_at {
                    on_progress(&CiProgress::Waiting {
                        elapsed: now - start,
                        remaining: first_poll_at - now,
                    });
                }
            }
        }

        loop {
            if self.clock.now() >= deadline {
                tracing::warn!(pr = pr_number, ?timeout, "gave up waiting for CI");
                return Err(Self::timed_out(timeout, last.as_ref()));
            }

            checks += 1;
            match self
                .poll(pr_number, checks, start, deadline, options, on_progress)
                .await?
            {
                Poll::Done(result) if result.is_terminal() => {
                    return Ok(self.finish(result, options, start, checks));
                }
                Poll::Done(result) => last = Some(result),
                Poll::Transient => {}
                Poll::DeadlineReached => return Err(Self::timed_out(timeout, last.as_ref())),
            }

            let next_poll = self.clock.now() + options.poll_interval;
            loop {
                self.clock
                    .sleep_until(progress.deadline().min(next_poll).min(deadline))
                    .await;
                let now = self.clock.now();
                if now >= deadline || now >= next_poll {
                    break;
                }
                if now >= progress.deadline() {
                    progress.advance(now);
                    on_progress(&CiProgress::Status {
                        counts: last.as_ref().map(CIResult::counts).unwrap_or_default(),
                        elapsed: now - start,
                    });
                }
            }
        }
    }
}
