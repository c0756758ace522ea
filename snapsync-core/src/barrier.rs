// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Completion barrier with typed round state.
//!
//! Implements the round lifecycle: Idle → Armed → Satisfied → Idle.
//! `Satisfied` is transient: the report that completes a round computes the
//! elapsed time, emits it, and leaves the barrier Idle in the same critical
//! section.
//!
//! Completions are accounted either by count or by worker identity. With
//! identities, duplicate reports from the same worker are no-ops.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::BarrierError;
use crate::types::WorkerId;

/// How many completions satisfy a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Any `n` reports.
    Count(NonZeroUsize),
    /// One report from each listed worker.
    Identities(BTreeSet<WorkerId>),
}

impl Expectation {
    /// Count-based expectation. Zero is rejected.
    pub fn count(n: usize) -> Result<Self, BarrierError> {
        NonZeroUsize::new(n)
            .map(Self::Count)
            .ok_or_else(|| BarrierError::InvalidExpectation {
                reason: "expected count must be at least 1".to_string(),
            })
    }

    /// Identity-based expectation. An empty set is rejected.
    pub fn identities(ids: impl IntoIterator<Item = WorkerId>) -> Result<Self, BarrierError> {
        let ids: BTreeSet<WorkerId> = ids.into_iter().collect();
        if ids.is_empty() {
            return Err(BarrierError::InvalidExpectation {
                reason: "expected worker set must not be empty".to_string(),
            });
        }
        Ok(Self::Identities(ids))
    }

    /// Number of completions required.
    pub fn expected(&self) -> usize {
        match self {
            Self::Count(n) => n.get(),
            Self::Identities(ids) => ids.len(),
        }
    }

    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Count(_) => "count",
            Self::Identities(_) => "identity",
        }
    }
}

#[derive(Debug)]
enum Received {
    Count(usize),
    Identities(BTreeSet<WorkerId>),
}

impl Received {
    fn len(&self) -> usize {
        match self {
            Self::Count(n) => *n,
            Self::Identities(ids) => ids.len(),
        }
    }
}

/// One timed experiment instance, from arm to satisfaction.
#[derive(Debug)]
struct Round {
    number: u64,
    expectation: Expectation,
    start: Instant,
    received: Received,
}

impl Round {
    fn new(number: u64, expectation: Expectation) -> Self {
        let received = match expectation {
            Expectation::Count(_) => Received::Count(0),
            Expectation::Identities(_) => Received::Identities(BTreeSet::new()),
        };
        Self {
            number,
            expectation,
            start: Instant::now(),
            received,
        }
    }
}

#[derive(Debug)]
enum RoundState {
    Idle,
    Armed(Round),
}

#[derive(Debug)]
struct Inner {
    state: RoundState,
    next_round: u64,
    completed: Vec<RoundSummary>,
}

/// Timing of a satisfied round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub round: u64,
    pub expected: usize,
    /// Time from arm to the last accounted report.
    pub elapsed: Duration,
}

impl RoundSummary {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Result of one completion report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Accounted; the round still needs more reports.
    Counted {
        round: u64,
        received: usize,
        expected: usize,
    },
    /// The identity already reported in this round.
    Duplicate { round: u64, identity: WorkerId },
    /// Not accountable to the armed round (missing or unknown identity).
    Rejected { round: u64, reason: String },
    /// This report completed the round.
    Satisfied(RoundSummary),
    /// No round is armed; the report is dropped.
    Stale,
}

impl ReportOutcome {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Counted { .. } => "counted",
            Self::Duplicate { .. } => "duplicate",
            Self::Rejected { .. } => "rejected",
            Self::Satisfied(_) => "satisfied",
            Self::Stale => "stale",
        }
    }
}

/// Point-in-time view of the barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierSnapshot {
    Idle,
    Armed {
        round: u64,
        mode: &'static str,
        received: usize,
        expected: usize,
        elapsed: Duration,
    },
}

/// Receives barrier events. Called outside the barrier lock.
pub trait RoundObserver: Send + Sync {
    /// A round was armed.
    fn round_armed(&self, _round: u64, _expectation: &Expectation) {}

    /// A report was processed (including the satisfying one).
    fn report_observed(&self, _outcome: &ReportOutcome) {}

    /// A round reached its quorum. Invoked exactly once per satisfied round.
    fn round_satisfied(&self, summary: &RoundSummary);
}

/// Default observer: structured log plus the `[label N] duration: X ms`
/// line on stdout that experiment log scrapers look for.
#[derive(Debug, Clone)]
pub struct LogObserver {
    label: String,
}

impl LogObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// The line printed for a satisfied round.
    pub fn duration_line(&self, summary: &RoundSummary) -> String {
        format!(
            "[{} {}] duration: {:.2} ms",
            self.label,
            summary.expected,
            summary.elapsed_ms()
        )
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new("rule")
    }
}

impl RoundObserver for LogObserver {
    fn round_armed(&self, round: u64, expectation: &Expectation) {
        tracing::info!(
            round = round,
            mode = expectation.mode(),
            expected = expectation.expected(),
            "Round armed"
        );
    }

    fn report_observed(&self, outcome: &ReportOutcome) {
        match outcome {
            ReportOutcome::Stale => {
                tracing::debug!("Completion report while idle, dropped");
            }
            ReportOutcome::Rejected { round, reason } => {
                tracing::warn!(round = *round, reason = %reason, "Completion report rejected");
            }
            ReportOutcome::Duplicate { round, identity } => {
                tracing::debug!(round = *round, identity = %identity, "Duplicate completion report");
            }
            ReportOutcome::Counted {
                round,
                received,
                expected,
            } => {
                tracing::debug!(
                    round = *round,
                    received = *received,
                    expected = *expected,
                    "Completion counted"
                );
            }
            ReportOutcome::Satisfied(_) => {}
        }
    }

    fn round_satisfied(&self, summary: &RoundSummary) {
        tracing::info!(
            round = summary.round,
            expected = summary.expected,
            elapsed_ms = summary.elapsed_ms(),
            "Round satisfied"
        );
        println!("{}", self.duration_line(summary));
    }
}

/// The master's completion barrier.
///
/// All round mutation happens under one mutex: increment, quorum check and
/// the transition back to Idle are a single critical section, so exactly one
/// report observes satisfaction.
pub struct CompletionBarrier {
    inner: Mutex<Inner>,
    observer: Arc<dyn RoundObserver>,
}

impl CompletionBarrier {
    pub fn new(observer: Arc<dyn RoundObserver>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RoundState::Idle,
                next_round: 1,
                completed: Vec::new(),
            }),
            observer,
        }
    }

    /// Create a barrier wrapped in an Arc for sharing across threads.
    pub fn new_shared(observer: Arc<dyn RoundObserver>) -> Arc<Self> {
        Arc::new(Self::new(observer))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Round state stays consistent even if a holder panicked: every
        // mutation is a single assignment.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new round and return its number.
    ///
    /// Arming while a round is still armed abandons that round.
    pub fn arm(&self, expectation: Expectation) -> u64 {
        let (number, abandoned) = {
            let mut inner = self.lock();
            let number = inner.next_round;
            inner.next_round += 1;

            let previous = std::mem::replace(
                &mut inner.state,
                RoundState::Armed(Round::new(number, expectation.clone())),
            );
            let abandoned = match previous {
                RoundState::Armed(round) => Some((round.number, round.received.len())),
                RoundState::Idle => None,
            };
            (number, abandoned)
        };

        if let Some((round, received)) = abandoned {
            tracing::warn!(
                round = round,
                received = received,
                "Re-armed before round was satisfied, abandoning it"
            );
        }

        self.observer.round_armed(number, &expectation);
        number
    }

    /// Account one completion report.
    pub fn report(&self, identity: Option<&WorkerId>) -> ReportOutcome {
        let outcome = {
            let mut inner = self.lock();
            let outcome = match &mut inner.state {
                RoundState::Idle => ReportOutcome::Stale,
                RoundState::Armed(round) => Self::account(round, identity),
            };

            if let ReportOutcome::Satisfied(summary) = &outcome {
                inner.state = RoundState::Idle;
                inner.completed.push(summary.clone());
            }
            outcome
        };

        self.observer.report_observed(&outcome);
        if let ReportOutcome::Satisfied(summary) = &outcome {
            self.observer.round_satisfied(summary);
        }
        outcome
    }

    fn account(round: &mut Round, identity: Option<&WorkerId>) -> ReportOutcome {
        let expected = round.expectation.expected();

        match (&round.expectation, &mut round.received) {
            (Expectation::Count(_), Received::Count(received)) => {
                *received += 1;
            }
            (Expectation::Identities(ids), Received::Identities(seen)) => {
                let Some(identity) = identity else {
                    return ReportOutcome::Rejected {
                        round: round.number,
                        reason: "identity required by this round".to_string(),
                    };
                };
                if !ids.contains(identity) {
                    return ReportOutcome::Rejected {
                        round: round.number,
                        reason: format!("{} is not expected in this round", identity),
                    };
                }
                if !seen.insert(identity.clone()) {
                    return ReportOutcome::Duplicate {
                        round: round.number,
                        identity: identity.clone(),
                    };
                }
            }
            // Round::new pairs the accounting with its expectation.
            _ => unreachable!("round accounting does not match its expectation"),
        }

        let received = round.received.len();
        if received >= expected {
            ReportOutcome::Satisfied(RoundSummary {
                round: round.number,
                expected,
                elapsed: round.start.elapsed(),
            })
        } else {
            ReportOutcome::Counted {
                round: round.number,
                received,
                expected,
            }
        }
    }

    /// Current state of the barrier.
    pub fn state(&self) -> BarrierSnapshot {
        let inner = self.lock();
        match &inner.state {
            RoundState::Idle => BarrierSnapshot::Idle,
            RoundState::Armed(round) => BarrierSnapshot::Armed {
                round: round.number,
                mode: round.expectation.mode(),
                received: round.received.len(),
                expected: round.expectation.expected(),
                elapsed: round.start.elapsed(),
            },
        }
    }

    /// Summaries of every satisfied round, oldest first.
    pub fn history(&self) -> Vec<RoundSummary> {
        self.lock().completed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[derive(Default)]
    struct CountingObserver {
        satisfied: AtomicUsize,
        summaries: Mutex<Vec<RoundSummary>>,
    }

    impl RoundObserver for CountingObserver {
        fn round_satisfied(&self, summary: &RoundSummary) {
            self.satisfied.fetch_add(1, Ordering::SeqCst);
            self.summaries.lock().unwrap().push(summary.clone());
        }
    }

    fn make_barrier() -> (Arc<CompletionBarrier>, Arc<CountingObserver>) {
        let observer = Arc::new(CountingObserver::default());
        let barrier = CompletionBarrier::new_shared(observer.clone());
        (barrier, observer)
    }

    fn id(name: &str) -> WorkerId {
        WorkerId::new(name).unwrap()
    }

    #[test]
    fn test_invalid_expectations() {
        assert!(Expectation::count(0).is_err());
        assert!(Expectation::identities(Vec::new()).is_err());
    }

    #[test]
    fn test_count_satisfies_on_nth_report() {
        let (barrier, observer) = make_barrier();
        let round = barrier.arm(Expectation::count(3).unwrap());

        assert_eq!(
            barrier.report(None),
            ReportOutcome::Counted {
                round,
                received: 1,
                expected: 3
            }
        );
        assert!(matches!(
            barrier.report(None),
            ReportOutcome::Counted { received: 2, .. }
        ));
        assert!(matches!(barrier.report(None), ReportOutcome::Satisfied(_)));
        assert_eq!(barrier.state(), BarrierSnapshot::Idle);
        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_report_while_idle_is_stale() {
        let (barrier, observer) = make_barrier();
        assert_eq!(barrier.report(None), ReportOutcome::Stale);
        assert_eq!(barrier.report(Some(&id("w0"))), ReportOutcome::Stale);
        assert_eq!(barrier.state(), BarrierSnapshot::Idle);

        // Stale reports do not leak into the next round.
        barrier.arm(Expectation::count(2).unwrap());
        assert!(matches!(
            barrier.report(None),
            ReportOutcome::Counted { received: 1, .. }
        ));
        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_late_report_after_satisfaction_is_stale() {
        let (barrier, observer) = make_barrier();
        barrier.arm(Expectation::count(1).unwrap());
        assert!(matches!(barrier.report(None), ReportOutcome::Satisfied(_)));
        assert_eq!(barrier.report(None), ReportOutcome::Stale);
        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_identity_does_not_advance() {
        let (barrier, observer) = make_barrier();
        let round = barrier.arm(Expectation::identities([id("A"), id("B")]).unwrap());

        assert!(matches!(
            barrier.report(Some(&id("A"))),
            ReportOutcome::Counted { received: 1, .. }
        ));
        assert_eq!(
            barrier.report(Some(&id("A"))),
            ReportOutcome::Duplicate {
                round,
                identity: id("A")
            }
        );
        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 0);

        assert!(matches!(
            barrier.report(Some(&id("B"))),
            ReportOutcome::Satisfied(_)
        ));
        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identity_mode_rejects_unknown_and_anonymous() {
        let (barrier, _observer) = make_barrier();
        barrier.arm(Expectation::identities([id("A")]).unwrap());

        assert!(matches!(
            barrier.report(None),
            ReportOutcome::Rejected { .. }
        ));
        assert!(matches!(
            barrier.report(Some(&id("Z"))),
            ReportOutcome::Rejected { .. }
        ));
        assert!(matches!(
            barrier.state(),
            BarrierSnapshot::Armed { received: 0, .. }
        ));
    }

    #[test]
    fn test_rearm_abandons_round() {
        let (barrier, observer) = make_barrier();
        let first = barrier.arm(Expectation::count(2).unwrap());
        barrier.report(None);

        let second = barrier.arm(Expectation::count(2).unwrap());
        assert_eq!(second, first + 1);
        assert!(matches!(
            barrier.report(None),
            ReportOutcome::Counted { received: 1, .. }
        ));
        assert!(matches!(barrier.report(None), ReportOutcome::Satisfied(_)));
        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.history()[0].round, second);
    }

    #[test]
    fn test_concurrent_reports_satisfy_exactly_once() {
        const WORKERS: usize = 16;

        for _ in 0..20 {
            let (barrier, observer) = make_barrier();
            barrier.arm(Expectation::count(WORKERS).unwrap());

            let start = Arc::new(Barrier::new(WORKERS));
            let handles: Vec<_> = (0..WORKERS)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let start = Arc::clone(&start);
                    thread::spawn(move || {
                        start.wait();
                        barrier.report(None)
                    })
                })
                .collect();

            let outcomes: Vec<ReportOutcome> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            let satisfied = outcomes
                .iter()
                .filter(|o| matches!(o, ReportOutcome::Satisfied(_)))
                .count();
            assert_eq!(satisfied, 1);
            assert_eq!(observer.satisfied.load(Ordering::SeqCst), 1);
            assert_eq!(barrier.state(), BarrierSnapshot::Idle);
        }
    }

    #[test]
    fn test_concurrent_duplicate_identities() {
        let (barrier, observer) = make_barrier();
        let ids: Vec<WorkerId> = (0..8).map(|i| id(&format!("w{}", i))).collect();
        barrier.arm(Expectation::identities(ids.clone()).unwrap());

        // Every worker reports twice, concurrently.
        let handles: Vec<_> = ids
            .iter()
            .chain(ids.iter())
            .cloned()
            .map(|worker| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.report(Some(&worker)))
            })
            .collect();

        let outcomes: Vec<ReportOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(observer.satisfied.load(Ordering::SeqCst), 1);
        // Reports after satisfaction are stale; before it, duplicates.
        let accounted = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    ReportOutcome::Counted { .. } | ReportOutcome::Satisfied(_)
                )
            })
            .count();
        assert_eq!(accounted, 8);
    }

    #[test]
    fn test_elapsed_is_time_of_last_report() {
        let (barrier, observer) = make_barrier();
        barrier.arm(Expectation::count(3).unwrap());

        let handles: Vec<_> = [10u64, 15, 12]
            .into_iter()
            .map(|delay_ms| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(delay_ms));
                    barrier.report(None);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let summaries = observer.summaries.lock().unwrap();
        assert_eq!(summaries.len(), 1);
        let elapsed = summaries[0].elapsed;
        assert!(elapsed >= Duration::from_millis(15), "elapsed {:?}", elapsed);
        // Last report, not the sum of all three.
        assert!(elapsed < Duration::from_millis(37), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_history_and_duration_line() {
        let (barrier, _observer) = make_barrier();
        for _ in 0..3 {
            barrier.arm(Expectation::count(1).unwrap());
            barrier.report(None);
        }
        let history = barrier.history();
        assert_eq!(
            history.iter().map(|s| s.round).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let line = LogObserver::new("rule").duration_line(&RoundSummary {
            round: 1,
            expected: 4,
            elapsed: Duration::from_micros(15_250),
        });
        assert_eq!(line, "[rule 4] duration: 15.25 ms");
    }
}
