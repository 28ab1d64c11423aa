//! Scan arbitration.
//!
//! [`CycleMachine`] is the single-writer state machine that turns a burst of barcode
//! detections into one lookup-and-match cycle. It performs no I/O and reads no clock:
//! every transition takes the current [`Instant`] as a parameter, which keeps it
//! directly testable. [`ScanArbiter`] drives it from a tokio task.
//!
//! # Cycle
//!
//! ```text
//! Armed --detection--> Locked --dispatched--> Fetching --result--> Resolved | Failed
//!   ^                                                                    |
//!   +------------------------- cooldown elapsed -------------------------+
//! ```
//!
//! Any state returns to `Armed` on reset. Each `Armed -> Locked` transition allocates a
//! new [`CycleToken`]; lookup results carrying any other token are stale and dropped.

pub mod runtime;

pub use runtime::{ArbiterConfig, ArbiterError, ArbiterHandle, ScanArbiter};

use crate::models::{DetectionEvent, IngredientRecord, MatchVerdict, RestrictionSet, ScanOutcome};
use crate::services::{LookupError, match_ingredients};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic tag identifying one scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleToken(u64);

impl CycleToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CycleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bookkeeping for the cycle in progress
#[derive(Debug, Clone)]
pub struct Cycle {
    pub token: CycleToken,
    pub code: String,
    /// When the decoder saw the barcode that opened the cycle
    pub observed_at: DateTime<Utc>,
    pub locked_at: Instant,
    /// Earliest instant the machine may re-arm
    pub rearm_at: Instant,
    /// Restrictions as they were when the cycle locked
    restrictions: Arc<RestrictionSet>,
}

impl Cycle {
    pub fn restrictions(&self) -> &RestrictionSet {
        &self.restrictions
    }
}

#[derive(Debug, Clone)]
pub enum CycleState {
    Armed,
    /// A detection was accepted; the lookup has not been handed off yet
    Locked(Cycle),
    /// The lookup is outstanding
    Fetching(Cycle),
    Resolved {
        cycle: Cycle,
        record: IngredientRecord,
        verdict: MatchVerdict,
    },
    Failed {
        cycle: Cycle,
        error: LookupError,
    },
}

impl CycleState {
    pub fn cycle(&self) -> Option<&Cycle> {
        match self {
            Self::Armed => None,
            Self::Locked(cycle) | Self::Fetching(cycle) => Some(cycle),
            Self::Resolved { cycle, .. } | Self::Failed { cycle, .. } => Some(cycle),
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed)
    }

    /// Waiting on the lookup
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::Fetching(_))
    }

    /// Resolved or failed, waiting for the cooldown
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved { .. } | Self::Failed { .. })
    }

    pub fn code(&self) -> Option<&str> {
        self.cycle().map(|c| c.code.as_str())
    }
}

/// A lookup the caller must start for a freshly locked cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub token: CycleToken,
    pub code: String,
}

/// What applying a lookup result did
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The cycle resolved; `outcome` must be handed to the record sink
    Resolved {
        code: String,
        verdict: MatchVerdict,
        outcome: ScanOutcome,
    },
    Failed {
        code: String,
        error: LookupError,
    },
    /// The result belongs to a superseded cycle and was discarded
    Stale,
}

/// Debounce state machine for one scanner
#[derive(Debug)]
pub struct CycleMachine {
    state: CycleState,
    last_token: u64,
    cooldown: Duration,
}

impl CycleMachine {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: CycleState::Armed,
            last_token: 0,
            cooldown,
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Token of the live cycle, if any
    pub fn current_token(&self) -> Option<CycleToken> {
        self.state.cycle().map(|c| c.token)
    }

    /// Apply a detection.
    ///
    /// Locks a new cycle when armed and returns the lookup to start. Detections in
    /// any other state are ignored, whatever their code.
    pub fn on_detection(
        &mut self,
        event: DetectionEvent,
        restrictions: Arc<RestrictionSet>,
        now: Instant,
    ) -> Option<LookupRequest> {
        if !self.state.is_armed() {
            return None;
        }

        self.last_token += 1;
        let token = CycleToken(self.last_token);
        let request = LookupRequest {
            token,
            code: event.code.clone(),
        };

        self.state = CycleState::Locked(Cycle {
            token,
            code: event.code,
            observed_at: event.observed_at,
            locked_at: now,
            rearm_at: now + self.cooldown,
            restrictions,
        });

        Some(request)
    }

    /// Mark the lookup for `token` as in flight. Returns false if the cycle is gone.
    pub fn on_lookup_dispatched(&mut self, token: CycleToken) -> bool {
        match std::mem::replace(&mut self.state, CycleState::Armed) {
            CycleState::Locked(cycle) if cycle.token == token => {
                self.state = CycleState::Fetching(cycle);
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Apply a lookup result tagged with the token of the cycle that requested it.
    ///
    /// A record with blank ingredient text counts as [`LookupError::NoIngredientsFound`].
    pub fn on_lookup_completed(
        &mut self,
        token: CycleToken,
        result: Result<IngredientRecord, LookupError>,
    ) -> Completion {
        let cycle = match std::mem::replace(&mut self.state, CycleState::Armed) {
            CycleState::Locked(cycle) | CycleState::Fetching(cycle) if cycle.token == token => {
                cycle
            }
            other => {
                self.state = other;
                return Completion::Stale;
            }
        };

        let record = match result {
            Ok(record) if record.has_no_ingredients() => Err(LookupError::NoIngredientsFound),
            other => other,
        };

        match record {
            Ok(record) => {
                let verdict = match_ingredients(&record.ingredients_text, cycle.restrictions());
                let outcome = ScanOutcome::new(record.clone(), verdict.is_safe, cycle.observed_at);
                let code = cycle.code.clone();
                self.state = CycleState::Resolved {
                    cycle,
                    record,
                    verdict: verdict.clone(),
                };
                Completion::Resolved {
                    code,
                    verdict,
                    outcome,
                }
            }
            Err(error) => {
                let code = cycle.code.clone();
                self.state = CycleState::Failed {
                    cycle,
                    error: error.clone(),
                };
                Completion::Failed { code, error }
            }
        }
    }

    /// Instant at which a resolved or failed cycle may re-arm
    pub fn rearm_deadline(&self) -> Option<Instant> {
        match &self.state {
            CycleState::Resolved { cycle, .. } | CycleState::Failed { cycle, .. } => {
                Some(cycle.rearm_at)
            }
            _ => None,
        }
    }

    /// Re-arm if the cycle has finished and its cooldown has run out
    pub fn on_cooldown_elapsed(&mut self, now: Instant) -> bool {
        match self.rearm_deadline() {
            Some(deadline) if now >= deadline => {
                self.state = CycleState::Armed;
                true
            }
            _ => false,
        }
    }

    /// Return to `Armed` immediately. Returns the token of the abandoned cycle.
    pub fn reset(&mut self) -> Option<CycleToken> {
        let superseded = self.current_token();
        self.state = CycleState::Armed;
        superseded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(3);

    fn restrictions(names: &[&str]) -> Arc<RestrictionSet> {
        Arc::new(RestrictionSet::from_names(names))
    }

    fn lock(machine: &mut CycleMachine, code: &str, now: Instant) -> LookupRequest {
        machine
            .on_detection(DetectionEvent::new(code), restrictions(&["milk"]), now)
            .expect("machine should be armed")
    }

    #[test]
    fn test_first_detection_locks() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let now = Instant::now();

        let request = lock(&mut machine, "0123456789012", now);

        assert_eq!(request.code, "0123456789012");
        assert_eq!(request.token.value(), 1);
        assert!(matches!(machine.state(), CycleState::Locked(_)));
        assert_eq!(machine.state().code(), Some("0123456789012"));
    }

    #[test]
    fn test_detections_ignored_while_busy() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let now = Instant::now();
        let request = lock(&mut machine, "111", now);

        // Same code, a partial read, and a different product all hit the lock
        for code in ["111", "11", "999"] {
            assert!(
                machine
                    .on_detection(DetectionEvent::new(code), restrictions(&[]), now)
                    .is_none()
            );
        }

        assert!(machine.on_lookup_dispatched(request.token));
        assert!(
            machine
                .on_detection(DetectionEvent::new("111"), restrictions(&[]), now)
                .is_none()
        );
        assert_eq!(machine.current_token(), Some(request.token));
        assert_eq!(machine.state().code(), Some("111"));
    }

    #[test]
    fn test_resolution_matches_against_snapshot() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let request = lock(&mut machine, "111", Instant::now());
        machine.on_lookup_dispatched(request.token);

        let completion = machine.on_lookup_completed(
            request.token,
            Ok(IngredientRecord::new("Latte", "Coffee, Milk, Sugar")),
        );

        match completion {
            Completion::Resolved {
                code,
                verdict,
                outcome,
            } => {
                assert_eq!(code, "111");
                assert!(!verdict.is_safe);
                assert_eq!(verdict.flagged_ingredients, vec!["Milk"]);
                assert_eq!(outcome.product_name, "Latte");
                assert!(!outcome.is_safe);
            }
            other => panic!("Expected Resolved, got: {:?}", other),
        }
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_outcome_keeps_detection_time() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let event = DetectionEvent::new("111");
        let observed_at = event.observed_at;
        let request = machine
            .on_detection(event, restrictions(&[]), Instant::now())
            .unwrap();

        match machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("A", "B"))) {
            Completion::Resolved { outcome, .. } => assert_eq!(outcome.observed_at, observed_at),
            other => panic!("Expected Resolved, got: {:?}", other),
        }
    }

    #[test]
    fn test_lookup_failure() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let request = lock(&mut machine, "111", Instant::now());

        let completion = machine.on_lookup_completed(
            request.token,
            Err(LookupError::NetworkFailure("offline".to_string())),
        );

        assert_eq!(
            completion,
            Completion::Failed {
                code: "111".to_string(),
                error: LookupError::NetworkFailure("offline".to_string()),
            }
        );
        assert!(matches!(machine.state(), CycleState::Failed { .. }));
    }

    #[test]
    fn test_blank_ingredients_fail() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let request = lock(&mut machine, "111", Instant::now());

        let completion =
            machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("Water", " ")));

        assert!(matches!(
            completion,
            Completion::Failed {
                error: LookupError::NoIngredientsFound,
                ..
            }
        ));
    }

    #[test]
    fn test_stale_result_after_reset_is_dropped() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let old = lock(&mut machine, "111", Instant::now());
        machine.on_lookup_dispatched(old.token);

        assert_eq!(machine.reset(), Some(old.token));
        assert!(machine.state().is_armed());

        let completion =
            machine.on_lookup_completed(old.token, Ok(IngredientRecord::new("A", "Milk")));
        assert_eq!(completion, Completion::Stale);
        assert!(machine.state().is_armed());
    }

    #[test]
    fn test_stale_result_does_not_touch_new_cycle() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let old = lock(&mut machine, "111", Instant::now());
        machine.reset();
        let new = lock(&mut machine, "222", Instant::now());
        assert!(new.token > old.token);

        assert_eq!(
            machine.on_lookup_completed(old.token, Err(LookupError::InvalidCode)),
            Completion::Stale
        );
        assert!(matches!(machine.state(), CycleState::Locked(c) if c.token == new.token));
        assert!(!machine.on_lookup_dispatched(old.token));
    }

    #[test]
    fn test_second_result_for_same_cycle_is_stale() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let request = lock(&mut machine, "111", Instant::now());
        machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("A", "B")));

        assert_eq!(
            machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("A", "B"))),
            Completion::Stale
        );
    }

    #[test]
    fn test_rearm_waits_for_cooldown_from_lock() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let locked_at = Instant::now();
        let request = lock(&mut machine, "111", locked_at);

        // No deadline while the lookup is outstanding
        assert_eq!(machine.rearm_deadline(), None);
        assert!(!machine.on_cooldown_elapsed(locked_at + COOLDOWN * 2));

        machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("A", "B")));
        assert_eq!(machine.rearm_deadline(), Some(locked_at + COOLDOWN));

        assert!(!machine.on_cooldown_elapsed(locked_at + Duration::from_millis(2999)));
        assert!(machine.on_cooldown_elapsed(locked_at + COOLDOWN));
        assert!(machine.state().is_armed());

        // Accepts a new detection straight away
        let next = lock(&mut machine, "111", locked_at + COOLDOWN);
        assert_eq!(next.token.value(), 2);
    }

    #[test]
    fn test_failed_cycle_rearms_too() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let locked_at = Instant::now();
        let request = lock(&mut machine, "111", locked_at);
        machine.on_lookup_completed(request.token, Err(LookupError::MalformedResponse));

        assert!(machine.on_cooldown_elapsed(locked_at + COOLDOWN));
        assert!(machine.state().is_armed());
    }

    #[test]
    fn test_late_result_past_deadline_can_rearm_immediately() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let locked_at = Instant::now();
        let request = lock(&mut machine, "111", locked_at);
        let late = locked_at + Duration::from_secs(5);

        machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("A", "B")));
        assert!(machine.on_cooldown_elapsed(late));
    }

    #[test]
    fn test_restriction_snapshot_taken_at_lock() {
        let mut machine = CycleMachine::new(COOLDOWN);
        let request = machine
            .on_detection(DetectionEvent::new("111"), restrictions(&["egg"]), Instant::now())
            .unwrap();

        // A newer set handed to a later detection does not reach the live cycle
        machine.on_detection(DetectionEvent::new("111"), restrictions(&["milk"]), Instant::now());

        match machine.on_lookup_completed(request.token, Ok(IngredientRecord::new("A", "Milk"))) {
            Completion::Resolved { verdict, .. } => assert!(verdict.is_safe),
            other => panic!("Expected Resolved, got: {:?}", other),
        }
    }

    #[test]
    fn test_reset_when_armed() {
        let mut machine = CycleMachine::new(COOLDOWN);
        assert_eq!(machine.reset(), None);
        assert!(machine.state().is_armed());
    }
}
