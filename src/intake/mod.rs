//! Guided cycle intake
//!
//! Collects the seven required inputs of a new cycle over several chat turns
//! and commits the cycle through the ledger service once all are valid.

mod machine;
mod sessions;

pub use machine::{Advance, IntakeDraft, IntakeSession, IntakeStep};
pub use sessions::{SessionCache, SessionConfig};

use crate::error::ErrorBody;
use crate::models::Cycle;
use crate::state::LedgerService;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IntakeStatus {
    Idle,
    Started,
    Accepted,
    Rejected,
    Cancelled,
    Committed,
    CommitFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedValue {
    pub field: &'static str,
    pub value: f64,
    /// Derived by the wizard (delegation or percentage) rather than typed
    pub estimated: bool,
}

/// Result of one intake turn, with everything a reply composer needs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeOutcome {
    pub session_id: String,
    pub status: IntakeStatus,
    pub step_index: u8,
    pub awaiting_field: Option<&'static str>,
    /// Current draft; on commit, the draft that was submitted
    pub draft: IntakeDraft,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<AcceptedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Cycle>,
}

impl IntakeOutcome {
    fn new(session_id: &str, status: IntakeStatus, session: &IntakeSession) -> Self {
        Self {
            session_id: session_id.to_string(),
            status,
            step_index: session.step().index(),
            awaiting_field: session.step().field(),
            draft: session.draft().clone(),
            accepted: None,
            error: None,
            cycle: None,
        }
    }
}

/// Drives per-session wizards and commits finished drafts
pub struct IntakeCoordinator {
    sessions: SessionCache,
    ledger: Arc<LedgerService>,
}

impl IntakeCoordinator {
    pub fn new(ledger: Arc<LedgerService>, sessions: SessionCache) -> Self {
        Self { sessions, ledger }
    }

    pub fn ledger(&self) -> &Arc<LedgerService> {
        &self.ledger
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Feed one utterance to the session's wizard.
    ///
    /// The session stays locked until the turn (including any commit) is
    /// done; other sessions proceed independently.
    pub async fn advance(&self, session_id: &str, utterance: &str) -> IntakeOutcome {
        let handle = self.sessions.session(session_id).await;
        let mut session = handle.lock().await;

        let before = session.step();
        let advance = session.advance(utterance);

        match advance {
            Advance::Ignored => IntakeOutcome::new(session_id, IntakeStatus::Idle, &session),
            Advance::Started => {
                info!(session_id, "Intake started");
                IntakeOutcome::new(session_id, IntakeStatus::Started, &session)
            }
            Advance::Cancelled => {
                info!(session_id, step = before.index(), "Intake cancelled");
                IntakeOutcome::new(session_id, IntakeStatus::Cancelled, &session)
            }
            Advance::Accepted {
                field,
                value,
                estimated,
            } => {
                info!(session_id, field, value, estimated, "Intake field accepted");
                let mut outcome = IntakeOutcome::new(session_id, IntakeStatus::Accepted, &session);
                outcome.accepted = Some(AcceptedValue {
                    field,
                    value,
                    estimated,
                });
                outcome
            }
            Advance::Rejected(error) => {
                warn!(session_id, step = before.index(), error = %error, "Intake answer rejected");
                let mut outcome = IntakeOutcome::new(session_id, IntakeStatus::Rejected, &session);
                outcome.error = Some(error.to_body());
                outcome
            }
            Advance::Complete(draft) => {
                let result = self.ledger.create_cycle(&draft.to_payload()).await;

                let mut outcome = IntakeOutcome::new(session_id, IntakeStatus::Committed, &session);
                outcome.accepted = before.field().map(|field| AcceptedValue {
                    field,
                    value: draft.fee2.unwrap_or_default(),
                    estimated: draft.gross_destination.is_some(),
                });
                outcome.draft = draft;

                match result {
                    Ok(cycle) => {
                        info!(session_id, cycle_id = cycle.cycle_id, "Intake committed");
                        outcome.cycle = Some(cycle);
                    }
                    Err(error) => {
                        warn!(session_id, error = %error, "Intake commit failed");
                        outcome.status = IntakeStatus::CommitFailed;
                        outcome.error = Some(error.to_body());
                    }
                }
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CycleStatus;
    use crate::state::InMemoryLedgerStore;

    fn coordinator() -> IntakeCoordinator {
        let ledger = Arc::new(LedgerService::new(Box::new(InMemoryLedgerStore::new())));
        IntakeCoordinator::new(ledger, SessionCache::new())
    }

    async fn run(intake: &IntakeCoordinator, session: &str, lines: &[&str]) -> Vec<IntakeOutcome> {
        let mut outcomes = Vec::new();
        for line in lines {
            outcomes.push(intake.advance(session, line).await);
        }
        outcomes
    }

    #[tokio::test]
    async fn test_wizard_commits_cycle() {
        let intake = coordinator();
        let outcomes = run(
            &intake,
            "s1",
            &["crear ciclo", "6", "11000", "80", "0,99", "calculate", "562", "2301,56"],
        )
        .await;

        assert_eq!(outcomes[0].status, IntakeStatus::Started);
        assert_eq!(outcomes[0].awaiting_field, Some("cycleId"));

        let delegated = outcomes[5].accepted.as_ref().unwrap();
        assert_eq!(delegated.field, "intermediateAmount");
        assert_eq!(delegated.value, 136.51);
        assert!(delegated.estimated);

        let last = outcomes.last().unwrap();
        assert_eq!(last.status, IntakeStatus::Committed);
        assert_eq!(last.step_index, 0);
        assert_eq!(last.awaiting_field, None);
        assert_eq!(last.draft.fee2, Some(2301.56));

        let cycle = last.cycle.as_ref().unwrap();
        assert_eq!(cycle.cycle_id, 6);
        assert_eq!(cycle.intermediate_amount, Some(136.51));
        assert_eq!(cycle.status, CycleStatus::Pending);

        let stored = intake.ledger().get_cycle(6).await.unwrap();
        assert_eq!(&stored, cycle);
    }

    #[tokio::test]
    async fn test_rejection_reports_field_and_keeps_step() {
        let intake = coordinator();
        let outcomes = run(&intake, "s1", &["new cycle", "6", "lots of money"]).await;

        let rejected = &outcomes[2];
        assert_eq!(rejected.status, IntakeStatus::Rejected);
        assert_eq!(rejected.step_index, 2);
        assert_eq!(rejected.awaiting_field, Some("investedAmount"));
        assert_eq!(rejected.draft.cycle_id, Some(6));

        let error = rejected.error.as_ref().unwrap();
        assert_eq!(error.kind, "validation_failed");
        assert_eq!(error.field, Some("investedAmount"));
    }

    #[tokio::test]
    async fn test_duplicate_id_fails_and_resets() {
        let intake = coordinator();
        let answers = ["new cycle", "6", "11000", "80", "0.99", "136.51", "562", "15%"];
        run(&intake, "s1", &answers).await;

        let outcomes = run(&intake, "s1", &answers).await;
        let last = outcomes.last().unwrap();
        assert_eq!(last.status, IntakeStatus::CommitFailed);
        assert_eq!(last.error.as_ref().unwrap().kind, "already_exists");
        assert_eq!(last.step_index, 0);

        let handle = intake.sessions().session("s1").await;
        assert!(!handle.lock().await.is_active());

        let cycles = intake.ledger().list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].gross_destination, Some(76718.62));
        assert_eq!(cycles[0].fee2, Some(11507.79));
        assert_eq!(cycles[0].status, CycleStatus::InProgress);
    }

    #[tokio::test]
    async fn test_cancel_leaves_ledger_untouched() {
        let intake = coordinator();
        let outcomes = run(&intake, "s1", &["start a cycle", "6", "11000", "cancel"]).await;

        let cancelled = outcomes.last().unwrap();
        assert_eq!(cancelled.status, IntakeStatus::Cancelled);
        assert_eq!(cancelled.draft, IntakeDraft::default());
        assert!(intake.ledger().list_cycles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let intake = coordinator();

        intake.advance("alice", "new cycle").await;
        intake.advance("bob", "new cycle").await;
        intake.advance("alice", "1").await;
        intake.advance("bob", "2").await;
        let alice = intake.advance("alice", "500").await;
        let bob = intake.advance("bob", "stop").await;

        assert_eq!(alice.draft.cycle_id, Some(1));
        assert_eq!(alice.draft.invested_amount, Some(500.0));
        assert_eq!(alice.awaiting_field, Some("exchangeRate1"));
        assert_eq!(bob.status, IntakeStatus::Cancelled);

        let idle = intake.advance("carol", "hello").await;
        assert_eq!(idle.status, IntakeStatus::Idle);
    }
}
