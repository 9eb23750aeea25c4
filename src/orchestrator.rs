//! Lifecycle of user-initiated writes.
//!
//! One write at a time: `Idle → Submitting → PendingConfirmation → settled → Idle`.
//! Every settlement, successful or not, runs a full resync before the phase returns
//! to `Idle`, so the next action is always chosen against fresh state.

use crate::{
    contract::{
        ContractError,
        LotteryContract,
        Receipt,
        TxHandle,
        TxKind,
    },
    sync::{
        SyncTrigger,
        Synchronizer,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use fuels::types::Identity;
use std::{
    fmt,
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingTx {
    pub kind: TxKind,
    pub submitted_at: DateTime<Utc>,
    pub tx_id: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TxPhase {
    #[default]
    Idle,
    Submitting(TxKind),
    PendingConfirmation(PendingTx),
    Confirmed(TxKind),
    Reverted(TxKind),
    Rejected(TxKind),
}

impl TxPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, TxPhase::Idle)
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPhase::Idle => write!(f, "Idle"),
            TxPhase::Submitting(kind) => write!(f, "Waiting for signature: {kind}..."),
            TxPhase::PendingConfirmation(pending) => {
                write!(f, "Waiting for {} to confirm", pending.kind)?;
                if let Some(tx_id) = &pending.tx_id {
                    write!(f, " (tx {})", &tx_id[..tx_id.len().min(10)])?;
                }
                write!(f, "...")
            }
            TxPhase::Confirmed(kind) => write!(f, "{kind} confirmed; refreshing..."),
            TxPhase::Reverted(kind) => write!(f, "{kind} reverted; refreshing..."),
            TxPhase::Rejected(kind) => write!(f, "{kind} not signed; refreshing..."),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TxOutcome {
    Confirmed { kind: TxKind, receipt: Receipt },
    Reverted { kind: TxKind, reason: String },
    Rejected { kind: TxKind, reason: String },
    /// The write never made it onto the chain.
    NotSubmitted { kind: TxKind, reason: String },
}

impl TxOutcome {
    fn from_error(kind: TxKind, err: ContractError) -> Self {
        match err {
            ContractError::TxRejected(reason) => TxOutcome::Rejected { kind, reason },
            ContractError::RpcUnavailable(reason) | ContractError::SubmissionFailed(reason) => {
                TxOutcome::NotSubmitted { kind, reason }
            }
            ContractError::TxReverted(reason) | ContractError::CallReverted(reason) => {
                TxOutcome::Reverted { kind, reason }
            }
        }
    }

    pub fn kind(&self) -> TxKind {
        match self {
            TxOutcome::Confirmed { kind, .. }
            | TxOutcome::Reverted { kind, .. }
            | TxOutcome::Rejected { kind, .. }
            | TxOutcome::NotSubmitted { kind, .. } => *kind,
        }
    }

    fn trigger(&self) -> SyncTrigger {
        match self {
            TxOutcome::Confirmed { .. } => SyncTrigger::TxConfirmed,
            TxOutcome::Rejected { .. } => SyncTrigger::TxRejected,
            TxOutcome::Reverted { .. } | TxOutcome::NotSubmitted { .. } => {
                SyncTrigger::TxReverted
            }
        }
    }

    fn settled_phase(&self) -> TxPhase {
        let kind = self.kind();
        match self {
            TxOutcome::Confirmed { .. } => TxPhase::Confirmed(kind),
            TxOutcome::Rejected { .. } => TxPhase::Rejected(kind),
            TxOutcome::Reverted { .. } | TxOutcome::NotSubmitted { .. } => {
                TxPhase::Reverted(kind)
            }
        }
    }

    /// Message for the user, `None` when the write succeeded.
    pub fn user_error(&self) -> Option<String> {
        match self {
            TxOutcome::Confirmed { .. } => None,
            TxOutcome::Reverted { kind, reason } => {
                Some(format!("{kind} reverted: {reason}"))
            }
            TxOutcome::Rejected { kind, .. } => {
                Some(format!("{kind} cancelled: signature declined"))
            }
            TxOutcome::NotSubmitted { kind, reason } => {
                Some(format!("{kind} could not be submitted: {reason}"))
            }
        }
    }
}

/// Proof that the orchestrator left `Idle` for one write. Consumed by [`Orchestrator::run`].
#[derive(Debug)]
#[must_use = "the orchestrator stays busy until the submission is run"]
pub struct Submission {
    kind: TxKind,
}

impl Submission {
    pub fn kind(&self) -> TxKind {
        self.kind
    }
}

pub struct Orchestrator<R> {
    sync: Arc<Synchronizer<R>>,
    identity: watch::Receiver<Option<Identity>>,
    phase: watch::Sender<TxPhase>,
}

impl<R: LotteryContract> Orchestrator<R> {
    /// `identity` follows the active account; settlement resyncs for whoever is active then.
    pub fn new(
        sync: Arc<Synchronizer<R>>,
        identity: watch::Receiver<Option<Identity>>,
    ) -> Self {
        let (phase, _) = watch::channel(TxPhase::Idle);
        Self {
            sync,
            identity,
            phase,
        }
    }

    pub fn phase(&self) -> TxPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxPhase> {
        self.phase.subscribe()
    }

    /// Leaves `Idle` for `kind`, or returns `None` while another write is in flight.
    pub fn try_begin(&self, kind: TxKind) -> Option<Submission> {
        let started = self.phase.send_if_modified(|phase| {
            if !phase.is_idle() {
                return false;
            }
            *phase = TxPhase::Submitting(kind);
            true
        });
        if !started {
            info!(%kind, phase = %self.phase(), "action ignored; a transaction is in flight");
            return None;
        }
        Some(Submission { kind })
    }

    /// Drives a begun write from submission to settlement. No retries.
    ///
    /// `contract` must be bound to the account that signs.
    pub async fn run<C: LotteryContract>(
        &self,
        submission: Submission,
        contract: &C,
        stake: u64,
    ) -> TxOutcome {
        let kind = submission.kind;
        let submitted = match kind {
            TxKind::Enter => contract.enter(stake).await,
            TxKind::PickWinner => contract.pick_winner().await,
            TxKind::ClaimPrize => contract.claim_prize().await,
        };

        let outcome = match submitted {
            Err(err) => TxOutcome::from_error(kind, err),
            Ok(handle) => {
                let pending = PendingTx {
                    kind,
                    submitted_at: Utc::now(),
                    tx_id: handle.tx_id(),
                };
                info!(%kind, tx_id = ?pending.tx_id, "transaction submitted");
                self.phase.send_replace(TxPhase::PendingConfirmation(pending));
                match handle.await_confirmation().await {
                    Ok(receipt) => TxOutcome::Confirmed { kind, receipt },
                    Err(err) => TxOutcome::from_error(kind, err),
                }
            }
        };

        match outcome.user_error() {
            None => info!(%kind, "transaction confirmed"),
            Some(message) => warn!(%kind, "{message}"),
        }

        self.phase.send_replace(outcome.settled_phase());
        let identity = self.identity.borrow().clone();
        self.sync.resync(identity, outcome.trigger()).await;
        self.phase.send_replace(TxPhase::Idle);
        outcome
    }

    /// [`Self::try_begin`] followed by [`Self::run`].
    pub async fn execute<C: LotteryContract>(
        &self,
        contract: &C,
        kind: TxKind,
        stake: u64,
    ) -> Option<TxOutcome> {
        let submission = self.try_begin(kind)?;
        Some(self.run(submission, contract, stake).await)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        state::{
            Role,
            UiState,
            derive_state,
        },
        testing::{
            FakeLedger,
            FakeLottery,
            ScriptedAgent,
            identity,
        },
        view::Field,
    };
    use std::pin::pin;

    const STAKE: u64 = 100_000_000;

    fn setup(
        ledger: &FakeLedger,
        active: Identity,
    ) -> (Orchestrator<FakeLottery>, watch::Sender<Option<Identity>>) {
        let reader = ledger.as_account(identity(0xEE), ScriptedAgent::approving());
        let (active_tx, active_rx) = watch::channel(Some(active));
        let orchestrator = Orchestrator::new(Arc::new(Synchronizer::new(reader)), active_rx);
        (orchestrator, active_tx)
    }

    #[tokio::test]
    async fn execute__confirmed_enter_resyncs_and_returns_to_idle() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::approving());

        // when
        let outcome = orchestrator.execute(&player, TxKind::Enter, STAKE).await;

        // then
        assert!(matches!(outcome, Some(TxOutcome::Confirmed { kind: TxKind::Enter, .. })));
        assert_eq!(orchestrator.phase(), TxPhase::Idle);
        assert_eq!(ledger.entrants(), vec![identity(0xB)]);
        let published = orchestrator.sync.latest();
        assert_eq!(published.pass, 1);
        assert_eq!(
            published.snapshot.view().map(|v| v.block_height()),
            Some(Some(2))
        );
    }

    #[tokio::test]
    async fn execute__second_claim_reverts_and_view_stays_claimed() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        ledger.close_with_winner(identity(0xB));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let winner = ledger.as_account(identity(0xB), ScriptedAgent::approving());
        let first = orchestrator.execute(&winner, TxKind::ClaimPrize, 0).await;
        assert!(matches!(first, Some(TxOutcome::Confirmed { .. })));

        // when
        let second = orchestrator.execute(&winner, TxKind::ClaimPrize, 0).await;

        // then
        assert!(matches!(
            second,
            Some(TxOutcome::Reverted { kind: TxKind::ClaimPrize, .. })
        ));
        let snapshot = orchestrator.sync.latest().snapshot;
        assert_eq!(snapshot.view().map(|v| v.claimed()), Some(Field::Known(true)));
        assert_eq!(
            derive_state(&snapshot, Some(&identity(0xB)), Role::Entrant),
            UiState::ClosedWinnerClaimed
        );
    }

    #[tokio::test]
    async fn execute__enter_after_close_reverts_without_reopening() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        ledger.close_with_winner(identity(0xC));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::approving());

        // when
        let outcome = orchestrator.execute(&player, TxKind::Enter, STAKE).await;

        // then
        assert!(matches!(outcome, Some(TxOutcome::Reverted { kind: TxKind::Enter, .. })));
        let snapshot = orchestrator.sync.latest().snapshot;
        assert_eq!(
            derive_state(&snapshot, Some(&identity(0xB)), Role::Entrant),
            UiState::ClosedNonWinner
        );
    }

    #[tokio::test]
    async fn execute__declined_signature_is_rejected_and_still_resyncs() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::declining());

        // when
        let outcome = orchestrator.execute(&player, TxKind::Enter, STAKE).await;

        // then
        assert!(matches!(outcome, Some(TxOutcome::Rejected { kind: TxKind::Enter, .. })));
        assert!(ledger.submissions().is_empty());
        assert_eq!(orchestrator.sync.latest().pass, 1);
        let snapshot = orchestrator.sync.latest().snapshot;
        assert_eq!(
            derive_state(&snapshot, Some(&identity(0xB)), Role::Entrant),
            UiState::OpenEntrant
        );
    }

    #[tokio::test]
    async fn execute__declined_once_then_signed_on_the_next_attempt() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let agent = ScriptedAgent::approving();
        agent.push_answer(false);
        let player = ledger.as_account(identity(0xB), agent.clone());

        // when
        let declined = orchestrator.execute(&player, TxKind::Enter, STAKE).await;
        let signed = orchestrator.execute(&player, TxKind::Enter, STAKE).await;

        // then
        assert!(matches!(declined, Some(TxOutcome::Rejected { .. })));
        assert!(matches!(signed, Some(TxOutcome::Confirmed { .. })));
        let requests = agent.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.signer == identity(0xB) && r.amount == STAKE));
        assert_eq!(ledger.entrants(), vec![identity(0xB)]);
    }

    #[tokio::test]
    async fn execute__offline_submission_is_not_submitted_and_resyncs() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::approving());
        ledger.set_offline(true);
        let mut phases = orchestrator.subscribe();

        // when
        let outcome = orchestrator.execute(&player, TxKind::Enter, STAKE).await;

        // then
        let Some(outcome) = outcome else {
            panic!("write was not started");
        };
        assert!(matches!(outcome, TxOutcome::NotSubmitted { kind: TxKind::Enter, .. }));
        assert_eq!(
            outcome.user_error().as_deref(),
            Some("enter could not be submitted: connection refused")
        );
        assert!(ledger.submissions().is_empty());
        assert!(phases.has_changed().unwrap());
        assert_eq!(*phases.borrow_and_update(), TxPhase::Idle);
        let published = orchestrator.sync.latest();
        assert_eq!(published.pass, 1);
        assert!(matches!(published.snapshot, crate::view::Snapshot::Unreachable(_)));
    }

    #[tokio::test]
    async fn execute__non_manager_pick_reverts() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::approving());
        orchestrator.execute(&player, TxKind::Enter, STAKE).await;

        // when
        let outcome = orchestrator.execute(&player, TxKind::PickWinner, 0).await;

        // then
        assert!(matches!(
            outcome,
            Some(TxOutcome::Reverted { kind: TxKind::PickWinner, .. })
        ));
        assert!(!ledger.is_complete());
    }

    #[tokio::test]
    async fn try_begin__second_intent_while_pending_is_refused() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::approving());
        let gate = ledger.hold_confirmations();
        let mut first = pin!(orchestrator.execute(&player, TxKind::Enter, STAKE));
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(matches!(
            orchestrator.phase(),
            TxPhase::PendingConfirmation(PendingTx { kind: TxKind::Enter, .. })
        ));

        // when
        let second = orchestrator.try_begin(TxKind::Enter);
        gate.open();
        let first = first.await;

        // then
        assert!(second.is_none());
        assert!(matches!(first, Some(TxOutcome::Confirmed { .. })));
        assert_eq!(ledger.submissions().len(), 1);
        assert_eq!(orchestrator.phase(), TxPhase::Idle);
    }

    #[test]
    fn try_begin__leaves_idle_before_anything_is_awaited() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, _active) = setup(&ledger, identity(0xB));

        // when
        let submission = orchestrator.try_begin(TxKind::PickWinner);

        // then
        assert_eq!(submission.map(|s| s.kind()), Some(TxKind::PickWinner));
        assert_eq!(orchestrator.phase(), TxPhase::Submitting(TxKind::PickWinner));
        assert!(orchestrator.try_begin(TxKind::Enter).is_none());
    }

    #[tokio::test]
    async fn run__resyncs_for_the_account_active_at_settlement() {
        // given
        let ledger = FakeLedger::new(identity(0xA));
        let (orchestrator, active) = setup(&ledger, identity(0xB));
        let player = ledger.as_account(identity(0xB), ScriptedAgent::approving());
        let gate = ledger.hold_confirmations();
        let mut write = pin!(orchestrator.execute(&player, TxKind::Enter, STAKE));
        assert!(futures::poll!(write.as_mut()).is_pending());

        // when
        active.send_replace(Some(identity(0xC)));
        orchestrator
            .sync
            .resync(Some(identity(0xC)), SyncTrigger::IdentityChanged)
            .await;
        gate.open();
        let outcome = write.await;

        // then
        assert!(matches!(outcome, Some(TxOutcome::Confirmed { .. })));
        let published = orchestrator.sync.latest();
        assert_eq!(published.identity, Some(identity(0xC)));
        assert_eq!(
            derive_state(
                &published.snapshot_for(Some(&identity(0xC))),
                Some(&identity(0xC)),
                Role::Entrant
            ),
            UiState::OpenEntrant
        );
    }

    #[test]
    fn user_error__only_for_failed_writes() {
        let confirmed = TxOutcome::Confirmed {
            kind: TxKind::Enter,
            receipt: Receipt::default(),
        };
        let rejected = TxOutcome::Rejected {
            kind: TxKind::ClaimPrize,
            reason: "declined by user".to_string(),
        };

        assert_eq!(confirmed.user_error(), None);
        assert_eq!(
            rejected.user_error().as_deref(),
            Some("claim prize cancelled: signature declined")
        );
    }
}
