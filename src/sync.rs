//! Pulls contract state into [`Snapshot`]s.
//!
//! Every pass draws a number from a monotonic counter before it issues any read.
//! A pass that settles after a newer pass has already published is dropped, so the
//! watch channel only ever moves forward.

use crate::{
    contract::{
        ContractError,
        LotteryContract,
    },
    short_identity,
    view::{
        Field,
        FieldReads,
        LotteryView,
        Snapshot,
    },
};
use futures::{
    StreamExt,
    stream::FuturesUnordered,
};
use fuels::types::Identity;
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncTrigger {
    Initial,
    IdentityChanged,
    TxConfirmed,
    TxReverted,
    TxRejected,
    PollTick,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Initial => "initial",
            SyncTrigger::IdentityChanged => "identity changed",
            SyncTrigger::TxConfirmed => "tx confirmed",
            SyncTrigger::TxReverted => "tx reverted",
            SyncTrigger::TxRejected => "tx rejected",
            SyncTrigger::PollTick => "poll tick",
        };
        write!(f, "{name}")
    }
}

/// The latest accepted pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Published {
    pub pass: u64,
    pub identity: Option<Identity>,
    pub snapshot: Snapshot,
}

impl Published {
    /// The snapshot, or `Loading` when it was taken for another identity.
    pub fn snapshot_for(&self, identity: Option<&Identity>) -> Snapshot {
        if self.identity.as_ref() == identity {
            self.snapshot.clone()
        } else {
            Snapshot::Loading
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncReport {
    Published(u64),
    Superseded(u64),
}

pub struct Synchronizer<C> {
    contract: C,
    passes: AtomicU64,
    published: watch::Sender<Published>,
}

impl<C: LotteryContract> Synchronizer<C> {
    pub fn new(contract: C) -> Self {
        let (published, _) = watch::channel(Published::default());
        Self {
            contract,
            passes: AtomicU64::new(0),
            published,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.published.subscribe()
    }

    pub fn latest(&self) -> Published {
        self.published.borrow().clone()
    }

    /// Reserves the number of a new pass. Later reservations win over earlier ones.
    pub fn begin_pass(&self) -> u64 {
        self.passes.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn complete_pass(&self, pass: u64, identity: Option<Identity>) -> SyncReport {
        let snapshot = self.read_snapshot().await;
        let label = identity
            .as_ref()
            .map(short_identity)
            .unwrap_or_else(|| "none".to_string());

        let accepted = self.published.send_if_modified(|current| {
            if pass <= current.pass {
                return false;
            }
            *current = Published {
                pass,
                identity,
                snapshot,
            };
            true
        });

        if accepted {
            debug!(pass, identity = %label, "snapshot published");
            SyncReport::Published(pass)
        } else {
            debug!(pass, identity = %label, "pass superseded by a newer one; dropped");
            SyncReport::Superseded(pass)
        }
    }

    /// Runs one full pass to completion.
    pub async fn resync(&self, identity: Option<Identity>, trigger: SyncTrigger) -> SyncReport {
        let pass = self.begin_pass();
        debug!(pass, %trigger, "sync pass started");
        self.complete_pass(pass, identity).await
    }

    async fn read_snapshot(&self) -> Snapshot {
        let contract = &self.contract;
        let (manager, winner, complete, claimed, height) = futures::join!(
            contract.get_manager(),
            contract.get_winner(),
            contract.is_complete(),
            contract.is_claimed(),
            contract.latest_block_height(),
        );

        let failures = [
            manager.as_ref().err(),
            winner.as_ref().err(),
            complete.as_ref().err(),
            claimed.as_ref().err(),
            height.as_ref().err(),
        ];
        if failures
            .iter()
            .all(|e| matches!(e, Some(ContractError::RpcUnavailable(_))))
        {
            let reason = failures
                .into_iter()
                .flatten()
                .next()
                .map(|e| e.to_string())
                .unwrap_or_default();
            warn!(%reason, "every read failed; ledger unreachable");
            return Snapshot::Unreachable(reason);
        }
        for (field, err) in ["manager", "winner", "is_complete", "claimed", "block_height"]
            .iter()
            .zip(failures)
        {
            if let Some(err) = err {
                warn!(field, error = %err, "read failed; field left unknown");
            }
        }

        let reads = FieldReads {
            manager: manager.ok().into(),
            is_complete: complete.ok().into(),
            claimed: claimed.ok().into(),
            block_height: height.ok(),
            ..Default::default()
        }
        .with_winner_identity(Field::from(winner.ok()));

        match LotteryView::assemble(reads) {
            Ok(view) => Snapshot::Ready(view),
            Err(reason) => {
                warn!(%reason, "ledger reported an inconsistent state");
                Snapshot::Inconsistent(reason)
            }
        }
    }
}

pub enum SyncCommand {
    Trigger(SyncTrigger),
    Shutdown,
}

fn start_pass<C: LotteryContract>(
    sync: Arc<Synchronizer<C>>,
    identity: Option<Identity>,
    trigger: SyncTrigger,
) -> impl Future<Output = (SyncTrigger, SyncReport)> + Send {
    let pass = sync.begin_pass();
    debug!(pass, %trigger, "sync pass started");
    async move { (trigger, sync.complete_pass(pass, identity).await) }
}

/// Runs sync passes on triggers, identity changes and a periodic tick until shut down.
///
/// Passes are not awaited one by one: a trigger arriving while a pass is in flight
/// starts a newer pass right away.
pub async fn sync_worker<C: LotteryContract>(
    sync: Arc<Synchronizer<C>>,
    mut identity_rx: watch::Receiver<Option<Identity>>,
    mut cmd_rx: mpsc::UnboundedReceiver<SyncCommand>,
    poll_interval: Duration,
) {
    let mut ticker = time::interval_at(time::Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = FuturesUnordered::new();
    let mut identity_open = true;

    let identity = identity_rx.borrow_and_update().clone();
    in_flight.push(start_pass(sync.clone(), identity, SyncTrigger::Initial));

    loop {
        tokio::select! {
            Some((trigger, report)) = in_flight.next(), if !in_flight.is_empty() => {
                if let SyncReport::Superseded(pass) = report {
                    debug!(pass, %trigger, "stale pass discarded");
                }
            }
            _ = ticker.tick() => {
                let identity = identity_rx.borrow().clone();
                in_flight.push(start_pass(sync.clone(), identity, SyncTrigger::PollTick));
            }
            changed = identity_rx.changed(), if identity_open => {
                if changed.is_err() {
                    identity_open = false;
                    continue;
                }
                let identity = identity_rx.borrow_and_update().clone();
                info!("identity changed; resynchronizing");
                in_flight.push(start_pass(sync.clone(), identity, SyncTrigger::IdentityChanged));
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SyncCommand::Trigger(trigger)) => {
                        let identity = identity_rx.borrow().clone();
                        in_flight.push(start_pass(sync.clone(), identity, trigger));
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
        }
    }
    debug!("sync worker stopped");
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        testing::{
            FakeLedger,
            Read,
            ScriptedAgent,
            identity,
        },
        view::Inconsistency,
    };
    use std::pin::pin;

    fn synchronizer(ledger: &FakeLedger) -> Synchronizer<crate::testing::FakeLottery> {
        Synchronizer::new(ledger.as_account(identity(9), ScriptedAgent::approving()))
    }

    #[tokio::test]
    async fn resync__publishes_open_round() {
        // given
        let ledger = FakeLedger::new(identity(1));
        let sync = synchronizer(&ledger);

        // when
        let report = sync.resync(Some(identity(2)), SyncTrigger::Initial).await;

        // then
        assert_eq!(report, SyncReport::Published(1));
        let published = sync.latest();
        let view = published.snapshot.view().unwrap();
        assert_eq!(view.manager(), Field::Known(identity(1)));
        assert_eq!(view.is_complete(), Field::Known(false));
        assert_eq!(view.winner(), Field::Known(None));
        assert_eq!(published.identity, Some(identity(2)));
    }

    #[tokio::test]
    async fn resync__failed_read_leaves_only_that_field_unknown() {
        // given
        let ledger = FakeLedger::new(identity(1));
        ledger.fail_read(Read::IsComplete);
        let sync = synchronizer(&ledger);

        // when
        sync.resync(None, SyncTrigger::Initial).await;

        // then
        let published = sync.latest();
        let view = published.snapshot.view().unwrap();
        assert_eq!(view.is_complete(), Field::Unknown);
        assert_eq!(view.manager(), Field::Known(identity(1)));
        assert_eq!(view.claimed(), Field::Known(false));
    }

    #[tokio::test]
    async fn resync__mixed_read_failures_keep_the_view_ready() {
        // given
        let ledger = FakeLedger::new(identity(1));
        ledger.drop_read(Read::Manager);
        ledger.drop_read(Read::BlockHeight);
        ledger.fail_read(Read::Winner);
        let sync = synchronizer(&ledger);

        // when
        sync.resync(None, SyncTrigger::Initial).await;

        // then
        let published = sync.latest();
        let view = published.snapshot.view().unwrap();
        assert_eq!(view.manager(), Field::Unknown);
        assert_eq!(view.winner(), Field::Unknown);
        assert_eq!(view.block_height(), None);
        assert_eq!(view.is_complete(), Field::Known(false));
        assert_eq!(view.claimed(), Field::Known(false));

        // when
        ledger.restore_reads();
        sync.resync(None, SyncTrigger::PollTick).await;

        // then
        let published = sync.latest();
        let view = published.snapshot.view().unwrap();
        assert_eq!(view.manager(), Field::Known(identity(1)));
        assert_eq!(view.winner(), Field::Known(None));
    }

    #[tokio::test]
    async fn resync__offline_ledger_is_unreachable() {
        // given
        let ledger = FakeLedger::new(identity(1));
        ledger.set_offline(true);
        let sync = synchronizer(&ledger);

        // when
        sync.resync(None, SyncTrigger::Initial).await;

        // then
        assert!(matches!(sync.latest().snapshot, Snapshot::Unreachable(_)));
    }

    #[tokio::test]
    async fn resync__claimed_while_open_is_flagged_inconsistent() {
        // given
        let ledger = FakeLedger::new(identity(1));
        ledger.force_flags(false, true);
        let sync = synchronizer(&ledger);

        // when
        sync.resync(None, SyncTrigger::Initial).await;

        // then
        assert_eq!(
            sync.latest().snapshot,
            Snapshot::Inconsistent(Inconsistency::ClaimedWhileOpen)
        );
    }

    #[tokio::test]
    async fn complete_pass__older_pass_settling_last_is_discarded() {
        // given
        let ledger = FakeLedger::new(identity(1));
        let sync = synchronizer(&ledger);
        let gate = ledger.stall_reads();
        let old_pass = sync.begin_pass();
        let mut old = pin!(sync.complete_pass(old_pass, Some(identity(2))));
        assert!(futures::poll!(old.as_mut()).is_pending());

        // when
        ledger.clear_stall();
        let new_report = sync.resync(Some(identity(3)), SyncTrigger::IdentityChanged).await;
        gate.open();
        let old_report = old.await;

        // then
        assert_eq!(new_report, SyncReport::Published(2));
        assert_eq!(old_report, SyncReport::Superseded(1));
        let published = sync.latest();
        assert_eq!(published.pass, 2);
        assert_eq!(published.identity, Some(identity(3)));
    }

    #[test]
    fn snapshot_for__hides_snapshot_of_other_identity() {
        let published = Published {
            pass: 4,
            identity: Some(identity(2)),
            snapshot: Snapshot::Unreachable("down".to_string()),
        };

        assert_eq!(published.snapshot_for(Some(&identity(3))), Snapshot::Loading);
        assert_eq!(
            published.snapshot_for(Some(&identity(2))),
            Snapshot::Unreachable("down".to_string())
        );
    }

    #[tokio::test]
    async fn sync_worker__resyncs_on_trigger_and_identity_change() {
        // given
        let ledger = FakeLedger::new(identity(1));
        let sync = Arc::new(synchronizer(&ledger));
        let mut published = sync.subscribe();
        let (identity_tx, identity_rx) = watch::channel(Some(identity(2)));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(sync_worker(
            sync.clone(),
            identity_rx,
            cmd_rx,
            Duration::from_secs(3600),
        ));
        published.wait_for(|p| p.pass >= 1).await.unwrap();

        // when
        ledger.close_with_winner(identity(2));
        cmd_tx
            .send(SyncCommand::Trigger(SyncTrigger::TxConfirmed))
            .unwrap();
        let closed = published
            .wait_for(|p| {
                p.snapshot
                    .view()
                    .is_some_and(|v| v.is_complete() == Field::Known(true))
            })
            .await
            .unwrap()
            .clone();
        identity_tx.send_replace(Some(identity(5)));
        let switched = published
            .wait_for(|p| p.identity == Some(identity(5)))
            .await
            .unwrap()
            .clone();
        cmd_tx.send(SyncCommand::Shutdown).unwrap();
        worker.await.unwrap();

        // then
        assert_eq!(closed.identity, Some(identity(2)));
        assert!(switched.pass > closed.pass);
        assert_eq!(
            switched.snapshot.view().map(|v| v.winner()),
            Some(Field::Known(Some(identity(2))))
        );
    }
}
