//! Snapshot of the lottery contract as seen by one synchronization pass.
//!
//! A [`LotteryView`] is only ever built through [`LotteryView::assemble`], which
//! refuses combinations of known fields that the contract can never be in. Fields
//! whose read failed stay [`Field::Unknown`]; they are never replaced by a default.

use crate::is_unset;
use fuels::types::Identity;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Field<T> {
    Known(T),
    #[default]
    Unknown,
}

impl<T> Field<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Field::Known(value) => Some(value),
            Field::Unknown => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Known(value),
            None => Field::Unknown,
        }
    }
}

/// Raw results of the reads of one pass, before validation.
#[derive(Clone, Debug, Default)]
pub struct FieldReads {
    pub manager: Field<Identity>,
    pub is_complete: Field<bool>,
    /// `Known(None)` is the unset-winner sentinel.
    pub winner: Field<Option<Identity>>,
    pub claimed: Field<bool>,
    pub block_height: Option<u32>,
}

impl FieldReads {
    pub fn with_winner_identity(mut self, winner: Field<Identity>) -> Self {
        self.winner = match winner {
            Field::Known(id) if is_unset(&id) => Field::Known(None),
            Field::Known(id) => Field::Known(Some(id)),
            Field::Unknown => Field::Unknown,
        };
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Inconsistency {
    #[error("prize reported as claimed while the round is still open")]
    ClaimedWhileOpen,
    #[error("a winner is reported while the round is still open")]
    WinnerWhileOpen,
    #[error("the round is closed but no winner is reported")]
    ClosedWithoutWinner,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LotteryView {
    manager: Field<Identity>,
    is_complete: Field<bool>,
    winner: Field<Option<Identity>>,
    claimed: Field<bool>,
    block_height: Option<u32>,
}

impl LotteryView {
    pub fn assemble(reads: FieldReads) -> Result<Self, Inconsistency> {
        let FieldReads {
            manager,
            is_complete,
            winner,
            claimed,
            block_height,
        } = reads;

        if let Field::Known(false) = is_complete {
            if let Field::Known(true) = claimed {
                return Err(Inconsistency::ClaimedWhileOpen);
            }
            if let Field::Known(Some(_)) = winner {
                return Err(Inconsistency::WinnerWhileOpen);
            }
        }
        if let (Field::Known(true), Field::Known(None)) = (is_complete, &winner) {
            return Err(Inconsistency::ClosedWithoutWinner);
        }

        Ok(Self {
            manager,
            is_complete,
            winner,
            claimed,
            block_height,
        })
    }

    pub fn manager(&self) -> Field<Identity> {
        self.manager.clone()
    }

    pub fn is_complete(&self) -> Field<bool> {
        self.is_complete
    }

    /// Only meaningful when the round is complete.
    pub fn winner(&self) -> Field<Option<Identity>> {
        self.winner.clone()
    }

    pub fn claimed(&self) -> Field<bool> {
        self.claimed
    }

    pub fn block_height(&self) -> Option<u32> {
        self.block_height
    }

    /// `Unknown` when either side of the comparison is not known.
    pub fn is_winner(&self, identity: Option<&Identity>) -> Field<bool> {
        match (identity, &self.winner) {
            (Some(identity), Field::Known(winner)) => {
                Field::Known(winner.as_ref() == Some(identity))
            }
            _ => Field::Unknown,
        }
    }

    pub fn is_manager(&self, identity: Option<&Identity>) -> Field<bool> {
        match (identity, &self.manager) {
            (Some(identity), Field::Known(manager)) => Field::Known(manager == identity),
            _ => Field::Unknown,
        }
    }
}

/// What the synchronizer hands to the UI.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Snapshot {
    #[default]
    Loading,
    Ready(LotteryView),
    Inconsistent(Inconsistency),
    /// Every read failed for lack of a provider.
    Unreachable(String),
}

impl Snapshot {
    pub fn view(&self) -> Option<&LotteryView> {
        match self {
            Snapshot::Ready(view) => Some(view),
            _ => None,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Loading => write!(f, "Loading..."),
            Snapshot::Ready(_) => write!(f, "Synchronized"),
            Snapshot::Inconsistent(reason) => write!(f, "Inconsistent state: {reason}"),
            Snapshot::Unreachable(reason) => write!(f, "Ledger unreachable: {reason}"),
        }
    }
}
