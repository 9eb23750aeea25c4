use crate::{
    contract::TxKind,
    view::{
        Field,
        Snapshot,
    },
};
use fuels::types::Identity;
use std::fmt;

/// Which of the two views is on screen.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Role {
    #[default]
    Entrant,
    Owner,
}

impl Role {
    pub fn toggled(self) -> Self {
        match self {
            Role::Entrant => Role::Owner,
            Role::Owner => Role::Entrant,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Entrant => write!(f, "entrant"),
            Role::Owner => write!(f, "owner"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UiState {
    Disconnected,
    /// Entrant view while a field the decision needs is unknown.
    Syncing,
    /// Owner view while ownership or round status is unknown.
    AwaitingOwnerCheck,
    OpenEntrant,
    ClosedWinner,
    ClosedNonWinner,
    ClosedWinnerClaimed,
    OwnerCanPick,
    /// Round is over; the owner view just shows the winner.
    OwnerWaiting,
    NotOwner,
}

impl UiState {
    pub fn allowed_action(self) -> Option<TxKind> {
        match self {
            UiState::OpenEntrant => Some(TxKind::Enter),
            UiState::ClosedWinner => Some(TxKind::ClaimPrize),
            UiState::OwnerCanPick => Some(TxKind::PickWinner),
            _ => None,
        }
    }

    pub fn is_closed_entrant_state(self) -> bool {
        matches!(
            self,
            UiState::ClosedWinner | UiState::ClosedNonWinner | UiState::ClosedWinnerClaimed
        )
    }
}

/// Maps a snapshot and the connected identity to what the UI may offer.
///
/// Anything the rule depends on that is not known yields the blocking state of
/// the role, never an actionable one.
pub fn derive_state(
    snapshot: &Snapshot,
    identity: Option<&Identity>,
    role: Role,
) -> UiState {
    let Some(identity) = identity else {
        return UiState::Disconnected;
    };
    let blocked = match role {
        Role::Entrant => UiState::Syncing,
        Role::Owner => UiState::AwaitingOwnerCheck,
    };
    let Some(view) = snapshot.view() else {
        return blocked;
    };
    let Field::Known(complete) = view.is_complete() else {
        return blocked;
    };

    match role {
        Role::Entrant => {
            if !complete {
                return UiState::OpenEntrant;
            }
            match view.is_winner(Some(identity)) {
                Field::Known(false) => UiState::ClosedNonWinner,
                Field::Known(true) => match view.claimed() {
                    Field::Known(false) => UiState::ClosedWinner,
                    Field::Known(true) => UiState::ClosedWinnerClaimed,
                    Field::Unknown => blocked,
                },
                Field::Unknown => blocked,
            }
        }
        Role::Owner => {
            if complete {
                return UiState::OwnerWaiting;
            }
            match view.is_manager(Some(identity)) {
                Field::Known(true) => UiState::OwnerCanPick,
                Field::Known(false) => UiState::NotOwner,
                Field::Unknown => blocked,
            }
        }
    }
}
