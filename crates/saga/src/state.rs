//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a buy or sell saga.
///
/// ```text
/// Buy:  Init ─► PriceResolved ─► Debiting ─┬─► DebitedAll ─► Granting ─┬─► GrantedAll ─► Committed
///                                          └─► DebitFailed ─► RolledBack └─► GrantFailed ─► RolledBack
/// Sell: Init ─► PriceResolved ─► Revoking ─┬─► RevokedAll ─► Crediting ─┬─► CreditedAll ─► Committed
///                                          └─► RevokeFailed ─► RolledBack └─► CreditFailed ─► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    Init,
    PriceResolved,
    Debiting,
    DebitedAll,
    DebitFailed,
    Granting,
    GrantedAll,
    GrantFailed,
    Revoking,
    RevokedAll,
    RevokeFailed,
    Crediting,
    CreditedAll,
    CreditFailed,
    Committed,
    RolledBack,
}

impl SagaState {
    /// Returns true if `next` may follow this state.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (Init, PriceResolved)
                | (PriceResolved, Debiting | Revoking)
                | (Debiting, DebitedAll | DebitFailed)
                | (DebitedAll, Granting)
                | (Granting, GrantedAll | GrantFailed)
                | (GrantedAll, Committed)
                | (Revoking, RevokedAll | RevokeFailed)
                | (RevokedAll, Crediting)
                | (Crediting, CreditedAll | CreditFailed)
                | (CreditedAll, Committed)
                | (DebitFailed | GrantFailed | RevokeFailed | CreditFailed, RolledBack)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Init => "Init",
            SagaState::PriceResolved => "PriceResolved",
            SagaState::Debiting => "Debiting",
            SagaState::DebitedAll => "DebitedAll",
            SagaState::DebitFailed => "DebitFailed",
            SagaState::Granting => "Granting",
            SagaState::GrantedAll => "GrantedAll",
            SagaState::GrantFailed => "GrantFailed",
            SagaState::Revoking => "Revoking",
            SagaState::RevokedAll => "RevokedAll",
            SagaState::RevokeFailed => "RevokeFailed",
            SagaState::Crediting => "Crediting",
            SagaState::CreditedAll => "CreditedAll",
            SagaState::CreditFailed => "CreditFailed",
            SagaState::Committed => "Committed",
            SagaState::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
