//! Order state machine (C5, spec.md §4.3).
//!
//! Generalizes the teacher's `transfer::state::TransferState` two-phase-
//! commit FSM (8 states, one fixed path) into the order lifecycle's 14
//! states and branching transition table.

use crate::error::EngineError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum OrderState {
    Created = 0,
    PendingBids = 1,
    CreditApproved = 2,
    StockReserved = 3,
    WholesalerAccepted = 4,
    Confirmed = 5,
    Processing = 6,
    Packed = 7,
    OutForDelivery = 8,
    Shipped = 9,
    Delivered = 10,
    Failed = 11,
    Cancelled = 12,
    Returned = 13,
}

impl OrderState {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Result<Self, EngineError> {
        match id {
            0 => Ok(OrderState::Created),
            1 => Ok(OrderState::PendingBids),
            2 => Ok(OrderState::CreditApproved),
            3 => Ok(OrderState::StockReserved),
            4 => Ok(OrderState::WholesalerAccepted),
            5 => Ok(OrderState::Confirmed),
            6 => Ok(OrderState::Processing),
            7 => Ok(OrderState::Packed),
            8 => Ok(OrderState::OutForDelivery),
            9 => Ok(OrderState::Shipped),
            10 => Ok(OrderState::Delivered),
            11 => Ok(OrderState::Failed),
            12 => Ok(OrderState::Cancelled),
            13 => Ok(OrderState::Returned),
            other => Err(EngineError::Internal(format!("unknown order state id {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Created => "CREATED",
            OrderState::PendingBids => "PENDING_BIDS",
            OrderState::CreditApproved => "CREDIT_APPROVED",
            OrderState::StockReserved => "STOCK_RESERVED",
            OrderState::WholesalerAccepted => "WHOLESALER_ACCEPTED",
            OrderState::Confirmed => "CONFIRMED",
            OrderState::Processing => "PROCESSING",
            OrderState::Packed => "PACKED",
            OrderState::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderState::Shipped => "SHIPPED",
            OrderState::Delivered => "DELIVERED",
            OrderState::Failed => "FAILED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Returned => "RETURNED",
        }
    }

    /// CANCELLED is the only state with no outgoing transitions at all.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Cancelled)
    }

    /// Pre-award state: at or before STOCK_RESERVED, strictly before
    /// WHOLESALER_ACCEPTED (spec.md GLOSSARY).
    pub fn is_pre_award(self) -> bool {
        matches!(
            self,
            OrderState::Created
                | OrderState::PendingBids
                | OrderState::CreditApproved
                | OrderState::StockReserved
        )
    }

    fn allowed_targets(self) -> &'static [OrderState] {
        use OrderState::*;
        match self {
            Created => &[PendingBids, Cancelled],
            PendingBids => &[CreditApproved, StockReserved, WholesalerAccepted, Cancelled, Failed],
            CreditApproved => &[StockReserved, WholesalerAccepted, Cancelled, Failed],
            StockReserved => &[WholesalerAccepted, Cancelled, Failed],
            WholesalerAccepted => &[Confirmed, Cancelled, Failed],
            Confirmed => &[Processing, Cancelled, Failed],
            Processing => &[Packed, Cancelled, Failed],
            Packed => &[OutForDelivery, Cancelled, Failed],
            OutForDelivery => &[Shipped, Delivered, Cancelled, Failed],
            Shipped => &[Delivered, Returned, Cancelled, Failed],
            Delivered => &[Returned],
            Failed => &[Cancelled, PendingBids],
            Cancelled => &[],
            Returned => &[Cancelled, PendingBids],
        }
    }

    pub fn can_transition_to(self, target: OrderState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Validate a transition per spec.md §4.3's contract: TERMINAL_STATE if
    /// the source is CANCELLED, INVALID_TRANSITION if the target isn't in
    /// the source's allowed set.
    pub fn validate_transition(self, target: OrderState) -> Result<(), EngineError> {
        if self.is_terminal() {
            return Err(EngineError::TerminalState);
        }
        if !self.can_transition_to(target) {
            return Err(EngineError::invalid_transition(self, target));
        }
        Ok(())
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for OrderState {
    type Error = EngineError;
    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::from_id(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderState::*;

    #[test]
    fn id_roundtrip() {
        for s in [
            Created, PendingBids, CreditApproved, StockReserved, WholesalerAccepted, Confirmed,
            Processing, Packed, OutForDelivery, Shipped, Delivered, Failed, Cancelled, Returned,
        ] {
            assert_eq!(OrderState::from_id(s.id()).unwrap(), s);
        }
    }

    #[test]
    fn cancelled_is_the_only_terminal_state() {
        assert!(Cancelled.is_terminal());
        for s in [Created, PendingBids, WholesalerAccepted, Delivered, Failed, Returned] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn happy_path_transitions_allowed() {
        assert!(Created.validate_transition(PendingBids).is_ok());
        assert!(PendingBids.validate_transition(WholesalerAccepted).is_ok());
        assert!(WholesalerAccepted.validate_transition(Confirmed).is_ok());
        assert!(Confirmed.validate_transition(Processing).is_ok());
        assert!(OutForDelivery.validate_transition(Delivered).is_ok());
        assert!(Delivered.validate_transition(Returned).is_ok());
    }

    #[test]
    fn cancelled_rejects_everything() {
        let err = Cancelled.validate_transition(PendingBids).unwrap_err();
        assert!(matches!(err, EngineError::TerminalState));
    }

    #[test]
    fn invalid_jump_is_rejected() {
        // spec.md scenario 6: DELIVERED -> PROCESSING must fail.
        let err = Delivered.validate_transition(Processing).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn failed_and_returned_can_restart_bidding() {
        assert!(Failed.validate_transition(PendingBids).is_ok());
        assert!(Returned.validate_transition(PendingBids).is_ok());
    }

    #[test]
    fn no_sequence_reaches_a_new_state_from_cancelled() {
        // state-machine monotonicity law (spec.md §8)
        assert!(Cancelled.allowed_targets().is_empty());
    }
}
