//! Core identifier types used throughout the engine.
//!
//! Every entity in the order fulfillment domain is keyed by one of these
//! newtypes rather than a bare integer: orders, retailers, wholesalers and
//! products live in independent id spaces and mixing them up at a call site
//! is a real defect class, not a hypothetical one (e.g. `release(wholesaler_id)`
//! instead of `release(order_id)` compiles fine with bare `i64`).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(OrderId);
id_newtype!(RetailerId);
id_newtype!(WholesalerId);
id_newtype!(ProductId);
id_newtype!(OfferId);
id_newtype!(ReservationId);
id_newtype!(LedgerEntryId);

/// Sequence number used for ordering TransitionLog / LedgerEntry rows within
/// a single chain where `created_at` resolution alone is not enough to break
/// ties deterministically in tests.
pub type SeqNum = i64;
