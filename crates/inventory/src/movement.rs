//! Quantity arithmetic for a single stock movement.
//!
//! Pure and deterministic: given the locked, current quantity and a request's
//! kind/quantity, decide the delta and the resulting quantity or refuse.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::TransactionKind;

/// The decided effect of one transaction on one component.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub kind: TransactionKind,
    pub quantity_before: i64,
    pub quantity_after: i64,
    /// Signed change (`quantity_after - quantity_before`).
    pub delta: i64,
    /// Non-negative magnitude recorded on the ledger entry.
    pub magnitude: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MovementError {
    #[error("insufficient stock (available: {available}, requested: {requested})")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("quantity {requested} is not valid for a {kind} movement")]
    InvalidQuantity { kind: TransactionKind, requested: i64 },

    #[error("quantity overflow")]
    Overflow,
}

/// Plan a movement against `current`.
///
/// - `Inward`: `+quantity`
/// - `Outward`: `-quantity`, refused if stock would go negative
/// - `Adjustment`: `quantity` is the new total; the delta is whatever gets there
pub fn plan_movement(kind: TransactionKind, quantity: i64, current: i64) -> Result<Movement, MovementError> {
    let delta = match kind {
        TransactionKind::Inward | TransactionKind::Outward if quantity <= 0 => {
            return Err(MovementError::InvalidQuantity { kind, requested: quantity });
        }
        TransactionKind::Adjustment if quantity < 0 => {
            return Err(MovementError::InvalidQuantity { kind, requested: quantity });
        }
        TransactionKind::Inward => quantity,
        TransactionKind::Outward => quantity.checked_neg().ok_or(MovementError::Overflow)?,
        TransactionKind::Adjustment => quantity.checked_sub(current).ok_or(MovementError::Overflow)?,
    };

    let after = current.checked_add(delta).ok_or(MovementError::Overflow)?;
    if after < 0 && kind != TransactionKind::Adjustment {
        return Err(MovementError::InsufficientStock {
            available: current,
            requested: quantity,
        });
    }

    let magnitude = match kind {
        TransactionKind::Adjustment => delta.checked_abs().ok_or(MovementError::Overflow)?,
        _ => quantity,
    };

    Ok(Movement {
        kind,
        quantity_before: current,
        quantity_after: after,
        delta,
        magnitude,
    })
}
