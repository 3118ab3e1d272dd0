//! Ledger records and history replay.
//!
//! Ledger entries are append-only. Replaying a component's entries from its
//! registration quantity must reproduce the current quantity; `replay` checks
//! that and the before/after chain between consecutive entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use labstock_core::{ActorId, ComponentId, Entity, LedgerEntryId, ScanEventId};

use crate::movement::Movement;
use crate::transaction::TransactionKind;

/// Immutable record of one stock-changing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub component_id: ComponentId,
    pub kind: TransactionKind,
    /// Non-negative magnitude; the direction is implied by `kind` (and, for
    /// adjustments, by the before/after snapshot).
    pub quantity: i64,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub actor_id: ActorId,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_movement(
        component_id: ComponentId,
        movement: &Movement,
        actor_id: ActorId,
        reason: Option<String>,
        reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            component_id,
            kind: movement.kind,
            quantity: movement.magnitude,
            reason,
            reference,
            actor_id,
            quantity_before: movement.quantity_before,
            quantity_after: movement.quantity_after,
            created_at,
        }
    }

    /// Signed effect of this entry on stock.
    pub fn delta(&self) -> i64 {
        match self.kind {
            TransactionKind::Inward => self.quantity,
            TransactionKind::Outward => -self.quantity,
            TransactionKind::Adjustment => self.quantity_after - self.quantity_before,
        }
    }
}

impl Entity for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Record that a ledger entry originated from a QR scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: ScanEventId,
    pub ledger_entry_id: LedgerEntryId,
    pub scan_code: String,
    pub component_id: ComponentId,
    pub kind: TransactionKind,
    pub quantity: i64,
    /// Location reported by the scanner, if any.
    pub location: Option<String>,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Build the scan record that accompanies `entry`.
    pub fn for_entry(entry: &LedgerEntry, scan_code: impl Into<String>, location: Option<String>) -> Self {
        Self {
            id: ScanEventId::new(),
            ledger_entry_id: entry.id,
            scan_code: scan_code.into(),
            component_id: entry.component_id,
            kind: entry.kind,
            quantity: entry.quantity,
            location,
            actor_id: entry.actor_id,
            created_at: entry.created_at,
        }
    }

    /// Whether `entry` is the ledger record this scan belongs to.
    pub fn corresponds_to(&self, entry: &LedgerEntry) -> bool {
        self.ledger_entry_id == entry.id
            && self.component_id == entry.component_id
            && self.kind == entry.kind
            && self.quantity == entry.quantity
            && self.actor_id == entry.actor_id
    }
}

impl Entity for ScanEvent {
    type Id = ScanEventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("entry {entry} belongs to component {found}, not {expected}")]
    ForeignEntry {
        entry: LedgerEntryId,
        expected: ComponentId,
        found: ComponentId,
    },

    #[error("entry {entry} starts at {recorded} but the running balance is {running}")]
    BrokenChain {
        entry: LedgerEntryId,
        running: i64,
        recorded: i64,
    },

    #[error("entry {entry} records after={recorded} but its delta gives {computed}")]
    InconsistentEntry {
        entry: LedgerEntryId,
        computed: i64,
        recorded: i64,
    },

    #[error("balance went negative ({balance}) at entry {entry}")]
    NegativeBalance { entry: LedgerEntryId, balance: i64 },

    #[error("balance overflow at entry {entry}")]
    Overflow { entry: LedgerEntryId },
}

/// Result of replaying a component's ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub initial_quantity: i64,
    pub replayed_quantity: i64,
    pub entries: usize,
    pub inward_total: i64,
    pub outward_total: i64,
    pub adjustment_net: i64,
}

/// Replay `entries` (oldest first) on top of `initial_quantity`.
pub fn replay<'a>(
    component_id: ComponentId,
    initial_quantity: i64,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary {
        initial_quantity,
        replayed_quantity: initial_quantity,
        entries: 0,
        inward_total: 0,
        outward_total: 0,
        adjustment_net: 0,
    };

    for entry in entries {
        if entry.component_id != component_id {
            return Err(ReplayError::ForeignEntry {
                entry: entry.id,
                expected: component_id,
                found: entry.component_id,
            });
        }
        if entry.quantity_before != summary.replayed_quantity {
            return Err(ReplayError::BrokenChain {
                entry: entry.id,
                running: summary.replayed_quantity,
                recorded: entry.quantity_before,
            });
        }

        let overflow = || ReplayError::Overflow { entry: entry.id };
        let delta = entry.delta();
        let next = summary.replayed_quantity.checked_add(delta).ok_or_else(overflow)?;
        if next != entry.quantity_after {
            return Err(ReplayError::InconsistentEntry {
                entry: entry.id,
                computed: next,
                recorded: entry.quantity_after,
            });
        }
        if next < 0 {
            return Err(ReplayError::NegativeBalance {
                entry: entry.id,
                balance: next,
            });
        }

        match entry.kind {
            TransactionKind::Inward => {
                summary.inward_total = summary.inward_total.checked_add(entry.quantity).ok_or_else(overflow)?;
            }
            TransactionKind::Outward => {
                summary.outward_total = summary.outward_total.checked_add(entry.quantity).ok_or_else(overflow)?;
            }
            TransactionKind::Adjustment => {
                summary.adjustment_net = summary.adjustment_net.checked_add(delta).ok_or_else(overflow)?;
            }
        }

        summary.replayed_quantity = next;
        summary.entries += 1;
    }

    Ok(summary)
}
