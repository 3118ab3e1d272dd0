use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labstock_core::{ComponentId, DomainError, DomainResult, Entity};

/// Reorder threshold applied when registration does not specify one.
pub const DEFAULT_REORDER_THRESHOLD: i64 = 10;

/// A trackable catalog item with a current stock quantity.
///
/// `quantity`, `location` and `last_moved` are only ever written by the ledger
/// engine while it holds the component's lock. Everything else is catalog data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub part_number: Option<String>,
    pub quantity: i64,
    /// Quantity at registration time; the starting point for ledger replay.
    pub initial_quantity: i64,
    pub reorder_threshold: i64,
    pub location: Option<String>,
    pub scan_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_moved: Option<DateTime<Utc>>,
}

/// Stock status shown alongside a component on reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Critical,
    Normal,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Critical => "critical",
            StockStatus::Normal => "normal",
        }
    }
}

impl Component {
    /// `critical` once quantity has dropped to (or below) the reorder threshold.
    pub fn stock_status(&self) -> StockStatus {
        if self.is_low_stock() {
            StockStatus::Critical
        } else {
            StockStatus::Normal
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_threshold
    }
}

impl Entity for Component {
    type Id = ComponentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Catalog registration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComponent {
    pub name: String,
    pub part_number: Option<String>,
    pub quantity: i64,
    pub reorder_threshold: Option<i64>,
    pub location: Option<String>,
}

impl NewComponent {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            part_number: None,
            quantity: 0,
            reorder_threshold: None,
            location: None,
        }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_part_number(mut self, part_number: impl Into<String>) -> Self {
        self.part_number = Some(part_number.into());
        self
    }

    pub fn with_reorder_threshold(mut self, threshold: i64) -> Self {
        self.reorder_threshold = Some(threshold);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Validate and materialize a component with a fresh id.
    pub fn into_component(self, now: DateTime<Utc>) -> DomainResult<Component> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("component name is required"));
        }
        if self.quantity < 0 {
            return Err(DomainError::validation("initial quantity cannot be negative"));
        }
        let reorder_threshold = self.reorder_threshold.unwrap_or(DEFAULT_REORDER_THRESHOLD);
        if reorder_threshold < 0 {
            return Err(DomainError::validation("reorder threshold cannot be negative"));
        }

        Ok(Component {
            id: ComponentId::new(),
            name: name.to_string(),
            part_number: non_blank(self.part_number),
            quantity: self.quantity,
            initial_quantity: self.quantity,
            reorder_threshold,
            location: non_blank(self.location),
            scan_code: None,
            created_at: now,
            last_moved: None,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
