use core::str::FromStr;

use serde::{Deserialize, Serialize};

use labstock_core::{ActorId, ComponentId, DomainError, DomainResult};

/// The category of a stock movement.
///
/// `quantity` on a request is a magnitude for `Inward`/`Outward` and the new
/// absolute total for `Adjustment`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Inward,
    Outward,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Inward => "inward",
            TransactionKind::Outward => "outward",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    /// Scans only ever move stock in or out.
    pub fn is_scannable(&self) -> bool {
        !matches!(self, TransactionKind::Adjustment)
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    /// Accepts the canonical names plus the short `in`/`out` forms that QR
    /// clients send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inward" | "in" => Ok(TransactionKind::Inward),
            "outward" | "out" => Ok(TransactionKind::Outward),
            "adjustment" => Ok(TransactionKind::Adjustment),
            other => Err(DomainError::validation(format!(
                "unrecognized transaction kind '{other}' (expected inward, outward or adjustment)"
            ))),
        }
    }
}

/// How a request names its target component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ComponentRef {
    Id(ComponentId),
    /// Opaque code carried by a QR label.
    ScanCode(String),
}

impl ComponentRef {
    /// Scan codes are matched with surrounding whitespace removed.
    pub fn scan_code(code: impl Into<String>) -> Self {
        let code = code.into();
        ComponentRef::ScanCode(code.trim().to_string())
    }

    pub fn normalized(self) -> Self {
        match self {
            ComponentRef::ScanCode(code) => Self::scan_code(code),
            id => id,
        }
    }

    pub fn is_scan(&self) -> bool {
        matches!(self, ComponentRef::ScanCode(_))
    }
}

impl core::fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ComponentRef::Id(id) => write!(f, "id:{id}"),
            ComponentRef::ScanCode(code) => write!(f, "scan:{code}"),
        }
    }
}

impl From<ComponentId> for ComponentRef {
    fn from(value: ComponentId) -> Self {
        ComponentRef::Id(value)
    }
}

/// A request to move stock for one component.
///
/// A request is scan-originated exactly when it targets a scan code; only then
/// does the engine write a scan event and honour `scan_location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub component: ComponentRef,
    pub kind: TransactionKind,
    pub quantity: i64,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub actor_id: ActorId,
    pub scan_location: Option<String>,
}

impl TransactionRequest {
    /// A transaction entered by hand against a known component id.
    pub fn manual(component_id: ComponentId, kind: TransactionKind, quantity: i64, actor_id: ActorId) -> Self {
        Self {
            component: ComponentRef::Id(component_id),
            kind,
            quantity,
            reason: None,
            reference: None,
            actor_id,
            scan_location: None,
        }
    }

    /// A transaction triggered by scanning a QR label.
    pub fn scan(scan_code: impl Into<String>, kind: TransactionKind, quantity: i64, actor_id: ActorId) -> Self {
        Self {
            component: ComponentRef::scan_code(scan_code),
            kind,
            quantity,
            reason: None,
            reference: None,
            actor_id,
            scan_location: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_scan_location(mut self, location: impl Into<String>) -> Self {
        self.scan_location = Some(location.into());
        self
    }

    pub fn scan_code(&self) -> Option<&str> {
        match &self.component {
            ComponentRef::ScanCode(code) => Some(code.as_str()),
            ComponentRef::Id(_) => None,
        }
    }

    pub fn is_scan(&self) -> bool {
        self.component.is_scan()
    }

    /// Reason written to the ledger entry.
    ///
    /// Scans without an explicit reason are labelled with their direction.
    pub fn ledger_reason(&self) -> Option<String> {
        match (&self.reason, self.is_scan()) {
            (Some(r), _) => Some(r.clone()),
            (None, true) => Some(format!("QR scan - {}", self.kind)),
            (None, false) => None,
        }
    }

    /// Stateless validation; runs before any lock is taken.
    pub fn validate(&self) -> DomainResult<()> {
        match self.kind {
            TransactionKind::Inward | TransactionKind::Outward => {
                if self.quantity <= 0 {
                    return Err(DomainError::validation(format!(
                        "quantity must be a positive integer for {} transactions",
                        self.kind
                    )));
                }
            }
            TransactionKind::Adjustment => {
                if self.quantity < 0 {
                    return Err(DomainError::validation(
                        "adjustment total cannot be negative",
                    ));
                }
            }
        }

        match &self.component {
            ComponentRef::ScanCode(code) => {
                if code.trim().is_empty() {
                    return Err(DomainError::validation("scan code is required"));
                }
                if !self.kind.is_scannable() {
                    return Err(DomainError::validation(
                        "scan transactions must be inward or outward",
                    ));
                }
            }
            ComponentRef::Id(_) => {
                if self.scan_location.is_some() {
                    return Err(DomainError::validation(
                        "scan_location is only accepted on scan transactions",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ActorId {
        ActorId::new()
    }

    #[test]
    fn kind_parses_canonical_and_short_forms() {
        assert_eq!("inward".parse::<TransactionKind>().unwrap(), TransactionKind::Inward);
        assert_eq!(" IN ".parse::<TransactionKind>().unwrap(), TransactionKind::Inward);
        assert_eq!("out".parse::<TransactionKind>().unwrap(), TransactionKind::Outward);
        assert_eq!("Adjustment".parse::<TransactionKind>().unwrap(), TransactionKind::Adjustment);
        assert!(matches!(
            "transfer".parse::<TransactionKind>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_value(TransactionKind::Outward).unwrap();
        assert_eq!(json, serde_json::json!("outward"));
    }

    #[test]
    fn zero_or_negative_quantity_is_rejected_for_moves() {
        let id = ComponentId::new();
        for q in [0, -3] {
            for kind in [TransactionKind::Inward, TransactionKind::Outward] {
                let req = TransactionRequest::manual(id, kind, q, actor());
                assert!(req.validate().is_err(), "{kind} with {q} should be invalid");
            }
        }
    }

    #[test]
    fn adjustment_accepts_zero_but_not_negative_total() {
        let id = ComponentId::new();
        assert!(TransactionRequest::manual(id, TransactionKind::Adjustment, 0, actor())
            .validate()
            .is_ok());
        assert!(TransactionRequest::manual(id, TransactionKind::Adjustment, -1, actor())
            .validate()
            .is_err());
    }

    #[test]
    fn scans_cannot_adjust_or_use_blank_codes() {
        assert!(TransactionRequest::scan("QR-1", TransactionKind::Adjustment, 5, actor())
            .validate()
            .is_err());
        assert!(TransactionRequest::scan("  ", TransactionKind::Inward, 5, actor())
            .validate()
            .is_err());
        assert!(TransactionRequest::scan("QR-1", TransactionKind::Outward, 5, actor())
            .with_scan_location("Bench 4")
            .validate()
            .is_ok());
    }

    #[test]
    fn scan_codes_are_trimmed() {
        let req = TransactionRequest::scan(" QR-A \t", TransactionKind::Inward, 1, actor());
        assert_eq!(req.scan_code(), Some("QR-A"));

        let id = ComponentId::new();
        assert_eq!(ComponentRef::Id(id).normalized(), ComponentRef::Id(id));
        assert_eq!(
            ComponentRef::ScanCode("  QR-B ".into()).normalized(),
            ComponentRef::ScanCode("QR-B".into())
        );
    }

    #[test]
    fn scan_location_requires_scan_origin() {
        let req = TransactionRequest::manual(ComponentId::new(), TransactionKind::Inward, 1, actor())
            .with_scan_location("Shelf B");
        assert!(req.validate().is_err());
    }

    #[test]
    fn scan_reason_defaults_to_direction_label() {
        let scan = TransactionRequest::scan("QR-9", TransactionKind::Inward, 3, actor());
        assert_eq!(scan.ledger_reason().as_deref(), Some("QR scan - inward"));

        let manual = TransactionRequest::manual(ComponentId::new(), TransactionKind::Inward, 3, actor());
        assert_eq!(manual.ledger_reason(), None);

        let explicit = scan.with_reason("restock");
        assert_eq!(explicit.ledger_reason().as_deref(), Some("restock"));
    }
}
