use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::money::Money;

/// Outcome of matching one invoice against its PO group. Exactly one status
/// per result; assignment follows a fixed priority order, structural and
/// fraud-risk signals before pricing nuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Match,
    DupInvoice,
    MissingPo,
    MissingGrn,
    Overbill,
    SkuMismatch,
    PriceVar,
    QtyVar,
}

impl MatchStatus {
    pub fn is_exception(self) -> bool {
        self != MatchStatus::Match
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStatus::Match => "MATCH",
            MatchStatus::DupInvoice => "DUP_INVOICE",
            MatchStatus::MissingPo => "MISSING_PO",
            MatchStatus::MissingGrn => "MISSING_GRN",
            MatchStatus::Overbill => "OVERBILL",
            MatchStatus::SkuMismatch => "SKU_MISMATCH",
            MatchStatus::PriceVar => "PRICE_VAR",
            MatchStatus::QtyVar => "QTY_VAR",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MATCH" => Ok(MatchStatus::Match),
            "DUP_INVOICE" => Ok(MatchStatus::DupInvoice),
            "MISSING_PO" => Ok(MatchStatus::MissingPo),
            "MISSING_GRN" => Ok(MatchStatus::MissingGrn),
            "OVERBILL" => Ok(MatchStatus::Overbill),
            "SKU_MISMATCH" => Ok(MatchStatus::SkuMismatch),
            "PRICE_VAR" => Ok(MatchStatus::PriceVar),
            "QTY_VAR" => Ok(MatchStatus::QtyVar),
            other => Err(format!("Unknown match status: '{other}'")),
        }
    }
}

/// One row of the reconciliation table: an invoice judged against its PO and
/// any linked goods receipts. Replaced wholesale per PO on every run — the
/// table is a derivation of current store contents, not a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub po_number: String,
    pub invoice_number: Option<String>,
    /// Content fingerprint of the invoice document, the audit-trail link.
    pub invoice_fingerprint: String,
    pub status: MatchStatus,
    /// Per-SKU `invoice_qty - reference_qty` (reference: GRN if delivered,
    /// else PO).
    pub qty_variances: BTreeMap<String, Decimal>,
    /// Per-SKU `invoice_unit_price - po_unit_price`.
    pub price_variances: BTreeMap<String, Money>,
    /// `invoice_total - po_total` in the base currency; `None` when either
    /// side could not be converted.
    pub total_variance: Option<Money>,
    /// True when an FX-unresolved document forced a monetary comparison to be
    /// skipped. A data-quality gap, not a silent 1:1 default.
    pub fx_gap: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrip() {
        for s in [
            MatchStatus::Match,
            MatchStatus::DupInvoice,
            MatchStatus::MissingPo,
            MatchStatus::MissingGrn,
            MatchStatus::Overbill,
            MatchStatus::SkuMismatch,
            MatchStatus::PriceVar,
            MatchStatus::QtyVar,
        ] {
            assert_eq!(MatchStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn only_match_is_not_an_exception() {
        assert!(!MatchStatus::Match.is_exception());
        assert!(MatchStatus::MissingGrn.is_exception());
        assert!(MatchStatus::QtyVar.is_exception());
    }

    #[test]
    fn result_serializes_with_status_string() {
        let r = ReconciliationResult {
            po_number: "PO-1000".into(),
            invoice_number: Some("INV-1000-1".into()),
            invoice_fingerprint: "ab".repeat(32),
            status: MatchStatus::Overbill,
            qty_variances: BTreeMap::new(),
            price_variances: BTreeMap::new(),
            total_variance: Some("12.50".parse().unwrap()),
            fx_gap: false,
            generated_at: Utc::now(),
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains(r#""status":"OVERBILL""#));
    }
}
