use rust_decimal::Decimal;

use trimatch_core::{MatchStatus, Money, ToleranceConfig};

/// The distilled comparison facts for one (PO, invoice) pair. The engine
/// computes these; classification itself is a pure lookup table.
#[derive(Debug, Clone, Default)]
pub struct VarianceFacts {
    /// An earlier-ingested invoice in the same PO group already carries this
    /// invoice number.
    pub duplicate_invoice: bool,
    pub po_missing: bool,
    pub grn_missing: bool,
    /// PO declared total in the base currency.
    pub po_base_total: Option<Money>,
    /// `invoice_total - po_total` in the base currency.
    pub total_variance: Option<Money>,
    /// Invoice SKUs with no counterpart line on the PO.
    pub sku_mismatches: Vec<String>,
    /// Largest `|price_variance| / po_unit_price` across comparable SKUs.
    pub max_price_ratio: Option<Decimal>,
    /// Largest `|qty_variance|` across invoice SKUs.
    pub max_qty_variance: Decimal,
}

/// Assign the single exception status for a result. Priority is fixed:
/// duplicate billing and missing documents (structural, fraud-risk) dominate
/// the aggregate total, which dominates line-level price, which dominates
/// quantity — the most common, lowest-severity discrepancy.
pub fn classify_exception(facts: &VarianceFacts, tolerances: &ToleranceConfig) -> MatchStatus {
    if facts.duplicate_invoice {
        return MatchStatus::DupInvoice;
    }
    if facts.po_missing {
        return MatchStatus::MissingPo;
    }
    if facts.grn_missing {
        return MatchStatus::MissingGrn;
    }
    if let (Some(variance), Some(po_total)) = (facts.total_variance, facts.po_base_total) {
        if variance.amount() > po_total.amount() * tolerances.price_tolerance_pct {
            return MatchStatus::Overbill;
        }
    }
    if !facts.sku_mismatches.is_empty() {
        return MatchStatus::SkuMismatch;
    }
    if facts
        .max_price_ratio
        .is_some_and(|ratio| ratio > tolerances.price_tolerance_pct)
    {
        return MatchStatus::PriceVar;
    }
    if facts.max_qty_variance > tolerances.qty_tolerance_units {
        return MatchStatus::QtyVar;
    }
    MatchStatus::Match
}
