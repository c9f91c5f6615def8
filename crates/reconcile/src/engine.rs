use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use trimatch_core::{
    Money, PoDocuments, ReconciliationResult, StoredInvoice, StoredPurchaseOrder, ToleranceConfig,
};

use crate::exception::{classify_exception, VarianceFacts};

/// The three-way matcher. Pure over store contents: the same `PoDocuments`
/// always produce the same statuses and variances, so a rerun replaces prior
/// results without drift. One PO group is independent of every other, which
/// is what lets reconciliation shard by PO number.
pub struct ReconcileEngine {
    tolerances: ToleranceConfig,
}

impl ReconcileEngine {
    pub fn new(tolerances: ToleranceConfig) -> Self {
        Self { tolerances }
    }

    pub fn tolerances(&self) -> &ToleranceConfig {
        &self.tolerances
    }

    /// One result per invoice, in ingestion order. A PO with no invoices yet
    /// yields nothing — it is simply pending.
    pub fn reconcile_po(&self, po_number: &str, docs: &PoDocuments) -> Vec<ReconciliationResult> {
        let po = docs.pos.first();
        let grn_present = !docs.grns.is_empty();

        // Delivered quantity per SKU, summed across all linked receipts.
        let mut delivered: BTreeMap<&str, Decimal> = BTreeMap::new();
        for grn in &docs.grns {
            for line in &grn.record.items {
                *delivered.entry(line.sku.as_str()).or_default() += line.qty;
            }
        }

        let generated_at = Utc::now();
        let mut seen_numbers: BTreeSet<&str> = BTreeSet::new();
        docs.invoices
            .iter()
            .map(|invoice| {
                let duplicate = match invoice.record.number.as_deref() {
                    Some(number) => !seen_numbers.insert(number),
                    None => false,
                };
                self.reconcile_invoice(
                    po_number,
                    po,
                    invoice,
                    &delivered,
                    grn_present,
                    duplicate,
                    generated_at,
                )
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_invoice(
        &self,
        po_number: &str,
        po: Option<&StoredPurchaseOrder>,
        invoice: &StoredInvoice,
        delivered: &BTreeMap<&str, Decimal>,
        grn_present: bool,
        duplicate: bool,
        generated_at: DateTime<Utc>,
    ) -> ReconciliationResult {
        let mut qty_variances = BTreeMap::new();
        let mut price_variances = BTreeMap::new();
        let mut sku_mismatches = Vec::new();
        let mut max_price_ratio: Option<Decimal> = None;
        let mut max_qty_variance = Decimal::ZERO;
        let mut fx_gap = false;

        let ordered: BTreeMap<&str, (Decimal, Money)> = po
            .map(|p| {
                p.record
                    .items
                    .iter()
                    .map(|l| (l.sku.as_str(), (l.qty, l.unit_price)))
                    .collect()
            })
            .unwrap_or_default();

        // 1. Quantity: the reference is what was delivered, falling back to
        //    what was ordered when no receipt is linked. A SKU absent from
        //    the reference varies by the full invoiced quantity.
        for item in &invoice.record.items {
            let reference = if grn_present {
                delivered
                    .get(item.sku.as_str())
                    .copied()
                    .unwrap_or(Decimal::ZERO)
            } else {
                ordered
                    .get(item.sku.as_str())
                    .map(|(qty, _)| *qty)
                    .unwrap_or(Decimal::ZERO)
            };
            let variance = item.qty - reference;
            max_qty_variance = max_qty_variance.max(variance.abs());
            qty_variances.insert(item.sku.clone(), variance);
        }

        // 2. Unit price against the PO line. Cross-currency pairs compare in
        //    the base currency; an unresolvable rate skips the check and
        //    surfaces as a data-quality gap.
        if let Some(po) = po {
            let same_currency = invoice.record.currency.is_some()
                && invoice.record.currency == po.record.currency;
            let invoice_rate = invoice
                .record
                .currency
                .as_deref()
                .and_then(|c| self.tolerances.rate(c));
            let po_rate = po
                .record
                .currency
                .as_deref()
                .and_then(|c| self.tolerances.rate(c));

            for item in &invoice.record.items {
                let Some(&(_, po_unit)) = ordered.get(item.sku.as_str()) else {
                    sku_mismatches.push(item.sku.clone());
                    continue;
                };
                let pair = if same_currency {
                    Some((item.unit_price, po_unit))
                } else if let (Some(inv_rate), Some(po_rate)) = (invoice_rate, po_rate) {
                    Some((item.unit_price.convert(inv_rate), po_unit.convert(po_rate)))
                } else {
                    fx_gap = true;
                    None
                };
                if let Some((invoice_unit, po_unit)) = pair {
                    let variance = invoice_unit - po_unit;
                    if let Some(ratio) = variance.abs().ratio_to(po_unit) {
                        max_price_ratio = Some(max_price_ratio.map_or(ratio, |m| m.max(ratio)));
                    }
                    price_variances.insert(item.sku.clone(), variance);
                }
            }
        }

        // 3. Declared totals, both in the base currency.
        let po_base_total = po.and_then(|p| p.base_total);
        let total_variance = match (invoice.base_total, po_base_total) {
            (Some(invoice_total), Some(po_total)) => Some(invoice_total - po_total),
            _ => {
                if po.is_some()
                    && (invoice.fx_unresolved || po.is_some_and(|p| p.fx_unresolved))
                {
                    fx_gap = true;
                }
                None
            }
        };

        let facts = VarianceFacts {
            duplicate_invoice: duplicate,
            po_missing: po.is_none(),
            grn_missing: !grn_present,
            po_base_total,
            total_variance,
            sku_mismatches,
            max_price_ratio,
            max_qty_variance,
        };
        let status = classify_exception(&facts, &self.tolerances);
        debug!(po_number, invoice = ?invoice.record.number, %status, "reconciled pair");

        ReconciliationResult {
            po_number: po_number.to_string(),
            invoice_number: invoice.record.number.clone(),
            invoice_fingerprint: invoice.fingerprint.clone(),
            status,
            qty_variances,
            price_variances,
            total_variance,
            fx_gap,
            generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use trimatch_core::{
        GoodsReceipt, Invoice, ItemLine, MatchStatus, PurchaseOrder, ReceiptLine,
        StoredGoodsReceipt,
    };

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn item(sku: &str, qty: &str, price: &str) -> ItemLine {
        ItemLine {
            sku: sku.to_string(),
            description: None,
            qty: dec(qty),
            unit_price: money(price),
        }
    }

    fn po_doc(total: &str, items: Vec<ItemLine>) -> StoredPurchaseOrder {
        StoredPurchaseOrder {
            fingerprint: "po-fp".into(),
            record: PurchaseOrder {
                number: Some("PO-2001".into()),
                vendor: Some("Acme Components Ltd".into()),
                currency: Some("USD".into()),
                total: Some(money(total)),
                items,
                ..Default::default()
            },
            base_total: Some(money(total)),
            fx_unresolved: false,
        }
    }

    fn inv_doc(number: &str, total: &str, items: Vec<ItemLine>) -> StoredInvoice {
        StoredInvoice {
            fingerprint: format!("fp-{number}"),
            record: Invoice {
                number: Some(number.into()),
                po_number: Some("PO-2001".into()),
                vendor: Some("Acme Components Ltd".into()),
                currency: Some("USD".into()),
                total: Some(money(total)),
                items,
                ..Default::default()
            },
            base_total: Some(money(total)),
            fx_unresolved: false,
        }
    }

    fn grn_doc(lines: &[(&str, &str)]) -> StoredGoodsReceipt {
        StoredGoodsReceipt {
            fingerprint: "grn-fp".into(),
            record: GoodsReceipt {
                number: Some("GRN-2001".into()),
                po_number: Some("PO-2001".into()),
                items: lines
                    .iter()
                    .map(|(sku, qty)| ReceiptLine {
                        sku: sku.to_string(),
                        qty: dec(qty),
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    fn standard_items() -> Vec<ItemLine> {
        vec![item("WID-100", "10", "15.50"), item("BLT-050", "25", "2.75")]
    }

    fn engine() -> ReconcileEngine {
        ReconcileEngine::new(ToleranceConfig::default())
    }

    #[test]
    fn perfect_three_way_match() {
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc("INV-2001-1", "227.50", standard_items())],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.status, MatchStatus::Match);
        assert_eq!(r.total_variance, Some(Money::zero()));
        assert!(r.qty_variances.values().all(|v| v.is_zero()));
        assert!(r.price_variances.values().all(|v| v.is_zero()));
        assert!(!r.fx_gap);
    }

    #[test]
    fn overbilled_total_beyond_tolerance() {
        // 240.00 against 227.50: variance 12.50 > 2 % threshold of 4.55.
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc("INV-2001-1", "240.00", standard_items())],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::Overbill);
        assert_eq!(results[0].total_variance, Some(money("12.50")));
    }

    #[test]
    fn missing_grn_even_when_totals_match() {
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc("INV-2001-1", "227.50", standard_items())],
            grns: vec![],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::MissingGrn);
    }

    #[test]
    fn second_submission_of_same_invoice_number_is_duplicate() {
        let mut resubmission = inv_doc("INV-2001-1", "227.50", standard_items());
        resubmission.fingerprint = "fp-resubmitted".into();
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![
                inv_doc("INV-2001-1", "227.50", standard_items()),
                resubmission,
            ],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, MatchStatus::Match);
        assert_eq!(results[1].status, MatchStatus::DupInvoice);
    }

    #[test]
    fn invoice_without_resolvable_po() {
        let docs = PoDocuments {
            pos: vec![],
            invoices: vec![inv_doc("INV-2001-1", "227.50", standard_items())],
            grns: vec![],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::MissingPo);
    }

    #[test]
    fn short_delivery_beyond_qty_tolerance() {
        // Delivered 8 against invoiced 10: variance 2 > tolerance 1.
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc("INV-2001-1", "227.50", standard_items())],
            grns: vec![grn_doc(&[("WID-100", "8"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::QtyVar);
        assert_eq!(results[0].qty_variances["WID-100"], dec("2"));
    }

    #[test]
    fn undelivered_sku_varies_by_full_invoiced_qty() {
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc("INV-2001-1", "227.50", standard_items())],
            grns: vec![grn_doc(&[("WID-100", "10")])], // BLT-050 never arrived
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::QtyVar);
        assert_eq!(results[0].qty_variances["BLT-050"], dec("25"));
    }

    #[test]
    fn delivered_qty_takes_precedence_over_ordered() {
        // PO says 10, the receipt says 12 arrived, the invoice bills 12:
        // reference is the delivery, so nothing varies.
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc(
                "INV-2001-1",
                "227.50",
                vec![item("WID-100", "12", "15.50"), item("BLT-050", "25", "2.75")],
            )],
            grns: vec![grn_doc(&[("WID-100", "12"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::Match);
    }

    #[test]
    fn unit_price_drift_beyond_tolerance() {
        // Same declared totals, but WID-100 billed at 16.50 against 15.50:
        // ratio ≈ 6.5 % > 2 %.
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc(
                "INV-2001-1",
                "227.50",
                vec![item("WID-100", "10", "16.50"), item("BLT-050", "25", "2.75")],
            )],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::PriceVar);
        assert_eq!(results[0].price_variances["WID-100"], money("1.00"));
    }

    #[test]
    fn invoiced_sku_unknown_to_po_is_structural() {
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc(
                "INV-2001-1",
                "227.50",
                vec![
                    item("WID-100", "10", "15.50"),
                    item("BLT-050", "25", "2.75"),
                    item("GSK-200", "5", "0.00"),
                ],
            )],
            grns: vec![grn_doc(&[
                ("WID-100", "10"),
                ("BLT-050", "25"),
                ("GSK-200", "5"),
            ])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::SkuMismatch);
        // The rogue SKU is never price-checked.
        assert!(!results[0].price_variances.contains_key("GSK-200"));
    }

    #[test]
    fn unresolved_currency_reports_gap_instead_of_guessing() {
        let mut invoice = inv_doc("INV-2001-1", "227.50", standard_items());
        invoice.record.currency = Some("ZWL".into());
        invoice.base_total = None;
        invoice.fx_unresolved = true;
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![invoice],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        let r = &results[0];
        // No monetary rule can fire; the quantity story is clean.
        assert_eq!(r.status, MatchStatus::Match);
        assert!(r.fx_gap);
        assert_eq!(r.total_variance, None);
        assert!(r.price_variances.is_empty());
    }

    #[test]
    fn cross_currency_pair_compares_in_base() {
        // PO in USD, invoice in GBP at the default 1.27 rate. 12.20 GBP ≈
        // 15.49 USD against the PO's 15.50 — inside tolerance.
        let mut invoice = inv_doc(
            "INV-2001-1",
            "179.13",
            vec![item("WID-100", "10", "12.20"), item("BLT-050", "25", "2.17")],
        );
        invoice.record.currency = Some("GBP".into());
        invoice.base_total = Some(money("227.50"));
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![invoice],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let results = engine().reconcile_po("PO-2001", &docs);
        assert_eq!(results[0].status, MatchStatus::Match);
        assert_eq!(results[0].total_variance, Some(Money::zero()));
    }

    #[test]
    fn pending_po_without_invoices_yields_nothing() {
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![],
            grns: vec![],
        };
        assert!(engine().reconcile_po("PO-2001", &docs).is_empty());
    }

    #[test]
    fn rerun_on_unchanged_documents_is_stable() {
        let docs = PoDocuments {
            pos: vec![po_doc("227.50", standard_items())],
            invoices: vec![inv_doc("INV-2001-1", "240.00", standard_items())],
            grns: vec![grn_doc(&[("WID-100", "10"), ("BLT-050", "25")])],
        };
        let e = engine();
        let first = e.reconcile_po("PO-2001", &docs);
        let second = e.reconcile_po("PO-2001", &docs);
        assert_eq!(first[0].status, second[0].status);
        assert_eq!(first[0].qty_variances, second[0].qty_variances);
        assert_eq!(first[0].total_variance, second[0].total_variance);
    }
}
