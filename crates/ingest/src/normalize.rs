use trimatch_core::{Money, StructuredRecord, ToleranceConfig};

/// A record with monetary values rounded and, where the FX table allows it,
/// a declared total re-expressed in the base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub record: StructuredRecord,
    /// Declared total × rate-to-base; `None` for goods receipts (no total)
    /// and for documents whose currency did not resolve.
    pub base_total: Option<Money>,
    /// True when the document names a currency the FX table does not know.
    /// Comparisons against such a document are skipped and reported, never
    /// silently run at 1:1.
    pub fx_unresolved: bool,
}

/// Round every monetary value half-up to two decimals, validate the currency
/// code against the FX table, and derive the base-currency total.
pub fn normalize(record: StructuredRecord, config: &ToleranceConfig) -> NormalizedRecord {
    let mut record = record;

    let (currency, total) = match &mut record {
        StructuredRecord::PurchaseOrder(po) => {
            for item in &mut po.items {
                item.unit_price = item.unit_price.round_half_up();
            }
            po.total = po.total.map(Money::round_half_up);
            (po.currency.clone(), po.total)
        }
        StructuredRecord::Invoice(inv) => {
            for item in &mut inv.items {
                item.unit_price = item.unit_price.round_half_up();
            }
            inv.total = inv.total.map(Money::round_half_up);
            (inv.currency.clone(), inv.total)
        }
        // Goods receipts carry no money at all.
        StructuredRecord::GoodsReceipt(_) => (None, None),
    };

    let rate = currency.as_deref().and_then(|code| config.rate(code));
    let fx_unresolved = currency.is_some() && rate.is_none();
    let base_total = match (total, rate) {
        (Some(total), Some(rate)) => Some(total.convert(rate)),
        _ => None,
    };

    NormalizedRecord {
        record,
        base_total,
        fx_unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use trimatch_core::{GoodsReceipt, Invoice, ItemLine, PurchaseOrder};

    fn config() -> ToleranceConfig {
        ToleranceConfig::default()
    }

    fn inv(currency: &str, total: &str) -> StructuredRecord {
        StructuredRecord::Invoice(Invoice {
            number: Some("INV-1".into()),
            po_number: Some("PO-1".into()),
            currency: Some(currency.into()),
            total: Some(total.parse().unwrap()),
            ..Default::default()
        })
    }

    #[test]
    fn usd_total_passes_through_at_one() {
        let n = normalize(inv("USD", "227.50"), &config());
        assert_eq!(n.base_total, Some("227.50".parse().unwrap()));
        assert!(!n.fx_unresolved);
    }

    #[test]
    fn foreign_total_is_converted() {
        // 100.00 GBP at the default 1.27 rate.
        let n = normalize(inv("GBP", "100.00"), &config());
        assert_eq!(n.base_total, Some("127.00".parse().unwrap()));
    }

    #[test]
    fn unknown_currency_is_flagged_not_defaulted() {
        let n = normalize(inv("ZWL", "100.00"), &config());
        assert!(n.fx_unresolved);
        assert_eq!(n.base_total, None);
        // Original values survive untouched.
        let StructuredRecord::Invoice(inv) = n.record else {
            panic!("expected invoice");
        };
        assert_eq!(inv.currency.as_deref(), Some("ZWL"));
        assert_eq!(inv.total, Some("100.00".parse().unwrap()));
    }

    #[test]
    fn missing_currency_is_not_an_fx_problem() {
        let rec = StructuredRecord::Invoice(Invoice {
            total: Some("10.00".parse().unwrap()),
            ..Default::default()
        });
        let n = normalize(rec, &config());
        assert!(!n.fx_unresolved); // completeness flags cover this case
        assert_eq!(n.base_total, None);
    }

    #[test]
    fn amounts_round_half_up() {
        let rec = StructuredRecord::PurchaseOrder(PurchaseOrder {
            number: Some("PO-1".into()),
            currency: Some("USD".into()),
            total: Some("10.005".parse().unwrap()),
            items: vec![ItemLine {
                sku: "WID-100".into(),
                description: None,
                qty: Decimal::from(3),
                unit_price: "3.335".parse().unwrap(),
            }],
            ..Default::default()
        });
        let n = normalize(rec, &config());
        let StructuredRecord::PurchaseOrder(po) = n.record else {
            panic!("expected PO");
        };
        assert_eq!(po.total, Some("10.01".parse().unwrap()));
        assert_eq!(po.items[0].unit_price, "3.34".parse().unwrap());
        assert_eq!(n.base_total, Some("10.01".parse().unwrap()));
    }

    #[test]
    fn grn_has_no_monetary_surface() {
        let rec = StructuredRecord::GoodsReceipt(GoodsReceipt {
            number: Some("GRN-1".into()),
            po_number: Some("PO-1".into()),
            ..Default::default()
        });
        let n = normalize(rec, &config());
        assert_eq!(n.base_total, None);
        assert!(!n.fx_unresolved);
    }
}
