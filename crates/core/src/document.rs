use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    #[serde(rename = "PO")]
    PurchaseOrder,
    Invoice,
    #[serde(rename = "GRN")]
    GoodsReceipt,
    Unknown,
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocType::PurchaseOrder => write!(f, "PO"),
            DocType::Invoice => write!(f, "INVOICE"),
            DocType::GoodsReceipt => write!(f, "GRN"),
            DocType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PO" => Ok(DocType::PurchaseOrder),
            "INVOICE" => Ok(DocType::Invoice),
            "GRN" => Ok(DocType::GoodsReceipt),
            "UNKNOWN" => Ok(DocType::Unknown),
            other => Err(format!("Unknown document type: '{other}'")),
        }
    }
}

/// A priced line item as it appears on purchase orders and invoices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLine {
    pub sku: String,
    pub description: Option<String>,
    pub qty: Decimal,
    pub unit_price: Money,
}

/// A goods-receipt line: delivery notes record what arrived, not what it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub sku: String,
    pub qty: Decimal,
}

/// Header + items for a purchase order. Every header field is optional:
/// extraction records what it could not read as an explicit `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub number: Option<String>,
    pub vendor: Option<String>,
    pub country: Option<String>,
    pub currency: Option<String>,
    pub date: Option<NaiveDate>,
    pub total: Option<Money>,
    #[serde(default)]
    pub items: Vec<ItemLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub number: Option<String>,
    pub po_number: Option<String>,
    pub vendor: Option<String>,
    pub country: Option<String>,
    pub currency: Option<String>,
    pub date: Option<NaiveDate>,
    pub total: Option<Money>,
    #[serde(default)]
    pub items: Vec<ItemLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodsReceipt {
    pub number: Option<String>,
    pub po_number: Option<String>,
    pub vendor: Option<String>,
    pub country: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub items: Vec<ReceiptLine>,
}

impl PurchaseOrder {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.number.is_none() {
            missing.push("po_number");
        }
        if self.currency.is_none() {
            missing.push("currency");
        }
        if self.total.is_none() {
            missing.push("total");
        }
        missing
    }
}

impl Invoice {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.number.is_none() {
            missing.push("invoice_number");
        }
        if self.po_number.is_none() {
            missing.push("po_number");
        }
        if self.currency.is_none() {
            missing.push("currency");
        }
        if self.total.is_none() {
            missing.push("total");
        }
        missing
    }
}

impl GoodsReceipt {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.number.is_none() {
            missing.push("grn_number");
        }
        if self.po_number.is_none() {
            missing.push("po_number");
        }
        missing
    }
}

/// Structural problems in a record, typically from an augmentation response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("negative quantity on SKU '{0}'")]
    NegativeQty(String),
    #[error("negative unit price on SKU '{0}'")]
    NegativePrice(String),
    #[error("SKU '{0}' appears more than once")]
    DuplicateSku(String),
}

/// The tagged extraction result: one variant per procurement document kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StructuredRecord {
    #[serde(rename = "PO")]
    PurchaseOrder(PurchaseOrder),
    #[serde(rename = "INVOICE")]
    Invoice(Invoice),
    #[serde(rename = "GRN")]
    GoodsReceipt(GoodsReceipt),
}

impl StructuredRecord {
    pub fn doc_type(&self) -> DocType {
        match self {
            StructuredRecord::PurchaseOrder(_) => DocType::PurchaseOrder,
            StructuredRecord::Invoice(_) => DocType::Invoice,
            StructuredRecord::GoodsReceipt(_) => DocType::GoodsReceipt,
        }
    }

    /// The PO grouping key: a PO's own number, or the foreign key carried by
    /// invoices and goods receipts.
    pub fn po_number(&self) -> Option<&str> {
        match self {
            StructuredRecord::PurchaseOrder(po) => po.number.as_deref(),
            StructuredRecord::Invoice(inv) => inv.po_number.as_deref(),
            StructuredRecord::GoodsReceipt(grn) => grn.po_number.as_deref(),
        }
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        match self {
            StructuredRecord::PurchaseOrder(po) => po.missing_fields(),
            StructuredRecord::Invoice(inv) => inv.missing_fields(),
            StructuredRecord::GoodsReceipt(grn) => grn.missing_fields(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn item_count(&self) -> usize {
        match self {
            StructuredRecord::PurchaseOrder(po) => po.items.len(),
            StructuredRecord::Invoice(inv) => inv.items.len(),
            StructuredRecord::GoodsReceipt(grn) => grn.items.len(),
        }
    }

    /// Check the line-item invariants: non-negative quantities and prices,
    /// SKU unique within the document.
    pub fn validate(&self) -> Result<(), RecordError> {
        fn check<'a>(
            lines: impl Iterator<Item = (&'a str, Decimal, Option<Money>)>,
        ) -> Result<(), RecordError> {
            let mut seen = BTreeSet::new();
            for (sku, qty, price) in lines {
                if qty.is_sign_negative() && !qty.is_zero() {
                    return Err(RecordError::NegativeQty(sku.to_string()));
                }
                if price.is_some_and(Money::is_negative) {
                    return Err(RecordError::NegativePrice(sku.to_string()));
                }
                if !seen.insert(sku.to_string()) {
                    return Err(RecordError::DuplicateSku(sku.to_string()));
                }
            }
            Ok(())
        }

        match self {
            StructuredRecord::PurchaseOrder(PurchaseOrder { items, .. })
            | StructuredRecord::Invoice(Invoice { items, .. }) => check(
                items
                    .iter()
                    .map(|l| (l.sku.as_str(), l.qty, Some(l.unit_price))),
            ),
            StructuredRecord::GoodsReceipt(grn) => {
                check(grn.items.iter().map(|l| (l.sku.as_str(), l.qty, None)))
            }
        }
    }
}

// ── Store-facing views ────────────────────────────────────────────────────────
// The reconcile engine works on these; it never sees the database.

#[derive(Debug, Clone)]
pub struct StoredPurchaseOrder {
    pub fingerprint: String,
    pub record: PurchaseOrder,
    /// Declared total converted to the base currency, when the FX rate resolved.
    pub base_total: Option<Money>,
    pub fx_unresolved: bool,
}

#[derive(Debug, Clone)]
pub struct StoredInvoice {
    pub fingerprint: String,
    pub record: Invoice,
    pub base_total: Option<Money>,
    pub fx_unresolved: bool,
}

#[derive(Debug, Clone)]
pub struct StoredGoodsReceipt {
    pub fingerprint: String,
    pub record: GoodsReceipt,
}

/// Everything the store holds for one PO number. Invoices are in ingestion
/// order — duplicate-submission detection depends on it.
#[derive(Debug, Clone, Default)]
pub struct PoDocuments {
    pub pos: Vec<StoredPurchaseOrder>,
    pub invoices: Vec<StoredInvoice>,
    pub grns: Vec<StoredGoodsReceipt>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn qty(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item(sku: &str, q: &str, price: &str) -> ItemLine {
        ItemLine {
            sku: sku.to_string(),
            description: None,
            qty: qty(q),
            unit_price: price.parse().unwrap(),
        }
    }

    #[test]
    fn doc_type_roundtrip() {
        for t in [
            DocType::PurchaseOrder,
            DocType::Invoice,
            DocType::GoodsReceipt,
            DocType::Unknown,
        ] {
            assert_eq!(DocType::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn po_missing_fields() {
        let po = PurchaseOrder {
            number: Some("PO-1000".into()),
            currency: Some("USD".into()),
            ..Default::default()
        };
        assert_eq!(po.missing_fields(), vec!["total"]);
    }

    #[test]
    fn invoice_requires_po_reference() {
        let inv = Invoice {
            number: Some("INV-1000-1".into()),
            currency: Some("USD".into()),
            total: Some("10.00".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(inv.missing_fields(), vec!["po_number"]);
    }

    #[test]
    fn grn_requires_only_numbers() {
        let grn = GoodsReceipt {
            number: Some("GRN-1000".into()),
            po_number: Some("PO-1000".into()),
            ..Default::default()
        };
        assert!(StructuredRecord::GoodsReceipt(grn).is_complete());
    }

    #[test]
    fn record_serde_tag() {
        let rec = StructuredRecord::Invoice(Invoice {
            number: Some("INV-1".into()),
            ..Default::default()
        });
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains(r#""type":"INVOICE""#));
        let back: StructuredRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn validate_rejects_duplicate_sku() {
        let rec = StructuredRecord::PurchaseOrder(PurchaseOrder {
            items: vec![item("WID-100", "5", "1.00"), item("WID-100", "3", "1.00")],
            ..Default::default()
        });
        assert_eq!(
            rec.validate(),
            Err(RecordError::DuplicateSku("WID-100".into()))
        );
    }

    #[test]
    fn validate_rejects_negative_qty() {
        let rec = StructuredRecord::GoodsReceipt(GoodsReceipt {
            items: vec![ReceiptLine {
                sku: "BLT-050".into(),
                qty: qty("-1"),
            }],
            ..Default::default()
        });
        assert_eq!(rec.validate(), Err(RecordError::NegativeQty("BLT-050".into())));
    }

    #[test]
    fn po_number_key_per_kind() {
        let po = StructuredRecord::PurchaseOrder(PurchaseOrder {
            number: Some("PO-7".into()),
            ..Default::default()
        });
        let inv = StructuredRecord::Invoice(Invoice {
            number: Some("INV-7".into()),
            po_number: Some("PO-7".into()),
            ..Default::default()
        });
        assert_eq!(po.po_number(), Some("PO-7"));
        assert_eq!(inv.po_number(), Some("PO-7"));
    }
}
