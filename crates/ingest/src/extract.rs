use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use trimatch_core::{
    DocType, GoodsReceipt, Invoice, ItemLine, Money, PurchaseOrder, ReceiptLine, StructuredRecord,
};

// ── Compiled header-label cache ──────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_po_number, r"(?im)^\s*PO\s+Number\s*:\s*(.+)$");
re!(re_invoice_number, r"(?im)^\s*Invoice\s+Number\s*:\s*(.+)$");
re!(re_grn_number, r"(?im)^\s*GRN\s+Number\s*:\s*(.+)$");
re!(re_vendor, r"(?im)^\s*Vendor\s*:\s*(.+)$");
re!(re_country, r"(?im)^\s*Country\s*:\s*(.+)$");
re!(re_currency, r"(?im)^\s*Currency\s*:\s*(.+)$");
re!(re_date, r"(?im)^\s*Date\s*:\s*(.+)$");
re!(re_total, r"(?im)^\s*Total\s*:\s*(.+)$");

// ── Public extraction API ────────────────────────────────────────────────────

/// Extract a structured record from classified document text. Fields that
/// fail to parse come back as `None`; nothing here is document-fatal.
/// `Unknown` documents have no grammar and yield no record.
pub fn extract(text: &str, doc_type: DocType) -> Option<StructuredRecord> {
    match doc_type {
        DocType::PurchaseOrder => Some(StructuredRecord::PurchaseOrder(extract_po(text))),
        DocType::Invoice => Some(StructuredRecord::Invoice(extract_invoice(text))),
        DocType::GoodsReceipt => Some(StructuredRecord::GoodsReceipt(extract_grn(text))),
        DocType::Unknown => None,
    }
}

/// Whether the deterministic pass should hand over to the augmentation
/// collaborator: a required header field is missing, or the text plainly
/// carries item markers that the grammar failed to parse.
pub fn needs_augmentation(record: &StructuredRecord, text: &str) -> bool {
    !record.is_complete() || (record.item_count() == 0 && has_item_markers(text))
}

fn extract_po(text: &str) -> PurchaseOrder {
    PurchaseOrder {
        number: header_value(re_po_number(), text),
        vendor: header_value(re_vendor(), text),
        country: header_value(re_country(), text),
        currency: header_value(re_currency(), text),
        date: header_value(re_date(), text).as_deref().and_then(parse_date),
        total: header_value(re_total(), text).as_deref().and_then(parse_money),
        items: priced_items(text),
    }
}

fn extract_invoice(text: &str) -> Invoice {
    Invoice {
        number: header_value(re_invoice_number(), text),
        po_number: header_value(re_po_number(), text),
        vendor: header_value(re_vendor(), text),
        country: header_value(re_country(), text),
        currency: header_value(re_currency(), text),
        date: header_value(re_date(), text).as_deref().and_then(parse_date),
        total: header_value(re_total(), text).as_deref().and_then(parse_money),
        items: priced_items(text),
    }
}

fn extract_grn(text: &str) -> GoodsReceipt {
    GoodsReceipt {
        number: header_value(re_grn_number(), text),
        po_number: header_value(re_po_number(), text),
        vendor: header_value(re_vendor(), text),
        country: header_value(re_country(), text),
        date: header_value(re_date(), text).as_deref().and_then(parse_date),
        items: receipt_items(text),
    }
}

// ── Header grammar ───────────────────────────────────────────────────────────

fn header_value(re: &Regex, text: &str) -> Option<String> {
    let value = re.captures(text)?.get(1)?.as_str().trim();
    // A pipe means the label sat inside an item line, not a header.
    if value.is_empty() || value.contains('|') {
        return None;
    }
    Some(value.to_string())
}

// ── Item grammar ─────────────────────────────────────────────────────────────
// An item line is a leading `-` marker followed by pipe-separated
// `Key: value` pairs. Keys are matched case-insensitively.

fn item_pairs(line: &str) -> Option<BTreeMap<String, String>> {
    let rest = line.trim().strip_prefix('-')?;
    let mut pairs = BTreeMap::new();
    for field in rest.split('|') {
        let (key, value) = field.split_once(':')?;
        pairs.insert(key.trim().to_lowercase(), value.trim().to_string());
    }
    Some(pairs)
}

/// PO/Invoice items: `SKU | Description | Qty | Unit Price`. A line whose
/// quantity or price fails to parse is dropped, not partially kept. SKU is
/// unique within a document; a repeated SKU keeps the last occurrence.
fn priced_items(text: &str) -> Vec<ItemLine> {
    let mut by_sku = BTreeMap::new();
    for line in text.lines() {
        let Some(pairs) = item_pairs(line) else {
            continue;
        };
        let Some(sku) = pairs.get("sku").filter(|s| !s.is_empty()) else {
            continue;
        };
        let Some(qty) = pairs.get("qty").and_then(|v| parse_qty(v)) else {
            continue;
        };
        let Some(unit_price) = pairs.get("unit price").and_then(|v| parse_money(v)) else {
            continue;
        };
        by_sku.insert(
            sku.clone(),
            ItemLine {
                sku: sku.clone(),
                description: pairs.get("description").filter(|d| !d.is_empty()).cloned(),
                qty,
                unit_price,
            },
        );
    }
    by_sku.into_values().collect()
}

/// GRN items: `SKU | Qty` — delivery notes carry no pricing.
fn receipt_items(text: &str) -> Vec<ReceiptLine> {
    let mut by_sku = BTreeMap::new();
    for line in text.lines() {
        let Some(pairs) = item_pairs(line) else {
            continue;
        };
        let Some(sku) = pairs.get("sku").filter(|s| !s.is_empty()) else {
            continue;
        };
        let Some(qty) = pairs.get("qty").and_then(|v| parse_qty(v)) else {
            continue;
        };
        by_sku.insert(
            sku.clone(),
            ReceiptLine {
                sku: sku.clone(),
                qty,
            },
        );
    }
    by_sku.into_values().collect()
}

fn has_item_markers(text: &str) -> bool {
    text.to_lowercase().contains("sku:")
}

// ── Field parsing ────────────────────────────────────────────────────────────

fn parse_money(raw: &str) -> Option<Money> {
    // Plain decimal notation; a stray thousands comma is tolerated.
    let clean = raw.replace(',', "");
    Money::from_str(clean.trim())
        .ok()
        .filter(|m| !m.is_negative())
}

fn parse_qty(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|q| !q.is_sign_negative())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

// ── Tests ────────────────────────────────────────────────────────────────────
