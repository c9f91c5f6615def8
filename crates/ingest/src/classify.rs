use trimatch_core::DocType;

// Checked most-specific first: goods-receipt notes routinely cross-reference
// the invoice and PO numbers they settle, so their rarer vocabulary must win
// before the broader invoice/PO keywords get a look.
const GRN_KEYWORDS: &[&str] = &["goods receipt", "grn", "received qty"];
const INVOICE_KEYWORDS: &[&str] = &["invoice number", "invoice"];
const PO_KEYWORDS: &[&str] = &["purchase order", "po number"];

/// Map raw document text to its kind via case-insensitive keyword search.
/// Returns `Unknown` when no keyword set matches; such documents are stored
/// for audit but excluded from extraction and reconciliation.
pub fn classify(text: &str) -> DocType {
    let t = text.to_lowercase();
    if GRN_KEYWORDS.iter().any(|k| t.contains(k)) {
        return DocType::GoodsReceipt;
    }
    if INVOICE_KEYWORDS.iter().any(|k| t.contains(k)) {
        return DocType::Invoice;
    }
    if PO_KEYWORDS.iter().any(|k| t.contains(k)) {
        return DocType::PurchaseOrder;
    }
    DocType::Unknown
}
