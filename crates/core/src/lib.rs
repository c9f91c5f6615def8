pub mod config;
pub mod document;
pub mod money;
pub mod reconciliation;

pub use config::{ConfigError, ToleranceConfig};
pub use document::{
    DocType, GoodsReceipt, Invoice, ItemLine, PoDocuments, PurchaseOrder, ReceiptLine,
    RecordError, StoredGoodsReceipt, StoredInvoice, StoredPurchaseOrder, StructuredRecord,
};
pub use money::Money;
pub use reconciliation::{MatchStatus, ReconciliationResult};
