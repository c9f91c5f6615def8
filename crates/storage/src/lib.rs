pub mod db;

pub use db::{
    all_results, audit_for_invoice, count_documents_by_type, create_db, document_exists,
    documents_for_po, exceptions_report, list_documents_by_type, po_numbers, put_if_absent,
    replace_reconciliation_results, stored_invoices, AuditRecord, DbPool, DocumentRecord,
    ExceptionRow, IngestDisposition, StorageError,
};
