use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;

use trimatch_core::{
    DocType, GoodsReceipt, Invoice, ItemLine, MatchStatus, Money, PoDocuments, PurchaseOrder,
    ReceiptLine, ReconciliationResult, StoredGoodsReceipt, StoredInvoice, StoredPurchaseOrder,
    StructuredRecord,
};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Outcome of the dedup gate: a `Duplicate` is a success, not an error —
/// the caller logs it and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestDisposition {
    Created,
    Duplicate,
}

/// One stored document: the raw text, its fingerprint identity, and the
/// structured record attached after extraction. Immutable once created.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub fingerprint: String,
    pub source_ref: String,
    pub raw_text: String,
    pub doc_type: DocType,
    pub record: Option<StructuredRecord>,
    pub base_total: Option<Money>,
    pub extraction_incomplete: bool,
    pub fx_unresolved: bool,
    pub ingested_at: DateTime<Utc>,
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            fingerprint TEXT PRIMARY KEY,
            source_ref TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            parsed_json TEXT,
            base_total TEXT,
            extraction_incomplete INTEGER NOT NULL DEFAULT 0,
            fx_unresolved INTEGER NOT NULL DEFAULT 0,
            ingested_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS purchase_orders (
            po_number TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            vendor TEXT,
            country TEXT,
            currency TEXT,
            order_date TEXT,
            total_amount TEXT,
            base_total TEXT,
            FOREIGN KEY (fingerprint) REFERENCES documents(fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS po_lines (
            po_number TEXT NOT NULL,
            sku TEXT NOT NULL,
            description TEXT,
            qty TEXT NOT NULL,
            unit_price TEXT NOT NULL,
            PRIMARY KEY (po_number, sku),
            FOREIGN KEY (po_number) REFERENCES purchase_orders(po_number) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            fingerprint TEXT PRIMARY KEY,
            invoice_number TEXT NOT NULL,
            po_number TEXT NOT NULL,
            vendor TEXT,
            country TEXT,
            currency TEXT,
            invoice_date TEXT,
            total_amount TEXT,
            base_total TEXT,
            FOREIGN KEY (fingerprint) REFERENCES documents(fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_lines (
            invoice_fingerprint TEXT NOT NULL,
            sku TEXT NOT NULL,
            description TEXT,
            qty TEXT NOT NULL,
            unit_price TEXT NOT NULL,
            PRIMARY KEY (invoice_fingerprint, sku),
            FOREIGN KEY (invoice_fingerprint) REFERENCES invoices(fingerprint) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS grns (
            fingerprint TEXT PRIMARY KEY,
            grn_number TEXT NOT NULL,
            po_number TEXT NOT NULL,
            vendor TEXT,
            country TEXT,
            grn_date TEXT,
            FOREIGN KEY (fingerprint) REFERENCES documents(fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS grn_lines (
            grn_fingerprint TEXT NOT NULL,
            sku TEXT NOT NULL,
            qty TEXT NOT NULL,
            PRIMARY KEY (grn_fingerprint, sku),
            FOREIGN KEY (grn_fingerprint) REFERENCES grns(fingerprint) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation (
            po_number TEXT NOT NULL,
            invoice_fingerprint TEXT NOT NULL,
            invoice_number TEXT,
            status TEXT NOT NULL,
            qty_variances TEXT NOT NULL,
            price_variances TEXT NOT NULL,
            total_variance TEXT,
            fx_gap INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL,
            PRIMARY KEY (po_number, invoice_fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_invoices_po ON invoices(po_number)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_grns_po ON grns(po_number)")
        .execute(pool)
        .await?;

    Ok(())
}

// ── Dedup gate ────────────────────────────────────────────────────────────────

pub async fn document_exists(pool: &DbPool, fingerprint: &str) -> Result<bool, StorageError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM documents WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

/// Atomic check-and-insert on the fingerprint key. Two workers racing on the
/// same content cannot create two documents: the conflict clause makes the
/// second insert a no-op and the caller sees `Duplicate`. Complete records
/// fan out into the typed tables in the same transaction.
pub async fn put_if_absent(
    pool: &DbPool,
    doc: &DocumentRecord,
) -> Result<IngestDisposition, StorageError> {
    let parsed_json = doc
        .record
        .as_ref()
        .map(|r| serde_json::to_string(r).map_err(|e| StorageError::Corrupt(e.to_string())))
        .transpose()?;

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO documents
            (fingerprint, source_ref, raw_text, doc_type, parsed_json, base_total,
             extraction_incomplete, fx_unresolved, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fingerprint) DO NOTHING
        "#,
    )
    .bind(&doc.fingerprint)
    .bind(&doc.source_ref)
    .bind(&doc.raw_text)
    .bind(doc.doc_type.to_string())
    .bind(&parsed_json)
    .bind(doc.base_total.map(|m| m.to_string()))
    .bind(doc.extraction_incomplete as i64)
    .bind(doc.fx_unresolved as i64)
    .bind(doc.ingested_at.to_rfc3339())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted == 0 {
        tx.rollback().await?;
        return Ok(IngestDisposition::Duplicate);
    }

    // Incomplete records stay in the audit table only; the typed tables feed
    // reconciliation and must hold complete documents.
    if !doc.extraction_incomplete {
        if let Some(record) = &doc.record {
            fan_out_structured(&mut tx, doc, record).await?;
        }
    }

    tx.commit().await?;
    Ok(IngestDisposition::Created)
}

async fn fan_out_structured(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    doc: &DocumentRecord,
    record: &StructuredRecord,
) -> Result<(), StorageError> {
    match record {
        StructuredRecord::PurchaseOrder(po) => {
            // PO numbers are globally unique; a second document claiming the
            // same number does not displace the first.
            let inserted = sqlx::query(
                r#"
                INSERT INTO purchase_orders
                    (po_number, fingerprint, vendor, country, currency, order_date,
                     total_amount, base_total)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(po_number) DO NOTHING
                "#,
            )
            .bind(&po.number)
            .bind(&doc.fingerprint)
            .bind(&po.vendor)
            .bind(&po.country)
            .bind(&po.currency)
            .bind(po.date.map(|d| d.to_string()))
            .bind(po.total.map(|m| m.to_string()))
            .bind(doc.base_total.map(|m| m.to_string()))
            .execute(&mut **tx)
            .await?
            .rows_affected();

            if inserted > 0 {
                for line in &po.items {
                    sqlx::query(
                        "INSERT OR REPLACE INTO po_lines (po_number, sku, description, qty, unit_price) VALUES (?, ?, ?, ?, ?)"
                    )
                    .bind(&po.number)
                    .bind(&line.sku)
                    .bind(&line.description)
                    .bind(line.qty.to_string())
                    .bind(line.unit_price.to_string())
                    .execute(&mut **tx)
                    .await?;
                }
            }
        }
        StructuredRecord::Invoice(inv) => {
            sqlx::query(
                r#"
                INSERT INTO invoices
                    (fingerprint, invoice_number, po_number, vendor, country, currency,
                     invoice_date, total_amount, base_total)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.fingerprint)
            .bind(&inv.number)
            .bind(&inv.po_number)
            .bind(&inv.vendor)
            .bind(&inv.country)
            .bind(&inv.currency)
            .bind(inv.date.map(|d| d.to_string()))
            .bind(inv.total.map(|m| m.to_string()))
            .bind(doc.base_total.map(|m| m.to_string()))
            .execute(&mut **tx)
            .await?;

            for line in &inv.items {
                sqlx::query(
                    "INSERT OR REPLACE INTO invoice_lines (invoice_fingerprint, sku, description, qty, unit_price) VALUES (?, ?, ?, ?, ?)"
                )
                .bind(&doc.fingerprint)
                .bind(&line.sku)
                .bind(&line.description)
                .bind(line.qty.to_string())
                .bind(line.unit_price.to_string())
                .execute(&mut **tx)
                .await?;
            }
        }
        StructuredRecord::GoodsReceipt(grn) => {
            sqlx::query(
                r#"
                INSERT INTO grns (fingerprint, grn_number, po_number, vendor, country, grn_date)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.fingerprint)
            .bind(&grn.number)
            .bind(&grn.po_number)
            .bind(&grn.vendor)
            .bind(&grn.country)
            .bind(grn.date.map(|d| d.to_string()))
            .execute(&mut **tx)
            .await?;

            for line in &grn.items {
                sqlx::query(
                    "INSERT OR REPLACE INTO grn_lines (grn_fingerprint, sku, qty) VALUES (?, ?, ?)",
                )
                .bind(&doc.fingerprint)
                .bind(&line.sku)
                .bind(line.qty.to_string())
                .execute(&mut **tx)
                .await?;
            }
        }
    }
    Ok(())
}

// ── Document queries ─────────────────────────────────────────────────────────

pub async fn count_documents_by_type(
    pool: &DbPool,
) -> Result<BTreeMap<String, i64>, StorageError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT doc_type, COUNT(*) FROM documents GROUP BY doc_type")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

pub async fn list_documents_by_type(
    pool: &DbPool,
    doc_type: DocType,
) -> Result<Vec<DocumentRecord>, StorageError> {
    let rows: Vec<(String, String, String, String, Option<String>, Option<String>, i64, i64, String)> =
        sqlx::query_as(
            r#"
            SELECT fingerprint, source_ref, raw_text, doc_type, parsed_json, base_total,
                   extraction_incomplete, fx_unresolved, ingested_at
            FROM documents WHERE doc_type = ? ORDER BY rowid
            "#,
        )
        .bind(doc_type.to_string())
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(document_from_row).collect()
}

#[allow(clippy::type_complexity)]
fn document_from_row(
    row: (String, String, String, String, Option<String>, Option<String>, i64, i64, String),
) -> Result<DocumentRecord, StorageError> {
    let (fingerprint, source_ref, raw_text, doc_type, parsed_json, base_total, incomplete, fx, at) =
        row;
    Ok(DocumentRecord {
        fingerprint,
        source_ref,
        raw_text,
        doc_type: DocType::from_str(&doc_type).map_err(StorageError::Corrupt)?,
        record: parsed_json
            .map(|j| serde_json::from_str(&j).map_err(|e| StorageError::Corrupt(e.to_string())))
            .transpose()?,
        base_total: base_total.as_deref().map(parse_money).transpose()?,
        extraction_incomplete: incomplete != 0,
        fx_unresolved: fx != 0,
        ingested_at: parse_timestamp(&at)?,
    })
}

/// All PO numbers with anything attached to them — orders, invoices, or
/// receipts. Each is an independent reconciliation shard.
pub async fn po_numbers(pool: &DbPool) -> Result<Vec<String>, StorageError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT po_number FROM purchase_orders
        UNION SELECT po_number FROM invoices
        UNION SELECT po_number FROM grns
        ORDER BY po_number
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(n,)| n).collect())
}

/// Everything stored under one PO number. Invoices come back in ingestion
/// order; duplicate-submission detection relies on it.
pub async fn documents_for_po(
    pool: &DbPool,
    po_number: &str,
) -> Result<PoDocuments, StorageError> {
    let mut docs = PoDocuments::default();

    let po_rows: Vec<(String, String, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, i64)> =
        sqlx::query_as(
            r#"
            SELECT p.po_number, p.fingerprint, p.vendor, p.country, p.currency,
                   p.order_date, p.total_amount, p.base_total, d.fx_unresolved
            FROM purchase_orders p
            JOIN documents d ON d.fingerprint = p.fingerprint
            WHERE p.po_number = ?
            "#,
        )
        .bind(po_number)
        .fetch_all(pool)
        .await?;

    for (number, fingerprint, vendor, country, currency, date, total, base_total, fx) in po_rows {
        let lines: Vec<(String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT sku, description, qty, unit_price FROM po_lines WHERE po_number = ? ORDER BY sku",
        )
        .bind(&number)
        .fetch_all(pool)
        .await?;
        docs.pos.push(StoredPurchaseOrder {
            fingerprint,
            record: PurchaseOrder {
                number: Some(number),
                vendor,
                country,
                currency,
                date: date.as_deref().map(parse_date).transpose()?,
                total: total.as_deref().map(parse_money).transpose()?,
                items: item_lines(lines)?,
            },
            base_total: base_total.as_deref().map(parse_money).transpose()?,
            fx_unresolved: fx != 0,
        });
    }

    let invoice_rows: Vec<(String, String, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, i64)> =
        sqlx::query_as(
            r#"
            SELECT i.fingerprint, i.invoice_number, i.vendor, i.country, i.currency,
                   i.invoice_date, i.total_amount, i.base_total, d.fx_unresolved
            FROM invoices i
            JOIN documents d ON d.fingerprint = i.fingerprint
            WHERE i.po_number = ?
            ORDER BY i.rowid
            "#,
        )
        .bind(po_number)
        .fetch_all(pool)
        .await?;

    for (fingerprint, number, vendor, country, currency, date, total, base_total, fx) in
        invoice_rows
    {
        let lines: Vec<(String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT sku, description, qty, unit_price FROM invoice_lines WHERE invoice_fingerprint = ? ORDER BY sku",
        )
        .bind(&fingerprint)
        .fetch_all(pool)
        .await?;
        docs.invoices.push(StoredInvoice {
            record: Invoice {
                number: Some(number),
                po_number: Some(po_number.to_string()),
                vendor,
                country,
                currency,
                date: date.as_deref().map(parse_date).transpose()?,
                total: total.as_deref().map(parse_money).transpose()?,
                items: item_lines(lines)?,
            },
            fingerprint,
            base_total: base_total.as_deref().map(parse_money).transpose()?,
            fx_unresolved: fx != 0,
        });
    }

    let grn_rows: Vec<(String, String, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            r#"
            SELECT fingerprint, grn_number, vendor, country, grn_date
            FROM grns WHERE po_number = ? ORDER BY rowid
            "#,
        )
        .bind(po_number)
        .fetch_all(pool)
        .await?;

    for (fingerprint, number, vendor, country, date) in grn_rows {
        let lines: Vec<(String, String)> = sqlx::query_as(
            "SELECT sku, qty FROM grn_lines WHERE grn_fingerprint = ? ORDER BY sku",
        )
        .bind(&fingerprint)
        .fetch_all(pool)
        .await?;
        docs.grns.push(StoredGoodsReceipt {
            record: GoodsReceipt {
                number: Some(number),
                po_number: Some(po_number.to_string()),
                vendor,
                country,
                date: date.as_deref().map(parse_date).transpose()?,
                items: lines
                    .into_iter()
                    .map(|(sku, qty)| {
                        Ok(ReceiptLine {
                            sku,
                            qty: parse_decimal(&qty)?,
                        })
                    })
                    .collect::<Result<Vec<_>, StorageError>>()?,
            },
            fingerprint,
        });
    }

    Ok(docs)
}

/// All complete invoices in the store, in ingestion order.
pub async fn stored_invoices(pool: &DbPool) -> Result<Vec<StoredInvoice>, StorageError> {
    let rows: Vec<(String, String, String, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, i64)> =
        sqlx::query_as(
            r#"
            SELECT i.fingerprint, i.invoice_number, i.po_number, i.vendor, i.country,
                   i.currency, i.invoice_date, i.total_amount, i.base_total, d.fx_unresolved
            FROM invoices i
            JOIN documents d ON d.fingerprint = i.fingerprint
            ORDER BY i.rowid
            "#,
        )
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(
            |(fingerprint, number, po_number, vendor, country, currency, date, total, base, fx)| {
                Ok(StoredInvoice {
                    fingerprint,
                    record: Invoice {
                        number: Some(number),
                        po_number: Some(po_number),
                        vendor,
                        country,
                        currency,
                        date: date.as_deref().map(parse_date).transpose()?,
                        total: total.as_deref().map(parse_money).transpose()?,
                        items: Vec::new(),
                    },
                    base_total: base.as_deref().map(parse_money).transpose()?,
                    fx_unresolved: fx != 0,
                })
            },
        )
        .collect()
}

// ── Reconciliation results ───────────────────────────────────────────────────

/// Replace the results for one PO wholesale. Reconciliation is a
/// re-derivation; stale rows from earlier runs must not linger.
pub async fn replace_reconciliation_results(
    pool: &DbPool,
    po_number: &str,
    results: &[ReconciliationResult],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM reconciliation WHERE po_number = ?")
        .bind(po_number)
        .execute(&mut *tx)
        .await?;

    for result in results {
        let qty_json = serde_json::to_string(&result.qty_variances)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let price_json = serde_json::to_string(&result.price_variances)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO reconciliation
                (po_number, invoice_fingerprint, invoice_number, status,
                 qty_variances, price_variances, total_variance, fx_gap, generated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.po_number)
        .bind(&result.invoice_fingerprint)
        .bind(&result.invoice_number)
        .bind(result.status.to_string())
        .bind(qty_json)
        .bind(price_json)
        .bind(result.total_variance.map(|m| m.to_string()))
        .bind(result.fx_gap as i64)
        .bind(result.generated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn all_results(pool: &DbPool) -> Result<Vec<ReconciliationResult>, StorageError> {
    let rows = fetch_results(pool, None).await?;
    Ok(rows)
}

async fn fetch_results(
    pool: &DbPool,
    invoice_fingerprint: Option<&str>,
) -> Result<Vec<ReconciliationResult>, StorageError> {
    let base = r#"
        SELECT po_number, invoice_fingerprint, invoice_number, status,
               qty_variances, price_variances, total_variance, fx_gap, generated_at
        FROM reconciliation
    "#;
    let rows: Vec<(String, String, Option<String>, String, String, String, Option<String>, i64, String)> =
        match invoice_fingerprint {
            Some(fp) => {
                sqlx::query_as(&format!("{base} WHERE invoice_fingerprint = ? ORDER BY po_number"))
                    .bind(fp)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                sqlx::query_as(&format!("{base} ORDER BY po_number, rowid"))
                    .fetch_all(pool)
                    .await?
            }
        };

    rows.into_iter()
        .map(
            |(po, fp, number, status, qty_json, price_json, total, fx_gap, at)| {
                Ok(ReconciliationResult {
                    po_number: po,
                    invoice_number: number,
                    invoice_fingerprint: fp,
                    status: MatchStatus::from_str(&status).map_err(StorageError::Corrupt)?,
                    qty_variances: serde_json::from_str(&qty_json)
                        .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                    price_variances: serde_json::from_str(&price_json)
                        .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                    total_variance: total.as_deref().map(parse_money).transpose()?,
                    fx_gap: fx_gap != 0,
                    generated_at: parse_timestamp(&at)?,
                })
            },
        )
        .collect()
}

/// One row of the exceptions report: a non-MATCH result joined with the
/// invoice header it judged.
#[derive(Debug, Clone)]
pub struct ExceptionRow {
    pub invoice_number: Option<String>,
    pub po_number: String,
    pub vendor: Option<String>,
    pub country: Option<String>,
    pub status: MatchStatus,
    pub total_variance: Option<Money>,
    pub fx_gap: bool,
    pub invoice_total: Option<Money>,
    pub currency: Option<String>,
    pub invoice_date: Option<NaiveDate>,
}

pub async fn exceptions_report(pool: &DbPool) -> Result<Vec<ExceptionRow>, StorageError> {
    let rows: Vec<(Option<String>, String, Option<String>, Option<String>, String, Option<String>, i64, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            r#"
            SELECT r.invoice_number, r.po_number, i.vendor, i.country, r.status,
                   r.total_variance, r.fx_gap, i.total_amount, i.currency, i.invoice_date
            FROM reconciliation r
            JOIN invoices i ON i.fingerprint = r.invoice_fingerprint
            WHERE r.status <> 'MATCH'
            ORDER BY i.invoice_date DESC
            "#,
        )
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(
            |(number, po, vendor, country, status, variance, fx_gap, total, currency, date)| {
                Ok(ExceptionRow {
                    invoice_number: number,
                    po_number: po,
                    vendor,
                    country,
                    status: MatchStatus::from_str(&status).map_err(StorageError::Corrupt)?,
                    total_variance: variance.as_deref().map(parse_money).transpose()?,
                    fx_gap: fx_gap != 0,
                    invoice_total: total.as_deref().map(parse_money).transpose()?,
                    currency,
                    invoice_date: date.as_deref().map(parse_date).transpose()?,
                })
            },
        )
        .collect()
}

// ── Audit trail ──────────────────────────────────────────────────────────────

/// The full `source_ref → raw_text → structured record → results` chain for
/// one invoice submission.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub fingerprint: String,
    pub source_ref: String,
    pub raw_text: String,
    pub record: Option<StructuredRecord>,
    pub ingested_at: DateTime<Utc>,
    pub results: Vec<ReconciliationResult>,
}

/// Every stored submission carrying this invoice number, oldest first.
/// Resubmissions share a number but not a fingerprint, so each gets its own
/// audit chain.
pub async fn audit_for_invoice(
    pool: &DbPool,
    invoice_number: &str,
) -> Result<Vec<AuditRecord>, StorageError> {
    let rows: Vec<(String, String, String, Option<String>, String)> = sqlx::query_as(
        r#"
        SELECT d.fingerprint, d.source_ref, d.raw_text, d.parsed_json, d.ingested_at
        FROM invoices i
        JOIN documents d ON d.fingerprint = i.fingerprint
        WHERE i.invoice_number = ?
        ORDER BY i.rowid
        "#,
    )
    .bind(invoice_number)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for (fingerprint, source_ref, raw_text, parsed_json, at) in rows {
        let results = fetch_results(pool, Some(&fingerprint)).await?;
        records.push(AuditRecord {
            source_ref,
            raw_text,
            record: parsed_json
                .map(|j| serde_json::from_str(&j).map_err(|e| StorageError::Corrupt(e.to_string())))
                .transpose()?,
            ingested_at: parse_timestamp(&at)?,
            results,
            fingerprint,
        });
    }
    Ok(records)
}

// ── Stored-value parsing ─────────────────────────────────────────────────────

fn parse_decimal(raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw)
        .map_err(|e| StorageError::Corrupt(format!("decimal '{raw}': {e}")))
}

fn parse_money(raw: &str) -> Result<Money, StorageError> {
    parse_decimal(raw).map(Money::new)
}

fn parse_date(raw: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::from_str(raw).map_err(|e| StorageError::Corrupt(format!("date '{raw}': {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{raw}': {e}")))
}

fn item_lines(
    rows: Vec<(String, Option<String>, String, String)>,
) -> Result<Vec<ItemLine>, StorageError> {
    rows.into_iter()
        .map(|(sku, description, qty, unit_price)| {
            Ok(ItemLine {
                sku,
                description,
                qty: parse_decimal(&qty)?,
                unit_price: parse_money(&unit_price)?,
            })
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
