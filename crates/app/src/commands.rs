use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use trimatch_core::DocType;
use trimatch_ingest::{
    fingerprint_bytes, spawn_intake_watcher, AugmentBackend, IntakeOutcome, IntakePipeline,
};
use trimatch_reconcile::{kpis, vendor_summary, ReconcileEngine};
use trimatch_storage::{DbPool, DocumentRecord, IngestDisposition};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub ingested: usize,
    pub duplicates: usize,
    pub unknown: usize,
    pub incomplete: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Ingest every `.txt` document under `folder`. Scanning is sorted for
/// deterministic logs; the per-document pipeline work fans out across tasks.
/// Per-document failures are counted and skipped — only a store failure
/// aborts the batch, and the caller retries the whole folder (ingestion is
/// idempotent, so that is safe).
pub async fn ingest_folder<A: AugmentBackend + 'static>(
    db: &DbPool,
    pipeline: Arc<IntakePipeline<A>>,
    folder: &Path,
) -> anyhow::Result<IngestStats> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)
        .with_context(|| format!("reading folder {}", folder.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut stats = IngestStats::default();
    let mut tasks: JoinSet<IntakeOutcome> = JoinSet::new();

    for path in paths {
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            debug!(path = %path.display(), "skipping unsupported file type");
            stats.skipped += 1;
            continue;
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable file");
                stats.errors += 1;
                continue;
            }
        };

        // Cheap half of the dedup gate: a known fingerprint skips the whole
        // pipeline. The authoritative check-and-insert happens at the store.
        if trimatch_storage::document_exists(db, &fingerprint_bytes(&bytes)).await? {
            debug!(path = %path.display(), "already ingested");
            stats.duplicates += 1;
            continue;
        }

        let pipeline = pipeline.clone();
        let source_ref = path.display().to_string();
        tasks.spawn(async move { pipeline.process_bytes(&source_ref, &bytes).await });
    }

    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "intake task failed");
                stats.errors += 1;
                continue;
            }
        };
        record_outcome(db, outcome, &mut stats).await?;
    }

    info!(
        ingested = stats.ingested,
        duplicates = stats.duplicates,
        unknown = stats.unknown,
        incomplete = stats.incomplete,
        skipped = stats.skipped,
        errors = stats.errors,
        "ingestion finished"
    );
    Ok(stats)
}

async fn record_outcome(
    db: &DbPool,
    outcome: IntakeOutcome,
    stats: &mut IngestStats,
) -> anyhow::Result<()> {
    let unknown = outcome.doc_type == DocType::Unknown;
    let incomplete = outcome.extraction_incomplete;
    let source_ref = outcome.source_ref.clone();

    match trimatch_storage::put_if_absent(db, &document_record(outcome)).await? {
        IngestDisposition::Created => {
            stats.ingested += 1;
            if unknown {
                stats.unknown += 1;
            }
            if incomplete {
                stats.incomplete += 1;
            }
            info!(%source_ref, "document ingested");
        }
        IngestDisposition::Duplicate => {
            stats.duplicates += 1;
            debug!(%source_ref, "duplicate content, skipped");
        }
    }
    Ok(())
}

fn document_record(outcome: IntakeOutcome) -> DocumentRecord {
    DocumentRecord {
        fingerprint: outcome.fingerprint,
        source_ref: outcome.source_ref,
        raw_text: outcome.raw_text,
        doc_type: outcome.doc_type,
        record: outcome.record,
        base_total: outcome.base_total,
        extraction_incomplete: outcome.extraction_incomplete,
        fx_unresolved: outcome.fx_unresolved,
        ingested_at: Utc::now(),
    }
}

/// Watch `folder` and push every new `.txt` file through the intake pipeline.
/// Runs until the process is stopped.
pub async fn watch_folder<A: AugmentBackend + 'static>(
    db: &DbPool,
    pipeline: Arc<IntakePipeline<A>>,
    folder: &Path,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    // The watcher must be kept alive for watching to continue.
    let _watcher = spawn_intake_watcher(folder, tx)
        .with_context(|| format!("watching folder {}", folder.display()))?;
    info!(folder = %folder.display(), "watching intake folder");

    while let Some(path) = rx.recv().await {
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        match pipeline.process_file(&path).await {
            Ok(outcome) => {
                let mut stats = IngestStats::default();
                record_outcome(db, outcome, &mut stats).await?;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "intake failed"),
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub po_count: usize,
    pub results: usize,
    pub exceptions: usize,
}

/// Re-derive reconciliation results for every PO number in the store. Each
/// PO group is an independent shard; results for touched POs are replaced,
/// never appended, so reruns cannot accumulate drift.
pub async fn reconcile_all(db: &DbPool, engine: &ReconcileEngine) -> anyhow::Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    for po_number in trimatch_storage::po_numbers(db).await? {
        let docs = trimatch_storage::documents_for_po(db, &po_number).await?;
        let results = engine.reconcile_po(&po_number, &docs);

        stats.po_count += 1;
        stats.results += results.len();
        stats.exceptions += results.iter().filter(|r| r.status.is_exception()).count();

        trimatch_storage::replace_reconciliation_results(db, &po_number, &results).await?;
    }
    info!(
        pos = stats.po_count,
        results = stats.results,
        exceptions = stats.exceptions,
        "reconciliation finished"
    );
    Ok(stats)
}

/// Print KPIs and the vendor summary; with `show_exceptions`, the full
/// exceptions table too.
pub async fn print_report(db: &DbPool, show_exceptions: bool) -> anyhow::Result<()> {
    let counts = trimatch_storage::count_documents_by_type(db).await?;
    let results = trimatch_storage::all_results(db).await?;
    let summary = kpis(&counts, &results);

    println!("Documents: {} total", summary.total_documents);
    for (doc_type, count) in &summary.doc_type_counts {
        println!("  {doc_type:<8} {count}");
    }
    println!(
        "Invoices reconciled: {} of {} matched ({:.1}%)",
        summary.matched, summary.total_invoices, summary.match_rate
    );
    for (status, count) in &summary.by_status {
        println!("  {status:<13} {count}");
    }

    let invoices = trimatch_storage::stored_invoices(db).await?;
    let vendors = vendor_summary(&invoices, &results);
    if !vendors.is_empty() {
        println!("\nVendors (worst exception rate first):");
        for v in &vendors {
            println!(
                "  {:<28} {:<4} invoices {:<4} exceptions {:<4} rate {:.0}%",
                v.vendor,
                v.country.as_deref().unwrap_or("-"),
                v.invoices,
                v.exceptions,
                v.exception_rate * 100.0
            );
        }
    }

    if show_exceptions {
        let rows = trimatch_storage::exceptions_report(db).await?;
        println!("\nExceptions:");
        if rows.is_empty() {
            println!("  none");
        }
        for row in rows {
            println!(
                "  {:<14} {:<10} {:<22} {:<13} variance {}{}",
                row.invoice_number.as_deref().unwrap_or("-"),
                row.po_number,
                row.vendor.as_deref().unwrap_or("-"),
                row.status.to_string(),
                row.total_variance
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                if row.fx_gap { " (fx gap)" } else { "" }
            );
        }
    }
    Ok(())
}

/// Print the `source → raw text → record → results` chain for one invoice
/// number. Resubmissions show up as separate entries.
pub async fn print_audit(db: &DbPool, invoice_number: &str) -> anyhow::Result<()> {
    let records = trimatch_storage::audit_for_invoice(db, invoice_number).await?;
    if records.is_empty() {
        println!("No stored invoice with number {invoice_number}");
        return Ok(());
    }
    for audit in records {
        println!("Source:      {}", audit.source_ref);
        println!("Fingerprint: {}", audit.fingerprint);
        println!("Ingested:    {}", audit.ingested_at.to_rfc3339());
        if let Some(record) = &audit.record {
            println!("Record:      {}", serde_json::to_string_pretty(record)?);
        }
        for result in &audit.results {
            println!(
                "Result:      {} against {} (generated {})",
                result.status,
                result.po_number,
                result.generated_at.to_rfc3339()
            );
        }
        println!();
    }
    Ok(())
}

/// Export the reconciliation table to CSV. Returns the row count.
pub async fn export_results_csv(db: &DbPool, out: &Path) -> anyhow::Result<usize> {
    let results = trimatch_storage::all_results(db).await?;

    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("creating {}", out.display()))?;
    writer.write_record([
        "po_number",
        "invoice_number",
        "status",
        "total_variance",
        "fx_gap",
        "qty_variances",
        "price_variances",
        "generated_at",
    ])?;
    for result in &results {
        writer.write_record([
            result.po_number.clone(),
            result.invoice_number.clone().unwrap_or_default(),
            result.status.to_string(),
            result
                .total_variance
                .map(|v| v.to_string())
                .unwrap_or_default(),
            result.fx_gap.to_string(),
            serde_json::to_string(&result.qty_variances)?,
            serde_json::to_string(&result.price_variances)?,
            result.generated_at.to_rfc3339(),
        ])?;
    }
    writer.flush()?;
    info!(rows = results.len(), path = %out.display(), "exported reconciliation table");
    Ok(results.len())
}
