use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use trimatch_core::{DocType, Money, StructuredRecord, ToleranceConfig};

use crate::augment::{AugmentBackend, HttpAugmenter};
use crate::classify::classify;
use crate::extract::{extract, needs_augmentation};
use crate::fingerprint;
use crate::normalize::normalize;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything intake derives from one raw document. The caller hands this to
/// the store's dedup gate; nothing here has touched the database yet.
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    /// SHA-256 hex digest of the raw bytes — the document's identity key.
    pub fingerprint: String,
    pub source_ref: String,
    pub raw_text: String,
    pub doc_type: DocType,
    /// `None` for unclassified documents, which are stored for audit only.
    pub record: Option<StructuredRecord>,
    pub base_total: Option<Money>,
    /// Required fields still null after the deterministic pass and any
    /// augmentation attempt; excluded from reconciliation until completed.
    pub extraction_incomplete: bool,
    pub fx_unresolved: bool,
}

/// Orchestrates: fingerprint → classify → extract → augment (fallback) →
/// normalize. The augmentation collaborator is optional and composed in
/// explicitly; its failure is an ordinary value, not a raised fault.
pub struct IntakePipeline<A> {
    tolerances: ToleranceConfig,
    augmenter: Option<A>,
    augment_timeout: Duration,
}

impl IntakePipeline<HttpAugmenter> {
    /// Deterministic-only pipeline, no collaborator.
    pub fn deterministic(tolerances: ToleranceConfig) -> Self {
        Self {
            tolerances,
            augmenter: None,
            augment_timeout: Duration::from_secs(20),
        }
    }
}

impl<A: AugmentBackend> IntakePipeline<A> {
    pub fn with_augmenter(
        tolerances: ToleranceConfig,
        augmenter: A,
        augment_timeout: Duration,
    ) -> Self {
        Self {
            tolerances,
            augmenter: Some(augmenter),
            augment_timeout,
        }
    }

    /// Process a file on disk. The file's path doubles as its source ref.
    pub async fn process_file(&self, path: &Path) -> Result<IntakeOutcome, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(self.process_bytes(&path.display().to_string(), &bytes).await)
    }

    /// Process raw document bytes. Per-document problems are recorded on the
    /// outcome, never raised — one bad document must not sink a batch.
    pub async fn process_bytes(&self, source_ref: &str, data: &[u8]) -> IntakeOutcome {
        let fingerprint = fingerprint::fingerprint_bytes(data);
        let raw_text = String::from_utf8_lossy(data).into_owned();

        let doc_type = classify(&raw_text);
        let Some(mut record) = extract(&raw_text, doc_type) else {
            // Only unclassified documents have no grammar; stored for audit.
            debug!(source_ref, "document did not classify; storing for audit");
            return IntakeOutcome {
                fingerprint,
                source_ref: source_ref.to_string(),
                raw_text,
                doc_type,
                record: None,
                base_total: None,
                extraction_incomplete: false,
                fx_unresolved: false,
            };
        };

        if needs_augmentation(&record, &raw_text) {
            if let Some(augmented) = self.try_augment(&raw_text, doc_type, source_ref).await {
                record = augmented;
            }
        }

        let extraction_incomplete = needs_augmentation(&record, &raw_text);
        if extraction_incomplete {
            warn!(
                source_ref,
                missing = ?record.missing_fields(),
                "extraction incomplete; document excluded from reconciliation"
            );
        }

        let normalized = normalize(record, &self.tolerances);

        IntakeOutcome {
            fingerprint,
            source_ref: source_ref.to_string(),
            raw_text,
            doc_type,
            record: Some(normalized.record),
            base_total: normalized.base_total,
            extraction_incomplete,
            fx_unresolved: normalized.fx_unresolved,
        }
    }

    async fn try_augment(
        &self,
        text: &str,
        doc_type: DocType,
        source_ref: &str,
    ) -> Option<StructuredRecord> {
        let augmenter = self.augmenter.as_ref()?;
        match tokio::time::timeout(self.augment_timeout, augmenter.augment(text, doc_type)).await {
            Ok(Ok(record)) => {
                info!(source_ref, "augmentation supplied a record");
                Some(record)
            }
            Ok(Err(e)) => {
                warn!(source_ref, error = %e, "augmentation unavailable; keeping deterministic record");
                None
            }
            Err(_) => {
                warn!(
                    source_ref,
                    timeout_secs = self.augment_timeout.as_secs(),
                    "augmentation timed out; keeping deterministic record"
                );
                None
            }
        }
    }
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a notify watcher on `watch_dir` that sends new file paths to `tx`.
/// Returns the watcher — it must be kept alive for watching to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            if matches!(ev.kind, EventKind::Create(_)) {
                for path in ev.paths {
                    let _ = tx.try_send(path);
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::MockAugmenter;
    use trimatch_core::Invoice;

    const INV_TEXT: &str = "Document Type: Invoice
Invoice Number: INV-3001-1
PO Number: PO-3001
Vendor: Umbrella Supplies
Country: GB
Currency: GBP
Date: 2025-07-20
 - SKU: PNL-300 | Description: Panel 300x300 | Qty: 4 | Unit Price: 20.00
Total: 80.00";

    fn complete_invoice() -> StructuredRecord {
        StructuredRecord::Invoice(Invoice {
            number: Some("INV-3001-1".into()),
            po_number: Some("PO-3001".into()),
            vendor: Some("Umbrella Supplies".into()),
            currency: Some("GBP".into()),
            total: Some("80.00".parse().unwrap()),
            items: vec![trimatch_core::ItemLine {
                sku: "PNL-300".into(),
                description: Some("Panel 300x300".into()),
                qty: rust_decimal::Decimal::from(4),
                unit_price: "20.00".parse().unwrap(),
            }],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn complete_document_never_calls_augmenter() {
        // An offline mock would surface as a warning; a complete doc skips it.
        let pipeline = IntakePipeline::with_augmenter(
            ToleranceConfig::default(),
            MockAugmenter::unavailable(),
            Duration::from_secs(1),
        );
        let outcome = pipeline.process_bytes("inv.txt", INV_TEXT.as_bytes()).await;
        assert_eq!(outcome.doc_type, DocType::Invoice);
        assert!(!outcome.extraction_incomplete);
        // GBP at the default 1.27 rate.
        assert_eq!(outcome.base_total, Some("101.60".parse().unwrap()));
    }

    #[tokio::test]
    async fn augmenter_fills_incomplete_extraction() {
        let broken = INV_TEXT.replace("Total: 80.00", "");
        let pipeline = IntakePipeline::with_augmenter(
            ToleranceConfig::default(),
            MockAugmenter::new(complete_invoice()),
            Duration::from_secs(1),
        );
        let outcome = pipeline.process_bytes("inv.txt", broken.as_bytes()).await;
        assert!(!outcome.extraction_incomplete);
        let Some(StructuredRecord::Invoice(inv)) = outcome.record else {
            panic!("expected invoice record");
        };
        assert_eq!(inv.total, Some("80.00".parse().unwrap()));
    }

    #[tokio::test]
    async fn unavailable_augmenter_keeps_partial_record() {
        let broken = INV_TEXT.replace("Total: 80.00", "");
        let pipeline = IntakePipeline::with_augmenter(
            ToleranceConfig::default(),
            MockAugmenter::unavailable(),
            Duration::from_secs(1),
        );
        let outcome = pipeline.process_bytes("inv.txt", broken.as_bytes()).await;
        assert!(outcome.extraction_incomplete);
        let Some(StructuredRecord::Invoice(inv)) = outcome.record else {
            panic!("expected invoice record");
        };
        assert_eq!(inv.number.as_deref(), Some("INV-3001-1"));
        assert_eq!(inv.total, None);
    }

    #[tokio::test]
    async fn no_augmenter_configured_is_quietly_deterministic() {
        let broken = INV_TEXT.replace("Total: 80.00", "");
        let pipeline = IntakePipeline::deterministic(ToleranceConfig::default());
        let outcome = pipeline.process_bytes("inv.txt", broken.as_bytes()).await;
        assert!(outcome.extraction_incomplete);
    }

    #[tokio::test]
    async fn unknown_document_is_kept_for_audit_only() {
        let pipeline = IntakePipeline::deterministic(ToleranceConfig::default());
        let outcome = pipeline.process_bytes("memo.txt", b"lunch menu, week 30").await;
        assert_eq!(outcome.doc_type, DocType::Unknown);
        assert!(outcome.record.is_none());
        assert!(!outcome.extraction_incomplete);
    }

    #[tokio::test]
    async fn fingerprint_is_stable_across_runs() {
        let pipeline = IntakePipeline::deterministic(ToleranceConfig::default());
        let a = pipeline.process_bytes("a.txt", INV_TEXT.as_bytes()).await;
        let b = pipeline.process_bytes("b.txt", INV_TEXT.as_bytes()).await;
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn process_file_uses_path_as_source_ref() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("INV-3001-1.txt");
        std::fs::write(&path, INV_TEXT).unwrap();

        let pipeline = IntakePipeline::deterministic(ToleranceConfig::default());
        let outcome = pipeline.process_file(&path).await.unwrap();
        assert_eq!(outcome.source_ref, path.display().to_string());
        assert_eq!(outcome.doc_type, DocType::Invoice);
    }
}
