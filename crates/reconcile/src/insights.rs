use std::collections::BTreeMap;

use serde::Serialize;

use trimatch_core::{ReconciliationResult, StoredInvoice};

/// Headline numbers for the reconciliation dashboard feed.
#[derive(Debug, Clone, Serialize)]
pub struct KpiSummary {
    pub total_documents: i64,
    pub doc_type_counts: BTreeMap<String, i64>,
    pub total_invoices: i64,
    pub matched: i64,
    /// Percentage of invoices whose latest result is MATCH.
    pub match_rate: f64,
    pub by_status: BTreeMap<String, i64>,
}

pub fn kpis(
    doc_type_counts: &BTreeMap<String, i64>,
    results: &[ReconciliationResult],
) -> KpiSummary {
    let total_documents = doc_type_counts.values().sum();
    let total_invoices = doc_type_counts.get("INVOICE").copied().unwrap_or(0);

    let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
    for result in results {
        *by_status.entry(result.status.to_string()).or_default() += 1;
    }
    let matched = by_status.get("MATCH").copied().unwrap_or(0);
    let match_rate = if total_invoices > 0 {
        matched as f64 / total_invoices as f64 * 100.0
    } else {
        0.0
    };

    KpiSummary {
        total_documents,
        doc_type_counts: doc_type_counts.clone(),
        total_invoices,
        matched,
        match_rate,
        by_status,
    }
}

/// Per-vendor exception pressure, worst offenders first.
#[derive(Debug, Clone, Serialize)]
pub struct VendorSummary {
    pub vendor: String,
    pub country: Option<String>,
    pub invoices: i64,
    pub exceptions: i64,
    pub exception_rate: f64,
}

pub fn vendor_summary(
    invoices: &[StoredInvoice],
    results: &[ReconciliationResult],
) -> Vec<VendorSummary> {
    let status_by_fingerprint: BTreeMap<&str, bool> = results
        .iter()
        .map(|r| (r.invoice_fingerprint.as_str(), r.status.is_exception()))
        .collect();

    let mut grouped: BTreeMap<(String, Option<String>), (i64, i64)> = BTreeMap::new();
    for invoice in invoices {
        let vendor = invoice
            .record
            .vendor
            .clone()
            .unwrap_or_else(|| "Unknown Vendor".to_string());
        let key = (vendor, invoice.record.country.clone());
        let entry = grouped.entry(key).or_default();
        entry.0 += 1;
        if status_by_fingerprint
            .get(invoice.fingerprint.as_str())
            .copied()
            .unwrap_or(false)
        {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<VendorSummary> = grouped
        .into_iter()
        .map(|((vendor, country), (invoices, exceptions))| VendorSummary {
            vendor,
            country,
            invoices,
            exceptions,
            exception_rate: if invoices > 0 {
                exceptions as f64 / invoices as f64
            } else {
                0.0
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.exception_rate
            .total_cmp(&a.exception_rate)
            .then(b.invoices.cmp(&a.invoices))
    });
    summaries
}
