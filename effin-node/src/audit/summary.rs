//! Ledger summary for the `effin-audit` tool

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use effin_common::time::from_seconds;
use effin_common::AuditEntry;

use super::LedgerLine;

const UNKNOWN_ORIGIN: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub processed: u64,
    /// Processed transactions carrying the simulation fraud label
    pub labelled_fraud: u64,
    pub alerts: u64,
    pub decrypt_failed: u64,
    /// Alerts per processed transaction, in percent
    pub alert_rate_percent: f64,
    /// Processed transactions per second over the covered time span
    pub throughput_tps: f64,
    /// Earliest and latest processed timestamps
    pub first_processed: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
    /// `bank_id -> matched_bank -> alerts`
    pub cross_bank: BTreeMap<String, BTreeMap<String, u64>>,
}

impl LedgerSummary {
    pub fn from_lines(lines: &[LedgerLine]) -> Self {
        let mut summary = Self::default();
        let mut first_ts = f64::INFINITY;
        let mut last_ts = f64::NEG_INFINITY;

        for line in lines {
            match line {
                LedgerLine::DecryptFailed { .. } => summary.decrypt_failed += 1,
                LedgerLine::Entry(AuditEntry::TxProcessed(p)) => {
                    summary.processed += 1;
                    if p.is_fraud {
                        summary.labelled_fraud += 1;
                    }
                    first_ts = first_ts.min(p.timestamp);
                    last_ts = last_ts.max(p.timestamp);
                }
                LedgerLine::Entry(AuditEntry::Alert(a)) => {
                    summary.alerts += 1;
                    let matched = a.matched_origin.as_deref().unwrap_or(UNKNOWN_ORIGIN);
                    *summary
                        .cross_bank
                        .entry(a.origin.clone())
                        .or_default()
                        .entry(matched.to_string())
                        .or_default() += 1;
                }
            }
        }

        if summary.processed > 0 {
            summary.alert_rate_percent = summary.alerts as f64 / summary.processed as f64 * 100.0;
            summary.first_processed = from_seconds(first_ts);
            summary.last_processed = from_seconds(last_ts);
            let span = last_ts - first_ts;
            summary.throughput_tps = if span > 0.0 {
                summary.processed as f64 / span
            } else {
                summary.processed as f64
            };
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use effin_common::models::ProcessedEntry;
    use effin_common::Alert;
    use uuid::Uuid;

    fn processed(ts: f64, is_fraud: bool) -> LedgerLine {
        LedgerLine::Entry(AuditEntry::TxProcessed(ProcessedEntry {
            origin: "bank1".to_string(),
            tx_id: Uuid::new_v4().to_string(),
            timestamp: ts,
            is_fraud,
        }))
    }

    fn alert(matched: Option<&str>) -> LedgerLine {
        LedgerLine::Entry(AuditEntry::Alert(Alert {
            alert_id: Uuid::new_v4(),
            tx_id: "t".to_string(),
            matched_id: None,
            distance: Some(0.1),
            score: None,
            origin: "bank1".to_string(),
            matched_origin: matched.map(str::to_string),
            matched_id_digest: None,
            timestamp: 0.0,
        }))
    }

    #[test]
    fn test_summary_counts_and_matrix() {
        let lines = vec![
            processed(100.0, false),
            processed(102.0, true),
            processed(104.0, false),
            processed(110.0, true),
            alert(Some("bank2")),
            alert(Some("bank2")),
            alert(None),
            LedgerLine::DecryptFailed { line: 8 },
        ];
        let s = LedgerSummary::from_lines(&lines);
        assert_eq!(s.processed, 4);
        assert_eq!(s.labelled_fraud, 2);
        assert_eq!(s.alerts, 3);
        assert_eq!(s.decrypt_failed, 1);
        assert!((s.alert_rate_percent - 75.0).abs() < 1e-9);
        assert!((s.throughput_tps - 0.4).abs() < 1e-9);
        assert_eq!(s.cross_bank["bank1"]["bank2"], 2);
        assert_eq!(s.cross_bank["bank1"]["unknown"], 1);
        assert_eq!(s.first_processed.map(|t| t.timestamp()), Some(100));
        assert_eq!(s.last_processed.map(|t| t.timestamp()), Some(110));
    }

    #[test]
    fn test_empty_ledger() {
        let s = LedgerSummary::from_lines(&[]);
        assert_eq!(s, LedgerSummary::default());
    }
}
