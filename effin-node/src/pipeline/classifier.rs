//! Alert classifier
//!
//! Decides, per returned neighbor, whether a query record raises a
//! cross-institution alert.
//!
//! Rules, applied in order:
//! 1. A neighbor from the querying record's own origin never alerts.
//! 2. If the neighbor carries a usable score (`score`, else `similarity`),
//!    it alerts iff `score >= similarity threshold`. Distance is ignored.
//! 3. Only without a usable score: it alerts iff `distance <= distance threshold`.
//!
//! Values that are not finite numbers (or numeric strings) count as absent,
//! so a malformed neighbor simply does not alert.

use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use effin_common::config::Thresholds;
use effin_common::Alert;

use crate::index::Neighbor;

/// Which test decided a trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Criterion {
    Score(f64),
    Distance(f64),
}

/// Per-neighbor verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Neighbor belongs to the querying origin
    SameOrigin,
    Triggered(Criterion),
    NotTriggered,
}

/// Parse a metric from raw JSON; anything unusable is `None`
pub fn parse_metric(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[derive(Debug, Clone)]
pub struct AlertClassifier {
    origin: String,
    thresholds: Thresholds,
}

impl AlertClassifier {
    pub fn new(origin: impl Into<String>, thresholds: Thresholds) -> Self {
        Self {
            origin: origin.into(),
            thresholds,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn evaluate(&self, neighbor: &Neighbor) -> Verdict {
        if neighbor.origin() == Some(self.origin.as_str()) {
            return Verdict::SameOrigin;
        }

        if let Some(score) = parse_metric(neighbor.raw_score()) {
            return if score >= self.thresholds.similarity {
                Verdict::Triggered(Criterion::Score(score))
            } else {
                Verdict::NotTriggered
            };
        }

        match parse_metric(neighbor.distance.as_ref()) {
            Some(distance) if distance <= self.thresholds.distance => {
                Verdict::Triggered(Criterion::Distance(distance))
            }
            _ => Verdict::NotTriggered,
        }
    }

    /// Alerts for one query result
    ///
    /// At most one alert per neighbor id; neighbors without an id are not
    /// deduplicated. `timestamp` is stamped on every alert produced.
    pub fn classify(&self, tx_id: &str, neighbors: &[Neighbor], timestamp: f64) -> Vec<Alert> {
        let mut seen = HashSet::new();
        let mut alerts = Vec::new();

        for neighbor in neighbors {
            if !matches!(self.evaluate(neighbor), Verdict::Triggered(_)) {
                continue;
            }
            let matched_id = neighbor.id();
            if let Some(id) = &matched_id {
                if !seen.insert(id.clone()) {
                    continue;
                }
            }

            alerts.push(Alert {
                alert_id: Uuid::new_v4(),
                tx_id: tx_id.to_string(),
                matched_id,
                distance: parse_metric(neighbor.distance.as_ref()),
                score: parse_metric(neighbor.raw_score()),
                origin: self.origin.clone(),
                matched_origin: neighbor.origin().map(str::to_string),
                matched_id_digest: neighbor.id_digest().map(str::to_string),
                timestamp,
            });
        }
        alerts
    }
}
