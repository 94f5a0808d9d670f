//! Estimate output formatting and serialization
//!
//! Turns engine updates into JSON lines for downstream consumers or a short
//! status line for a terminal, and renders the anchor table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algorithms::FixKind;
use crate::api::engine::{AnchorSnapshot, EngineUpdate};

/// Serializable view of one engine update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedEstimate {
    /// Tick sequence number
    pub sequence: u64,
    /// Smoothed position (meters)
    pub x: f64,
    pub y: f64,
    /// Raw solver output (meters)
    pub raw_x: f64,
    pub raw_y: f64,
    /// How the fix was produced
    pub fix: FixKind,
    /// Active anchors used in the solve
    pub anchors: usize,
    /// Robust solver iterations (0 for closed-form fixes)
    pub iterations: u32,
    pub converged: bool,
}

/// Estimate formatter for converting EngineUpdate to output records
pub struct EstimateFormatter {
    /// Decimal places kept on coordinates
    pub precision: u8,
}

impl Default for EstimateFormatter {
    fn default() -> Self {
        Self { precision: 3 }
    }
}

impl EstimateFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the precision for floating-point values
    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn format(&self, update: &EngineUpdate) -> FormattedEstimate {
        FormattedEstimate {
            sequence: update.sequence,
            x: self.round_to_precision(update.smoothed.x),
            y: self.round_to_precision(update.smoothed.y),
            raw_x: self.round_to_precision(update.raw.x),
            raw_y: self.round_to_precision(update.raw.y),
            fix: update.report.kind,
            anchors: update.report.anchors_used,
            iterations: update.report.iterations,
            converged: update.report.converged,
        }
    }

    /// Round floating-point value to specified precision
    fn round_to_precision(&self, value: f64) -> f64 {
        let multiplier = 10_f64.powi(self.precision as i32);
        (value * multiplier).round() / multiplier
    }
}

/// JSON line formatter
#[derive(Debug, Default)]
pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn format(&self, estimate: &FormattedEstimate) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(estimate)
        } else {
            serde_json::to_string(estimate)
        }
    }
}

/// Human-readable status line formatter
#[derive(Debug, Default)]
pub struct TextFormatter {
    /// Append fix kind and anchor count
    pub verbose: bool,
}

impl TextFormatter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// `Tag ≈ (1.23, 0.45) m`
    pub fn format(&self, estimate: &FormattedEstimate) -> String {
        let line = format!("Tag \u{2248} ({:.2}, {:.2}) m", estimate.x, estimate.y);
        if self.verbose {
            format!("{}  [{} anchors, {}]", line, estimate.anchors, fix_label(estimate.fix))
        } else {
            line
        }
    }
}

fn fix_label(kind: FixKind) -> &'static str {
    match kind {
        FixKind::SingleAnchor => "single anchor",
        FixKind::TwoAnchorIntersection => "two-anchor intersection",
        FixKind::TwoAnchorContinuity => "two-anchor continuity",
        FixKind::RobustLeastSquares => "robust least squares",
    }
}

/// Anchor table view, one row per anchor in id order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorTable {
    pub rows: Vec<AnchorSnapshot>,
}

impl AnchorTable {
    pub fn new(mut rows: Vec<AnchorSnapshot>) -> Self {
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Self { rows }
    }
}

fn optional_meters(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

impl fmt::Display for AnchorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:>8} {:>8} {:>8} {:>8} {:>9}",
            "anchor", "x", "y", "raw", "bias", "corrected"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<10} {:>8.2} {:>8.2} {:>8} {:>8.2} {:>9}",
                row.id,
                row.x,
                row.y,
                optional_meters(row.raw_range),
                row.bias,
                optional_meters(row.corrected_range)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::SolveReport;
    use crate::core::{PositionEstimate, SmoothedEstimate};

    fn sample_update() -> EngineUpdate {
        let raw = PositionEstimate::new(1.23456, -0.98765);
        EngineUpdate {
            sequence: 7,
            raw,
            smoothed: SmoothedEstimate { x: 1.1111, y: -0.5555 },
            report: SolveReport {
                estimate: raw,
                kind: FixKind::RobustLeastSquares,
                anchors_used: 4,
                iterations: 5,
                converged: true,
            },
        }
    }

    #[test]
    fn test_precision_rounding() {
        let formatted = EstimateFormatter::new().with_precision(2).format(&sample_update());
        assert_eq!(formatted.x, 1.11);
        assert_eq!(formatted.y, -0.56);
        assert_eq!(formatted.raw_x, 1.23);
        assert_eq!(formatted.raw_y, -0.99);
        assert_eq!(formatted.anchors, 4);
    }

    #[test]
    fn test_json_line() {
        let formatted = EstimateFormatter::new().format(&sample_update());
        let line = JsonFormatter::new(false).format(&formatted).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""fix":"robust_least_squares""#));

        let parsed: FormattedEstimate = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, formatted);

        let pretty = JsonFormatter::new(true).format(&formatted).unwrap();
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_text_line() {
        let formatted = EstimateFormatter::new().format(&sample_update());
        assert_eq!(TextFormatter::new(false).format(&formatted), "Tag \u{2248} (1.11, -0.56) m");
        assert!(TextFormatter::new(true)
            .format(&formatted)
            .ends_with("[4 anchors, robust least squares]"));
    }

    #[test]
    fn test_anchor_table() {
        let table = AnchorTable::new(vec![
            AnchorSnapshot {
                id: "0x1782".to_string(),
                x: 3.0,
                y: 0.0,
                bias: 0.1,
                raw_range: None,
                corrected_range: None,
            },
            AnchorSnapshot {
                id: "0x1781".to_string(),
                x: 0.0,
                y: 0.0,
                bias: -0.2,
                raw_range: Some(1.5),
                corrected_range: Some(1.3),
            },
        ]);
        assert_eq!(table.rows[0].id, "0x1781");

        let rendered = table.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0x1781"));
        assert!(lines[1].contains("1.30"));
        assert!(lines[2].contains(" -"));
    }
}
