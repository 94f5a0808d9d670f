use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::core::{AutoAddPolicy, RangeBatch, RangeObservation};

/// Errors that can occur while decoding a tag report line
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    /// Line is not valid JSON
    InvalidJson { details: String },
    /// JSON object without a `links` array
    MissingLinks,
    /// A single link record was malformed; the rest of the line is still used
    InvalidRecord { index: usize, reason: String },
    /// A `cmd` line that is not a known operator command
    InvalidCommand { reason: String },
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::InvalidJson { details } => write!(f, "Invalid JSON: {}", details),
            IngestError::MissingLinks => write!(f, "Report has no links array"),
            IngestError::InvalidRecord { index, reason } => {
                write!(f, "Invalid link record {}: {}", index, reason)
            }
            IngestError::InvalidCommand { reason } => write!(f, "Invalid command: {}", reason),
        }
    }
}

impl std::error::Error for IngestError {}

pub type IngestResult<T> = Result<T, IngestError>;

/// Link record as sent by the tag: `{"aid": "0x1781", "range": 1.23}`
#[derive(Debug, Deserialize)]
struct LinkRecord {
    aid: String,
    range: f64,
}

/// Which estimate a calibration without explicit coordinates uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateKind {
    #[default]
    Raw,
    Smoothed,
}

/// Operator command sent in-band on the report stream.
///
/// ```text
/// {"cmd":"calibrate"}                                   last raw estimate
/// {"cmd":"calibrate","reference":"smoothed"}
/// {"cmd":"calibrate","at":[1.0,2.0]}                    surveyed point
/// {"cmd":"upsert","aid":"0x1783","x":0,"y":3,"bias":0.1}
/// {"cmd":"delete","aid":"0x1783"}
/// {"cmd":"policy","policy":"permissive"}
/// {"cmd":"anchors"}
/// {"cmd":"save","path":"anchors.json"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    Calibrate {
        #[serde(default)]
        at: Option<[f64; 2]>,
        #[serde(default)]
        reference: EstimateKind,
    },
    #[serde(rename = "upsert")]
    UpsertAnchor {
        #[serde(rename = "aid")]
        id: String,
        x: f64,
        y: f64,
        #[serde(default)]
        bias: Option<f64>,
    },
    #[serde(rename = "delete")]
    DeleteAnchor {
        #[serde(rename = "aid")]
        id: String,
    },
    #[serde(rename = "policy")]
    SetPolicy { policy: AutoAddPolicy },
    #[serde(rename = "anchors")]
    ShowAnchors,
    /// Write the anchor table, biases included, back to the configuration file
    #[serde(rename = "save")]
    SaveConfig {
        #[serde(default)]
        path: Option<String>,
    },
}

/// One decoded input line
#[derive(Debug, Clone, PartialEq)]
pub enum InputMessage {
    Ranges(DecodedReport),
    Control(ControlCommand),
}

/// Observations decoded from one line, plus the records that were dropped
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedReport {
    pub observations: RangeBatch,
    pub rejected: Vec<IngestError>,
}

/// Running counters for the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestStats {
    pub lines_decoded: u64,
    pub lines_rejected: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub commands: u64,
}

/// Decoder for line-delimited tag reports.
///
/// A line looks like `{"links": [{"aid": "0x1781", "range": 1.23}, ...]}`.
/// Lines that are not JSON objects with a `links` array are rejected whole;
/// inside a valid line each malformed link is dropped on its own.
#[derive(Debug, Default)]
pub struct IngestDecoder {
    stats: IngestStats,
}

impl IngestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Decode one tag report line. Blank lines yield `Ok(None)`.
    pub fn decode_line(&mut self, line: &str) -> IngestResult<Option<DecodedReport>> {
        let Some(value) = self.parse_line(line)? else {
            return Ok(None);
        };
        self.decode_report(&value).map(Some)
    }

    /// Decode a line that is either a tag report or an operator command
    pub fn decode_message(&mut self, line: &str) -> IngestResult<Option<InputMessage>> {
        let Some(value) = self.parse_line(line)? else {
            return Ok(None);
        };

        if value.get("cmd").is_none() {
            return self.decode_report(&value).map(|report| Some(InputMessage::Ranges(report)));
        }

        match ControlCommand::deserialize(&value) {
            Ok(command) => {
                self.stats.commands += 1;
                Ok(Some(InputMessage::Control(command)))
            }
            Err(e) => self.reject(IngestError::InvalidCommand { reason: e.to_string() }),
        }
    }

    fn parse_line(&mut self, line: &str) -> IngestResult<Option<Value>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(line) {
            Ok(value) => Ok(Some(value)),
            Err(e) => self.reject(IngestError::InvalidJson { details: e.to_string() }),
        }
    }

    fn reject<T>(&mut self, error: IngestError) -> IngestResult<T> {
        self.stats.lines_rejected += 1;
        debug!(error = %error, "dropping input line");
        Err(error)
    }

    fn decode_report(&mut self, value: &Value) -> IngestResult<DecodedReport> {
        let Some(links) = value.get("links").and_then(Value::as_array) else {
            return self.reject(IngestError::MissingLinks);
        };

        let mut report = DecodedReport::default();
        for (index, link) in links.iter().enumerate() {
            match Self::parse_record(index, link) {
                Ok(observation) => report.observations.push(observation),
                Err(e) => {
                    debug!(error = %e, "dropping link record");
                    report.rejected.push(e);
                }
            }
        }

        self.stats.lines_decoded += 1;
        self.stats.records_accepted += report.observations.len() as u64;
        self.stats.records_rejected += report.rejected.len() as u64;
        Ok(report)
    }

    fn parse_record(index: usize, link: &Value) -> IngestResult<RangeObservation> {
        let record = LinkRecord::deserialize(link).map_err(|e| IngestError::InvalidRecord {
            index,
            reason: e.to_string(),
        })?;

        if !record.range.is_finite() || record.range < 0.0 {
            return Err(IngestError::InvalidRecord {
                index,
                reason: format!("range {} must be a finite non-negative number", record.range),
            });
        }

        let aid = record.aid.trim();
        if aid.is_empty() {
            return Err(IngestError::InvalidRecord {
                index,
                reason: "anchor id must not be empty".to_string(),
            });
        }

        Ok(RangeObservation::new(aid, record.range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_report() {
        let mut decoder = IngestDecoder::new();
        let line = r#"{"links":[{"aid":"0x1781","range":1.25},{"aid":"0x1782","range":2}]}"#;
        let report = decoder.decode_line(line).unwrap().unwrap();

        assert_eq!(
            report.observations,
            vec![
                RangeObservation::new("0x1781", 1.25),
                RangeObservation::new("0x1782", 2.0),
            ]
        );
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_blank_line_is_skipped() {
        let mut decoder = IngestDecoder::new();
        assert_eq!(decoder.decode_line("   \r").unwrap(), None);
        assert_eq!(decoder.stats(), IngestStats::default());
    }

    #[test]
    fn test_malformed_lines_rejected() {
        let mut decoder = IngestDecoder::new();
        assert!(matches!(
            decoder.decode_line("{not json"),
            Err(IngestError::InvalidJson { .. })
        ));
        assert_eq!(decoder.decode_line(r#"{"ranges":[]}"#), Err(IngestError::MissingLinks));
        assert_eq!(decoder.decode_line(r#"{"links":{"aid":"x"}}"#), Err(IngestError::MissingLinks));
        assert_eq!(decoder.decode_line("[1,2,3]"), Err(IngestError::MissingLinks));
        assert_eq!(decoder.stats().lines_rejected, 4);
    }

    #[test]
    fn test_bad_records_dropped_individually() {
        let mut decoder = IngestDecoder::new();
        let line = r#"{"links":[
            {"aid":"0x1781","range":"1.0"},
            {"aid":17,"range":1.0},
            {"range":1.0},
            {"aid":"0x1782"},
            {"aid":"0x1783","range":-0.4},
            {"aid":"0x1784","range":3.5,"rssi":-80}
        ]}"#;
        let report = decoder.decode_line(line).unwrap().unwrap();

        assert_eq!(report.observations, vec![RangeObservation::new("0x1784", 3.5)]);
        assert_eq!(report.rejected.len(), 5);
        assert!(matches!(report.rejected[4], IngestError::InvalidRecord { index: 4, .. }));

        let stats = decoder.stats();
        assert_eq!(stats.lines_decoded, 1);
        assert_eq!(stats.records_accepted, 1);
        assert_eq!(stats.records_rejected, 5);
    }

    #[test]
    fn test_blank_anchor_id_dropped() {
        let mut decoder = IngestDecoder::new();
        let line = r#"{"links":[{"aid":"","range":1.0},{"aid":"  ","range":2.0},{"aid":" 0x1781 ","range":3.0}]}"#;
        let report = decoder.decode_line(line).unwrap().unwrap();

        assert_eq!(report.observations, vec![RangeObservation::new("0x1781", 3.0)]);
        assert!(matches!(report.rejected[0], IngestError::InvalidRecord { index: 0, .. }));
        assert!(matches!(report.rejected[1], IngestError::InvalidRecord { index: 1, .. }));
    }

    #[test]
    fn test_order_preserved() {
        let mut decoder = IngestDecoder::new();
        let line = r#"{"links":[{"aid":"b","range":1},{"aid":"a","range":2},{"aid":"b","range":3}]}"#;
        let report = decoder.decode_line(line).unwrap().unwrap();
        let ids: Vec<&str> = report.observations.iter().map(|o| o.anchor_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "b"]);
    }

    #[test]
    fn test_decode_control_commands() {
        let mut decoder = IngestDecoder::new();
        let cases = [
            (
                r#"{"cmd":"calibrate"}"#,
                ControlCommand::Calibrate { at: None, reference: EstimateKind::Raw },
            ),
            (
                r#"{"cmd":"calibrate","reference":"smoothed"}"#,
                ControlCommand::Calibrate { at: None, reference: EstimateKind::Smoothed },
            ),
            (
                r#"{"cmd":"calibrate","at":[1.5,-2]}"#,
                ControlCommand::Calibrate { at: Some([1.5, -2.0]), reference: EstimateKind::Raw },
            ),
            (
                r#"{"cmd":"upsert","aid":"0x1783","x":0,"y":3}"#,
                ControlCommand::UpsertAnchor { id: "0x1783".to_string(), x: 0.0, y: 3.0, bias: None },
            ),
            (r#"{"cmd":"delete","aid":"0x1783"}"#, ControlCommand::DeleteAnchor { id: "0x1783".to_string() }),
            (
                r#"{"cmd":"policy","policy":"permissive"}"#,
                ControlCommand::SetPolicy { policy: AutoAddPolicy::Permissive },
            ),
            (r#"{"cmd":"anchors"}"#, ControlCommand::ShowAnchors),
            (r#"{"cmd":"save"}"#, ControlCommand::SaveConfig { path: None }),
        ];

        for (line, expected) in cases {
            assert_eq!(
                decoder.decode_message(line).unwrap(),
                Some(InputMessage::Control(expected)),
                "line {}",
                line
            );
        }
        assert_eq!(decoder.stats().commands, 8);
    }

    #[test]
    fn test_decode_message_routes_reports_and_rejects_bad_commands() {
        let mut decoder = IngestDecoder::new();
        let message = decoder
            .decode_message(r#"{"links":[{"aid":"0x1781","range":1.0}]}"#)
            .unwrap();
        assert!(matches!(message, Some(InputMessage::Ranges(ref r)) if r.observations.len() == 1));

        assert!(matches!(
            decoder.decode_message(r#"{"cmd":"reboot"}"#),
            Err(IngestError::InvalidCommand { .. })
        ));
        assert!(matches!(
            decoder.decode_message(r#"{"cmd":"delete"}"#),
            Err(IngestError::InvalidCommand { .. })
        ));
        assert_eq!(decoder.decode_message(""), Ok(None));

        let stats = decoder.stats();
        assert_eq!(stats.lines_decoded, 1);
        assert_eq!(stats.lines_rejected, 2);
        assert_eq!(stats.commands, 0);
    }
}
