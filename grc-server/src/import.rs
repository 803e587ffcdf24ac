//! CSV bulk import
//!
//! Header names are matched case-insensitively with spaces and dashes folded
//! to underscores, so "Business Unit" and `business_unit` are the same column.
//! Rows that fail validation are reported by 1-based data row number and
//! never abort the import.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use csv::StringRecord;
use grc_core::ValidationError;

use crate::db::repos::compliance::ControlInput;
use crate::db::repos::findings::FindingInput;
use crate::db::repos::maturity::MaturityControlInput;
use crate::models::input::{ControlRequest, FindingRequest, MaturityControlRequest};
use crate::models::SkippedRow;

/// Valid rows with their row numbers, plus the rows that were rejected.
#[derive(Debug, Default)]
pub struct Parsed<T> {
    pub rows: Vec<(usize, T)>,
    pub skipped: Vec<SkippedRow>,
}

fn fold_header(h: &str) -> String {
    h.trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (fold_header(h), i))
                .collect(),
        )
    }

    fn require(&self, names: &[&'static str]) -> Result<(), csv::Error> {
        match names.iter().find(|n| !self.0.contains_key(**n)) {
            None => Ok(()),
            Some(missing) => Err(csv::Error::from(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("missing required column '{}'", missing),
            ))),
        }
    }

    fn row<'r>(&'r self, record: &'r StringRecord) -> Row<'r> {
        Row {
            columns: self,
            record,
        }
    }
}

struct Row<'r> {
    columns: &'r Columns,
    record: &'r StringRecord,
}

impl Row<'_> {
    /// Trimmed cell text; empty cells and absent columns are `None`.
    fn text(&self, name: &str) -> Option<String> {
        let i = *self.columns.0.get(name)?;
        let value = self.record.get(i)?.trim();
        (!value.is_empty()).then(|| value.to_owned())
    }

    fn text_or_empty(&self, name: &str) -> String {
        self.text(name).unwrap_or_default()
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ValidationError>
    where
        T: FromStr<Err = ValidationError>,
    {
        self.text(name).map(|v| v.parse()).transpose()
    }

    fn date(&self, name: &'static str) -> Result<Option<DateTime<Utc>>, ValidationError> {
        self.text(name).map(|v| parse_date(name, &v)).transpose()
    }
}

/// RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or(ValidationError::InvalidFormat {
            field,
            reason: "expected YYYY-MM-DD or an RFC 3339 timestamp",
        })
}

fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes)
}

/// Run `convert` over every data row, collecting rejects.
fn parse_rows<T>(
    bytes: &[u8],
    required: &[&'static str],
    convert: impl Fn(&Row<'_>) -> Result<T, ValidationError>,
) -> Result<Parsed<T>, csv::Error> {
    let mut rdr = reader(bytes);
    let columns = Columns::new(rdr.headers()?);
    columns.require(required)?;

    let mut parsed = Parsed {
        rows: Vec::new(),
        skipped: Vec::new(),
    };
    for (i, record) in rdr.records().enumerate() {
        let row_number = i + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                parsed.skipped.push(SkippedRow {
                    row: row_number,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        match convert(&columns.row(&record)) {
            Ok(value) => parsed.rows.push((row_number, value)),
            Err(e) => parsed.skipped.push(SkippedRow {
                row: row_number,
                reason: e.to_string(),
            }),
        }
    }
    Ok(parsed)
}

pub fn findings(bytes: &[u8]) -> Result<Parsed<FindingInput>, csv::Error> {
    parse_rows(
        bytes,
        &["title", "details", "owner", "impact", "likelihood", "exposure"],
        |row| {
            FindingRequest {
                title: row.text_or_empty("title"),
                details: row.text_or_empty("details"),
                impact: row.parse("impact")?,
                likelihood: row.parse("likelihood")?,
                exposure: row.parse("exposure")?,
                status: row.parse("status")?,
                owner: row.text_or_empty("owner"),
                domain: row.text("domain"),
                business_unit: row.text("business_unit"),
                business_owner: row.text("business_owner"),
                asset: row.text("asset"),
                technical_control: row.text("technical_control"),
                assigned_to: row.text("assigned_to"),
                open_date: row.date("open_date")?,
                sla_date: row.date("sla_date")?,
            }
            .validate()
        },
    )
}

pub fn compliance_controls(bytes: &[u8]) -> Result<Parsed<ControlInput>, csv::Error> {
    parse_rows(bytes, &["control_id", "title"], |row| {
        ControlRequest {
            control_id: row.text_or_empty("control_id"),
            title: row.text_or_empty("title"),
            description: row.text("description"),
            category: row.text("category"),
            priority: row.parse("priority")?,
            control_text: row.text("control_text"),
            supplemental_guidance: row.text("supplemental_guidance"),
            related_controls: row.text("related_controls"),
        }
        .validate()
    })
}

pub fn maturity_controls(bytes: &[u8]) -> Result<Parsed<MaturityControlInput>, csv::Error> {
    parse_rows(bytes, &["control_id", "title", "function", "category"], |row| {
        MaturityControlRequest {
            control_id: row.text_or_empty("control_id"),
            title: row.text_or_empty("title"),
            description: row.text("description"),
            function: row.text_or_empty("function"),
            category: row.text_or_empty("category"),
            subcategory: row.text("subcategory"),
            implementation_guidance: row.text("implementation_guidance"),
            priority: row.parse("priority")?,
        }
        .validate()
    })
}

/// The `value` column of a reference-data upload; validation happens in the bulk planner.
pub fn reference_values(bytes: &[u8]) -> Result<Vec<String>, csv::Error> {
    let parsed = parse_rows(bytes, &["value"], |row| Ok(row.text_or_empty("value")))?;
    Ok(parsed.rows.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grc_core::{ControlPriority, ExposureLevel, FindingStatus, RiskLevel};

    #[test]
    fn finding_rows_with_loose_headers() {
        let csv = "\
Title,Details,Owner,Impact,Likelihood,Exposure,Business Unit,Open Date
Weak TLS,TLS 1.0 on edge,ops,high,Likely,HighlyExposed,Retail,2026-02-01
,missing title,ops,Low,Unlikely,Exposed,,
Bad level,x,ops,Severe,Likely,Exposed,,
Bad date,x,ops,Low,Likely,Exposed,,01/02/2026
";
        let parsed = findings(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        let (row, input) = &parsed.rows[0];
        assert_eq!(*row, 1);
        assert_eq!(input.exposure, ExposureLevel::HighlyExposed);
        assert_eq!(input.business_unit.as_deref(), Some("Retail"));
        assert_eq!(input.status, FindingStatus::Open);
        assert_eq!(input.rating(), RiskLevel::High);
        assert_eq!(input.open_date.unwrap().to_rfc3339(), "2026-02-01T00:00:00+00:00");

        let skipped: Vec<usize> = parsed.skipped.iter().map(|s| s.row).collect();
        assert_eq!(skipped, vec![2, 3, 4]);
        assert!(parsed.skipped[1].reason.contains("Severe"));
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = findings(b"title,details\nx,y\n").unwrap_err();
        assert!(err.to_string().contains("owner"));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let csv = "control_id,title,priority\nA.5.1,Policies,high\n,,\nA.5.2,Review,\n";
        let parsed = compliance_controls(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].1.priority, ControlPriority::High);
        assert_eq!(parsed.rows[1].1.priority, ControlPriority::Medium);
        assert_eq!(parsed.rows[1].0, 3);
    }

    #[test]
    fn maturity_rows() {
        let csv = "control_id,title,function,category\nASSET-1a,Inventory,ASSET,MIL1\nASSET-1b,Owners,,MIL1\n";
        let parsed = maturity_controls(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.skipped[0].row, 2);
    }

    #[test]
    fn reference_value_column() {
        let values = reference_values(b"Value,Description\nFinance,x\nHR,y\n").unwrap();
        assert_eq!(values, vec!["Finance", "HR"]);
    }

    #[test]
    fn dates() {
        assert!(parse_date("d", "2026-01-31T10:00:00Z").is_ok());
        assert!(parse_date("d", "2026-13-01").is_err());
    }
}
