//! InfluxDB v2 HTTP backend
//!
//! Queries go to `/api/v2/query` as Flux and come back as annotated CSV;
//! writes go to `/api/v2/write` as line protocol with millisecond precision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{flux, FieldValue, RangeQuery, Record, SeriesStore, StoreError, Table, WritePoint};
use crate::config::StoreConfig;

/// InfluxDB v2 client bound to one org + bucket.
#[derive(Clone)]
pub struct InfluxStore {
    http: reqwest::Client,
    url: String,
    org: String,
    bucket: String,
    token: Option<String>,
    timeout: Duration,
}

impl InfluxStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.resolved_token(),
            timeout: config.timeout(),
        })
    }

    fn auth(&self) -> Result<String, StoreError> {
        self.token
            .as_ref()
            .map(|t| format!("Token {t}"))
            .ok_or_else(|| StoreError::NotConfigured("no InfluxDB token (store.token or INFLUX_TOKEN)".into()))
    }

    fn map_send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::from(e)
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        })
    }
}

#[async_trait]
impl SeriesStore for InfluxStore {
    async fn query(&self, query: &RangeQuery) -> Result<Vec<Table>, StoreError> {
        let flux = flux::to_flux(&self.bucket, query);
        debug!(query = %query.describe(), "Flux query");

        let body = serde_json::json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
            },
        });

        let resp = self
            .http
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", self.auth()?)
            .header("Accept", "application/csv")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let text = Self::check_status(resp)
            .await?
            .text()
            .await
            .map_err(|e| self.map_send_error(e))?;

        parse_annotated_csv(&text)
    }

    async fn write(&self, points: Vec<WritePoint>) -> Result<(), StoreError> {
        let body = to_line_protocol(&points);
        if body.is_empty() {
            return Ok(());
        }

        let resp = self
            .http
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", self.auth()?)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        Self::check_status(resp).await?;
        debug!(points = points.len(), "Wrote points");
        Ok(())
    }
}

// ============================================================================
// Line Protocol
// ============================================================================

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn field_literal(v: &FieldValue) -> Option<String> {
    match v {
        FieldValue::Float(f) if f.is_finite() => Some(f.to_string()),
        FieldValue::Float(_) => None,
        FieldValue::Int(i) => Some(format!("{i}i")),
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::Str(s) => Some(format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"")
        )),
    }
}

/// Render points as line protocol (ms precision). Non-finite floats are
/// dropped; a point left with no fields is skipped.
pub fn to_line_protocol(points: &[WritePoint]) -> String {
    points
        .iter()
        .filter_map(|p| {
            let fields: Vec<String> = p
                .fields
                .iter()
                .filter_map(|(k, v)| field_literal(v).map(|lit| format!("{}={lit}", escape_key(k))))
                .collect();
            if fields.is_empty() {
                return None;
            }
            let mut line = escape_measurement(&p.measurement);
            for (k, v) in &p.tags {
                if v.is_empty() {
                    continue;
                }
                line.push(',');
                line.push_str(&escape_key(k));
                line.push('=');
                line.push_str(&escape_key(v));
            }
            line.push(' ');
            line.push_str(&fields.join(","));
            line.push(' ');
            line.push_str(&p.timestamp.timestamp_millis().to_string());
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Annotated CSV
// ============================================================================

/// Columns that are never tags.
const SYSTEM_COLUMNS: &[&str] = &[
    "", "result", "table", "_start", "_stop", "_time", "_value", "_field", "_measurement",
];

/// Split one CSV line, honouring double-quoted cells.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

fn typed_value(raw: &str, datatype: Option<&str>) -> FieldValue {
    match datatype {
        Some("double") => raw.parse().map_or_else(|_| FieldValue::Str(raw.to_string()), FieldValue::Float),
        Some("long" | "unsignedLong") => raw.parse().map_or_else(|_| FieldValue::Str(raw.to_string()), FieldValue::Int),
        Some("boolean") => FieldValue::Bool(raw == "true"),
        Some("string") => FieldValue::Str(raw.to_string()),
        _ => raw.parse().map_or_else(|_| FieldValue::Str(raw.to_string()), FieldValue::Float),
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Parse an annotated-CSV query response into tables.
///
/// Blank lines separate result blocks; each block may carry its own
/// annotations and header. Records are grouped by `(result, table)`.
pub fn parse_annotated_csv(text: &str) -> Result<Vec<Table>, StoreError> {
    let mut tables: Vec<Table> = Vec::new();
    let mut index: BTreeMap<(String, String), usize> = BTreeMap::new();

    let mut datatypes: Option<Vec<String>> = None;
    let mut defaults: Option<Vec<String>> = None;
    let mut header: Option<Vec<String>> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            datatypes = None;
            defaults = None;
            header = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("#datatype") {
            datatypes = Some(split_csv_line(rest.trim_start_matches(',')));
            continue;
        }
        if let Some(rest) = line.strip_prefix("#default") {
            defaults = Some(split_csv_line(rest.trim_start_matches(',')));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let cells = split_csv_line(line);
        if header.is_none() {
            header = Some(cells);
            continue;
        }
        let Some(cols) = header.as_ref() else {
            continue;
        };

        let cell = |name: &str| -> Option<(usize, String)> {
            let i = cols.iter().position(|c| c == name)?;
            let v = cells.get(i).cloned().unwrap_or_default();
            if v.is_empty() {
                // annotation vectors skip the leading annotation column
                let d = i.checked_sub(1).and_then(|j| defaults.as_ref()?.get(j).cloned());
                Some((i, d.unwrap_or_default()))
            } else {
                Some((i, v))
            }
        };

        if let (Some((_, msg)), None) = (cell("error"), cell("_value")) {
            return Err(StoreError::Parse(format!("query error: {msg}")));
        }

        let Some((value_idx, raw_value)) = cell("_value") else {
            continue;
        };
        let time_raw = cell("_time").or_else(|| cell("_stop")).map(|(_, v)| v);
        let Some(time) = time_raw.as_deref().and_then(parse_time) else {
            return Err(StoreError::Parse(format!("record without a valid time: {line}")));
        };

        let datatype = datatypes
            .as_ref()
            .and_then(|d| value_idx.checked_sub(1).and_then(|j| d.get(j)))
            .map(String::as_str);

        let mut tags = BTreeMap::new();
        for (i, name) in cols.iter().enumerate() {
            if SYSTEM_COLUMNS.contains(&name.as_str()) || name == "error" {
                continue;
            }
            if let Some(v) = cells.get(i).filter(|v| !v.is_empty()) {
                tags.insert(name.clone(), v.clone());
            }
        }

        let record = Record {
            time,
            value: typed_value(&raw_value, datatype),
            field: cell("_field").map(|(_, v)| v).unwrap_or_default(),
            tags,
        };

        let key = (
            cell("result").map(|(_, v)| v).unwrap_or_default(),
            cell("table").map(|(_, v)| v).unwrap_or_default(),
        );
        let slot = *index.entry(key).or_insert_with(|| {
            tables.push(Table::default());
            tables.len() - 1
        });
        tables[slot].records.push(record);
    }

    for t in &mut tables {
        t.records.sort_by_key(|r| r.time);
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string
#group,false,false,true,true,false,false,true,true,true
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,Color
,,0,2024-03-01T00:00:00Z,2024-03-02T00:00:00Z,2024-03-01T01:00:00Z,1.045,SG,sensor_data,RED
,,0,2024-03-01T00:00:00Z,2024-03-02T00:00:00Z,2024-03-01T02:00:00Z,1.043,SG,sensor_data,RED
,,1,2024-03-01T00:00:00Z,2024-03-02T00:00:00Z,2024-03-01T01:00:00Z,68.5,Temp,sensor_data,RED

";

    #[test]
    fn parses_tables_tags_and_defaults() {
        let tables = parse_annotated_csv(SAMPLE).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].records.len(), 2);

        let r = &tables[0].records[0];
        assert_eq!(r.field, "SG");
        assert_eq!(r.value, FieldValue::Float(1.045));
        assert_eq!(r.tag("Color"), Some("RED"));
        assert_eq!(r.time, Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap());
        assert!(r.tag("_measurement").is_none());
    }

    #[test]
    fn string_values_keep_their_type() {
        let csv = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,string,string,string
#group,false,false,true,true,false,false,true,true,true
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,key
,,0,2024-03-01T00:00:00Z,2024-03-02T00:00:00Z,2024-03-01T01:00:00Z,\"70-80%\",value,app_config,yeast_attenuation
";
        let tables = parse_annotated_csv(csv).unwrap();
        assert_eq!(tables[0].records[0].value, FieldValue::Str("70-80%".into()));
        assert_eq!(tables[0].records[0].tag("key"), Some("yeast_attenuation"));
    }

    #[test]
    fn error_table_becomes_parse_error() {
        let csv = "\
#datatype,string,string
#group,true,true
#default,,
,error,reference
,\"bucket not found\",
";
        let err = parse_annotated_csv(csv).unwrap_err();
        assert!(err.to_string().contains("bucket not found"));
    }

    #[test]
    fn empty_body_is_no_tables() {
        assert!(parse_annotated_csv("").unwrap().is_empty());
    }

    #[test]
    fn line_protocol_escapes_and_types() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let p = WritePoint::new("calibrated_readings", ts)
            .tag("Color", "RED")
            .tag("yeast", "Safale US-05")
            .field("sg", 1.045)
            .field("note", "a \"b\"")
            .field("n", 3_i64);
        let line = to_line_protocol(&[p]);
        assert_eq!(
            line,
            "calibrated_readings,Color=RED,yeast=Safale\\ US-05 n=3i,note=\"a \\\"b\\\"\",sg=1.045 1709251200000"
        );
    }

    #[test]
    fn non_finite_fields_are_dropped() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let p = WritePoint::new("predictions", ts).field("predicted_fg", f64::NAN);
        assert!(to_line_protocol(&[p]).is_empty());
    }
}
