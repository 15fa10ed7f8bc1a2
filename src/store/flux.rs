//! Flux rendering of [`RangeQuery`]

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

use super::{RangeQuery, Reducer};

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Escape a string literal for Flux.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Render a Flux duration literal (`1h`, `30m`, `90s`).
fn duration_literal(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(1);
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Render a query as a Flux script against `bucket`.
pub fn to_flux(bucket: &str, q: &RangeQuery) -> String {
    let mut flux = String::new();
    let _ = writeln!(flux, "from(bucket: {})", quote(bucket));
    let _ = writeln!(
        flux,
        "  |> range(start: {}, stop: {})",
        rfc3339(q.start),
        rfc3339(q.stop)
    );
    let _ = writeln!(
        flux,
        "  |> filter(fn: (r) => r._measurement == {})",
        quote(&q.measurement)
    );

    if !q.fields.is_empty() {
        let clause = q
            .fields
            .iter()
            .map(|f| format!("r._field == {}", quote(f)))
            .collect::<Vec<_>>()
            .join(" or ");
        let _ = writeln!(flux, "  |> filter(fn: (r) => {clause})");
    }

    for (k, v) in &q.tags {
        let _ = writeln!(flux, "  |> filter(fn: (r) => r[{}] == {})", quote(k), quote(v));
    }

    match q.reducer {
        Reducer::None => {}
        Reducer::First => flux.push_str("  |> first()\n"),
        Reducer::Last => flux.push_str("  |> last()\n"),
        Reducer::Count => flux.push_str("  |> count()\n"),
        Reducer::WindowMean(every) => {
            let _ = writeln!(
                flux,
                "  |> aggregateWindow(every: {}, fn: mean, createEmpty: false)",
                duration_literal(every)
            );
        }
    }

    flux
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn renders_fields_tags_and_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let q = RangeQuery::new("sensor_data", Duration::hours(24), now)
            .field("SG")
            .field("Temp")
            .tag("Color", "RED")
            .reduce(Reducer::WindowMean(Duration::hours(1)));
        let flux = to_flux("fermentation", &q);

        assert!(flux.starts_with("from(bucket: \"fermentation\")"));
        assert!(flux.contains("range(start: 2024-02-29T12:00:00.000Z"));
        assert!(flux.contains("r._field == \"SG\" or r._field == \"Temp\""));
        assert!(flux.contains("r[\"Color\"] == \"RED\""));
        assert!(flux.contains("aggregateWindow(every: 1h, fn: mean, createEmpty: false)"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn duration_literals() {
        assert_eq!(duration_literal(Duration::minutes(30)), "30m");
        assert_eq!(duration_literal(Duration::seconds(90)), "90s");
        assert_eq!(duration_literal(Duration::hours(2)), "2h");
    }
}
