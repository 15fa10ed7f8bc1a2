//! In-process series store for demo mode and tests.
//!
//! Evaluates the same filters and reducers as the Flux backend: range is
//! start-inclusive/stop-exclusive, records are grouped into one table per
//! `(field, tag set)`, and windowed means are stamped with the window stop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{FieldValue, RangeQuery, Record, Reducer, SeriesStore, StoreError, Table, WritePoint};

#[derive(Debug, Clone)]
struct StoredValue {
    measurement: String,
    tags: BTreeMap<String, String>,
    field: String,
    value: FieldValue,
    time: DateTime<Utc>,
}

type SeriesKey = (String, BTreeMap<String, String>);

/// Series store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<Vec<StoredValue>>,
    unavailable: AtomicBool,
    write_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `write` calls so far.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Number of stored field values in `measurement`.
    pub async fn count(&self, measurement: &str) -> usize {
        self.values
            .read()
            .await
            .iter()
            .filter(|v| v.measurement == measurement)
            .count()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

fn reduce(records: Vec<Record>, reducer: Reducer, stop: DateTime<Utc>) -> Vec<Record> {
    match reducer {
        Reducer::None => records,
        Reducer::First => records.into_iter().take(1).collect(),
        Reducer::Last => records.into_iter().last().into_iter().collect(),
        Reducer::Count => {
            let Some(first) = records.first() else {
                return Vec::new();
            };
            vec![Record {
                time: stop,
                value: FieldValue::Int(i64::try_from(records.len()).unwrap_or(i64::MAX)),
                field: first.field.clone(),
                tags: first.tags.clone(),
            }]
        }
        Reducer::WindowMean(every) => {
            let every_ms = every.num_milliseconds().max(1);
            let mut windows: BTreeMap<i64, (f64, usize, Record)> = BTreeMap::new();
            for r in records {
                let Some(v) = r.value.as_f64() else { continue };
                let bucket = r.time.timestamp_millis().div_euclid(every_ms);
                let entry = windows.entry(bucket).or_insert_with(|| (0.0, 0, r.clone()));
                entry.0 += v;
                entry.1 += 1;
            }
            windows
                .into_iter()
                .filter_map(|(bucket, (sum, n, template))| {
                    let window_stop = DateTime::from_timestamp_millis((bucket + 1) * every_ms)?;
                    #[allow(clippy::cast_precision_loss)]
                    let mean = sum / n as f64;
                    Some(Record {
                        time: window_stop.min(stop),
                        value: FieldValue::Float(mean),
                        ..template
                    })
                })
                .collect()
        }
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn query(&self, query: &RangeQuery) -> Result<Vec<Table>, StoreError> {
        self.check_available()?;

        let values = self.values.read().await;
        let mut grouped: BTreeMap<SeriesKey, Vec<Record>> = BTreeMap::new();

        for v in values.iter() {
            if v.measurement != query.measurement
                || v.time < query.start
                || v.time >= query.stop
                || (!query.fields.is_empty() && !query.fields.contains(&v.field))
                || query.tags.iter().any(|(k, want)| v.tags.get(k) != Some(want))
            {
                continue;
            }
            grouped
                .entry((v.field.clone(), v.tags.clone()))
                .or_default()
                .push(Record {
                    time: v.time,
                    value: v.value.clone(),
                    field: v.field.clone(),
                    tags: v.tags.clone(),
                });
        }

        Ok(grouped
            .into_values()
            .map(|mut records| {
                records.sort_by_key(|r| r.time);
                Table {
                    records: reduce(records, query.reducer, query.stop),
                }
            })
            .filter(|t| !t.records.is_empty())
            .collect())
    }

    async fn write(&self, points: Vec<WritePoint>) -> Result<(), StoreError> {
        self.check_available()?;

        let mut values = self.values.write().await;
        for p in points {
            let tags: BTreeMap<String, String> =
                p.tags.into_iter().filter(|(_, v)| !v.is_empty()).collect();
            for (field, value) in p.fields {
                if matches!(value, FieldValue::Float(f) if !f.is_finite()) {
                    continue;
                }
                // same series + timestamp overwrites, as in InfluxDB
                values.retain(|v| {
                    !(v.measurement == p.measurement && v.field == field && v.tags == tags && v.time == p.timestamp)
                });
                values.push(StoredValue {
                    measurement: p.measurement.clone(),
                    tags: tags.clone(),
                    field,
                    value,
                    time: p.timestamp,
                });
            }
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
