//! Append-only per-query metrics log.
//!
//! Every answered question produces one [`MetricRecord`], serialized as a
//! single JSON line. Appends from concurrent requests (including background
//! scoring tasks) go through one mutex and one `write_all` per record, so
//! lines never interleave.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::models::{MetricRecord, QualityBucket};

struct Sink {
    file: Option<File>,
    records: Vec<MetricRecord>,
}

/// Thread-safe metrics sink with an in-memory mirror.
pub struct MetricsRecorder {
    path: Option<PathBuf>,
    sink: Mutex<Sink>,
}

impl MetricsRecorder {
    /// Recorder that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sink: Mutex::new(Sink {
                file: None,
                records: Vec::new(),
            }),
        }
    }

    /// Open (or create) a JSONL log at `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating metrics directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening metrics log {}", path.display()))?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            sink: Mutex::new(Sink {
                file: Some(file),
                records: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Sink> {
        match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one record.
    pub fn record(&self, record: MetricRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut sink = self.lock();
        if let Some(file) = sink.file.as_mut() {
            file.write_all(line.as_bytes())
                .context("appending metric record")?;
        }
        sink.records.push(record);
        Ok(())
    }

    /// Records appended through this recorder, oldest first.
    pub fn records(&self) -> Vec<MetricRecord> {
        self.lock().records.clone()
    }

    pub fn find(&self, query_id: &str) -> Option<MetricRecord> {
        self.lock()
            .records
            .iter()
            .rev()
            .find(|r| r.query_id == query_id)
            .cloned()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_records(&self.lock().records)
    }
}

/// Read a JSONL metrics log. Malformed lines are skipped with a warning.
pub fn load_records(path: &Path) -> Result<Vec<MetricRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping malformed metric record"),
        }
    }
    Ok(records)
}

/// Aggregate view over a set of metric records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub total_queries: usize,
    pub errors: usize,
    pub mean_retrieval_ms: f64,
    pub mean_generation_ms: f64,
    pub mean_total_ms: f64,
    /// Nearest-rank 95th percentile of `total_ms`.
    pub p95_total_ms: u64,
    pub mean_confidence: f64,
    /// Means over records that carry the score.
    pub mean_faithfulness: Option<f64>,
    pub mean_relevance: Option<f64>,
    pub buckets: BTreeMap<QualityBucket, usize>,
}

impl MetricsSummary {
    pub fn from_records(records: &[MetricRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let n = records.len() as f64;
        let mean = |f: fn(&MetricRecord) -> f64| records.iter().map(f).sum::<f64>() / n;

        let mut totals: Vec<u64> = records.iter().map(|r| r.total_ms).collect();
        totals.sort_unstable();
        let rank = ((0.95 * totals.len() as f64).ceil() as usize).clamp(1, totals.len());

        let mut buckets = BTreeMap::new();
        for r in records {
            *buckets.entry(r.quality).or_insert(0) += 1;
        }

        Self {
            total_queries: records.len(),
            errors: records.iter().filter(|r| r.error.is_some()).count(),
            mean_retrieval_ms: mean(|r| r.retrieval_ms as f64),
            mean_generation_ms: mean(|r| r.generation_ms as f64),
            mean_total_ms: mean(|r| r.total_ms as f64),
            p95_total_ms: totals[rank - 1],
            mean_confidence: mean(|r| r.confidence),
            mean_faithfulness: mean_of(records.iter().filter_map(|r| r.faithfulness)),
            mean_relevance: mean_of(records.iter().filter_map(|r| r.relevance)),
            buckets,
        }
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));
        writeln!(f, "  Queries:      {}", self.total_queries)?;
        writeln!(f, "  Errors:       {}", self.errors)?;
        writeln!(
            f,
            "  Latency (ms): retrieval {:.1}, generation {:.1}, total {:.1}, p95 {}",
            self.mean_retrieval_ms, self.mean_generation_ms, self.mean_total_ms, self.p95_total_ms
        )?;
        writeln!(f, "  Confidence:   {:.3}", self.mean_confidence)?;
        writeln!(f, "  Faithfulness: {}", opt(self.mean_faithfulness))?;
        writeln!(f, "  Relevance:    {}", opt(self.mean_relevance))?;
        if !self.buckets.is_empty() {
            writeln!(f)?;
            writeln!(f, "  {:<12} {:>6}", "QUALITY", "COUNT")?;
            for (bucket, count) in &self.buckets {
                writeln!(f, "  {:<12} {:>6}", bucket.as_str(), count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: &str, total_ms: u64, faithfulness: Option<f64>, quality: QualityBucket) -> MetricRecord {
        MetricRecord {
            query_id: id.to_string(),
            timestamp: Utc::now(),
            question: "q".to_string(),
            retrieved: 5,
            chunks_used: 3,
            retrieval_ms: 10,
            generation_ms: total_ms.saturating_sub(10),
            total_ms,
            confidence: 0.6,
            faithfulness,
            relevance: faithfulness,
            quality,
            background: false,
            error: None,
        }
    }

    #[test]
    fn test_record_appends_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/metrics.jsonl");
        let recorder = MetricsRecorder::open(&path).unwrap();
        recorder.record(record("a", 100, Some(0.8), QualityBucket::High)).unwrap();
        recorder.record(record("b", 200, None, QualityBucket::Pending)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded, recorder.records());
        assert_eq!(recorder.find("b").unwrap().quality, QualityBucket::Pending);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        MetricsRecorder::open(&path)
            .unwrap()
            .record(record("a", 1, None, QualityBucket::Pending))
            .unwrap();
        MetricsRecorder::open(&path)
            .unwrap()
            .record(record("b", 2, None, QualityBucket::Pending))
            .unwrap();
        assert_eq!(load_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let good = serde_json::to_string(&record("a", 5, None, QualityBucket::Error)).unwrap();
        std::fs::write(&path, format!("{}\n{{not json\n\n", good)).unwrap();
        assert_eq!(load_records(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_line_delimited() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let recorder = Arc::new(MetricsRecorder::open(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let recorder = Arc::clone(&recorder);
            handles.push(tokio::spawn(async move {
                recorder
                    .record(record(&format!("q{}", i), i, Some(0.5), QualityBucket::Medium))
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 32);
    }

    #[test]
    fn test_summary() {
        let mut records: Vec<MetricRecord> = (1..=20)
            .map(|i| record(&i.to_string(), i * 10, Some(0.5), QualityBucket::Medium))
            .collect();
        records[0].faithfulness = None;
        records[0].relevance = None;
        records[0].quality = QualityBucket::Pending;
        records[1].error = Some("generation timed out after 1s".to_string());
        records[1].quality = QualityBucket::Error;

        let summary = MetricsSummary::from_records(&records);
        assert_eq!(summary.total_queries, 20);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.p95_total_ms, 190);
        assert!((summary.mean_total_ms - 105.0).abs() < 1e-9);
        assert_eq!(summary.mean_faithfulness, Some(0.5));
        assert_eq!(summary.buckets[&QualityBucket::Medium], 18);
        assert_eq!(summary.buckets[&QualityBucket::Pending], 1);
        assert!(summary.to_string().contains("medium"));
    }

    #[test]
    fn test_summary_empty() {
        let summary = MetricsRecorder::in_memory().summary();
        assert_eq!(summary.total_queries, 0);
        assert_eq!(summary.mean_faithfulness, None);
    }
}
