//! Scalar and histogram event sinks.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const HISTOGRAM_BINS: usize = 30;

/// Destination for training telemetry, opened once per run and closed at the end.
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> anyhow::Result<()>;

    fn add_histogram(&mut self, tag: &str, values: &[f32], step: u64) -> anyhow::Result<()>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    /// Right edges of equal-width buckets between `min` and `max`.
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

impl HistogramSummary {
    pub fn from_values(values: &[f32], bins: usize) -> Self {
        let bins = bins.max(1);
        if values.is_empty() {
            return Self {
                count: 0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
                bucket_limits: Vec::new(),
                bucket_counts: Vec::new(),
            };
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for v in values {
            let v = *v as f64;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let count = values.len();
        let mean = sum / count as f64;
        let var = values
            .iter()
            .map(|v| (*v as f64 - mean).powi(2))
            .sum::<f64>()
            / count as f64;

        let width = (max - min) / bins as f64;
        let mut bucket_counts = vec![0u64; bins];
        for v in values {
            let idx = if width > 0.0 {
                (((*v as f64 - min) / width) as usize).min(bins - 1)
            } else {
                0
            };
            bucket_counts[idx] += 1;
        }
        let bucket_limits = (1..=bins).map(|i| min + width * i as f64).collect();
        Self {
            count,
            min,
            max,
            mean,
            std: var.sqrt(),
            bucket_limits,
            bucket_counts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricEvent {
    Scalar {
        tag: String,
        value: f64,
        step: u64,
        wall_time: f64,
    },
    Histogram {
        tag: String,
        step: u64,
        wall_time: f64,
        summary: HistogramSummary,
    },
}

fn wall_time() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Appends one JSON object per event to `events.jsonl` under the run's log directory.
pub struct JsonlMetricsWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlMetricsWriter {
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let path = dir.join("events.jsonl");
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        log::info!("writing metrics to {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &MetricEvent) -> anyhow::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("metrics writer {} is closed", self.path.display()))?;
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl MetricsSink for JsonlMetricsWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> anyhow::Result<()> {
        self.write_event(&MetricEvent::Scalar {
            tag: tag.to_string(),
            value,
            step,
            wall_time: wall_time(),
        })
    }

    fn add_histogram(&mut self, tag: &str, values: &[f32], step: u64) -> anyhow::Result<()> {
        self.write_event(&MetricEvent::Histogram {
            tag: tag.to_string(),
            step,
            wall_time: wall_time(),
            summary: HistogramSummary::from_values(values, HISTOGRAM_BINS),
        })
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonlMetricsWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to flush {}: {e}", self.path.display());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub tag: String,
    pub value: f64,
    pub step: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramRecord {
    pub tag: String,
    pub len: usize,
    pub step: u64,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    pub scalars: Vec<ScalarRecord>,
    pub histograms: Vec<HistogramRecord>,
    pub closed: bool,
}

impl MemoryMetrics {
    pub fn scalars_tagged(&self, tag: &str) -> Vec<&ScalarRecord> {
        self.scalars.iter().filter(|s| s.tag == tag).collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> anyhow::Result<()> {
        self.scalars.push(ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn add_histogram(&mut self, tag: &str, values: &[f32], step: u64) -> anyhow::Result<()> {
        self.histograms.push(HistogramRecord {
            tag: tag.to_string(),
            len: values.len(),
            step,
        });
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}
