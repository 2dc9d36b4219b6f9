//! Prometheus-compatible metric primitives.
//!
//! Counters, gauges, and histograms with label dimensions. Increments are
//! atomic; the map of label sets is guarded by a read-write lock taken for
//! writing only when a new label combination first appears.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Escape a label value per the Prometheus exposition format.
#[must_use]
pub fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_labels(names: &[&'static str], values: &[String]) -> String {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Atomic f64 cell, stored as bits.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn add(&self, value: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = f64::from_bits(current) + value;
            match self.0.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// A monotonically increasing counter with label dimensions.
#[derive(Debug, Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

#[derive(Debug)]
struct CounterInner {
    name: &'static str,
    help: &'static str,
    label_names: Vec<&'static str>,
    values: RwLock<BTreeMap<Vec<String>, AtomicU64>>,
}

impl Counter {
    #[must_use]
    pub fn new(name: &'static str, help: &'static str, label_names: &[&'static str]) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                name,
                help,
                label_names: label_names.to_vec(),
                values: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Increment the counter for a label combination.
    pub fn inc(&self, labels: &[&str]) {
        self.add(1, labels);
    }

    /// Add an amount to the counter for a label combination.
    pub fn add(&self, amount: u64, labels: &[&str]) {
        debug_assert_eq!(labels.len(), self.inner.label_names.len());
        let key: Vec<String> = labels.iter().map(|s| (*s).to_string()).collect();

        {
            let values = self.inner.values.read().expect("counter poisoned");
            if let Some(cell) = values.get(&key) {
                cell.fetch_add(amount, Ordering::Relaxed);
                return;
            }
        }

        let mut values = self.inner.values.write().expect("counter poisoned");
        values
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value for a label combination.
    #[must_use]
    pub fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|s| (*s).to_string()).collect();
        self.inner
            .values
            .read()
            .expect("counter poisoned")
            .get(&key)
            .map_or(0, |cell| cell.load(Ordering::Relaxed))
    }

    /// Sum over all label combinations.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.inner
            .values
            .read()
            .expect("counter poisoned")
            .values()
            .map(|cell| cell.load(Ordering::Relaxed))
            .sum()
    }

    /// Render HELP/TYPE lines and one sample per label combination.
    #[must_use]
    pub fn render(&self) -> String {
        let inner = &self.inner;
        let mut lines = vec![
            format!("# HELP {} {}", inner.name, inner.help),
            format!("# TYPE {} counter", inner.name),
        ];
        let values = inner.values.read().expect("counter poisoned");
        if values.is_empty() && inner.label_names.is_empty() {
            lines.push(format!("{} 0", inner.name));
        }
        for (key, cell) in values.iter() {
            let value = cell.load(Ordering::Relaxed);
            if inner.label_names.is_empty() {
                lines.push(format!("{} {value}", inner.name));
            } else {
                lines.push(format!(
                    "{}{{{}}} {value}",
                    inner.name,
                    render_labels(&inner.label_names, key)
                ));
            }
        }
        lines.join("\n")
    }
}

/// A gauge that can go up and down.
#[derive(Debug, Clone)]
pub struct Gauge {
    inner: Arc<GaugeInner>,
}

#[derive(Debug)]
struct GaugeInner {
    name: &'static str,
    help: &'static str,
    value: AtomicF64,
}

impl Gauge {
    #[must_use]
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            inner: Arc::new(GaugeInner {
                name,
                help,
                value: AtomicF64::default(),
            }),
        }
    }

    pub fn set(&self, value: f64) {
        self.inner.value.set(value);
    }

    pub fn add(&self, delta: f64) {
        self.inner.value.add(delta);
    }

    #[must_use]
    pub fn get(&self) -> f64 {
        self.inner.value.get()
    }

    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}",
            name = self.inner.name,
            help = self.inner.help,
            value = self.inner.value.get()
        )
    }
}

/// Default buckets for tool durations, in seconds.
pub const DEFAULT_DURATION_BUCKETS: &[f64] =
    &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// A histogram with cumulative buckets and label dimensions.
#[derive(Debug, Clone)]
pub struct Histogram {
    inner: Arc<HistogramInner>,
}

#[derive(Debug)]
struct HistogramInner {
    name: &'static str,
    help: &'static str,
    label_names: Vec<&'static str>,
    buckets: Vec<f64>,
    series: RwLock<BTreeMap<Vec<String>, HistogramSeries>>,
}

#[derive(Debug)]
struct HistogramSeries {
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicF64,
    count: AtomicU64,
}

impl HistogramSeries {
    fn new(bucket_count: usize) -> Self {
        Self {
            bucket_counts: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicF64::default(),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, buckets: &[f64], value: f64) {
        for (i, bound) in buckets.iter().enumerate() {
            if value <= *bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum.add(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Histogram {
    #[must_use]
    pub fn new(
        name: &'static str,
        help: &'static str,
        label_names: &[&'static str],
        buckets: &[f64],
    ) -> Self {
        let mut buckets = buckets.to_vec();
        buckets.sort_by(|a, b| a.partial_cmp(b).expect("bucket bounds are finite"));
        Self {
            inner: Arc::new(HistogramInner {
                name,
                help,
                label_names: label_names.to_vec(),
                buckets,
                series: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: f64, labels: &[&str]) {
        debug_assert_eq!(labels.len(), self.inner.label_names.len());
        let key: Vec<String> = labels.iter().map(|s| (*s).to_string()).collect();

        {
            let series = self.inner.series.read().expect("histogram poisoned");
            if let Some(s) = series.get(&key) {
                s.observe(&self.inner.buckets, value);
                return;
            }
        }

        let mut series = self.inner.series.write().expect("histogram poisoned");
        series
            .entry(key)
            .or_insert_with(|| HistogramSeries::new(self.inner.buckets.len()))
            .observe(&self.inner.buckets, value);
    }

    /// Total observation count across label combinations.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.inner
            .series
            .read()
            .expect("histogram poisoned")
            .values()
            .map(|s| s.count.load(Ordering::Relaxed))
            .sum()
    }

    /// Cumulative count at or below a bucket bound, for one label set.
    #[must_use]
    pub fn bucket_count(&self, bound: f64, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|s| (*s).to_string()).collect();
        let idx = self.inner.buckets.iter().position(|b| *b == bound);
        let series = self.inner.series.read().expect("histogram poisoned");
        match (idx, series.get(&key)) {
            (Some(i), Some(s)) => s.bucket_counts[i].load(Ordering::Relaxed),
            _ => 0,
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let inner = &self.inner;
        let mut lines = vec![
            format!("# HELP {} {}", inner.name, inner.help),
            format!("# TYPE {} histogram", inner.name),
        ];

        let series = inner.series.read().expect("histogram poisoned");
        for (key, s) in series.iter() {
            let base = if inner.label_names.is_empty() {
                String::new()
            } else {
                render_labels(&inner.label_names, key)
            };

            for (i, bound) in inner.buckets.iter().enumerate() {
                let count = s.bucket_counts[i].load(Ordering::Relaxed);
                let le = format!("le=\"{bound}\"");
                let labels = if base.is_empty() {
                    le
                } else {
                    format!("{base},{le}")
                };
                lines.push(format!("{}_bucket{{{labels}}} {count}", inner.name));
            }
            let total = s.count.load(Ordering::Relaxed);
            let inf_labels = if base.is_empty() {
                "le=\"+Inf\"".to_string()
            } else {
                format!("{base},le=\"+Inf\"")
            };
            lines.push(format!("{}_bucket{{{inf_labels}}} {total}", inner.name));

            if base.is_empty() {
                lines.push(format!("{}_sum {}", inner.name, s.sum.get()));
                lines.push(format!("{}_count {total}", inner.name));
            } else {
                lines.push(format!("{}_sum{{{base}}} {}", inner.name, s.sum.get()));
                lines.push(format!("{}_count{{{base}}} {total}", inner.name));
            }
        }

        lines.join("\n")
    }
}
