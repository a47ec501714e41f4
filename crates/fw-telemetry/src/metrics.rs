use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MetricsSink: the narrow interface the agent runtime reports through
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metrics store poisoned")]
    Poisoned,
    #[error("invalid metric value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("metrics backend unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget metric recording keyed by agent.
///
/// Callers log and drop errors; a failing sink never changes agent behaviour.
pub trait MetricsSink: Send + Sync {
    fn record(
        &self,
        agent_id: Uuid,
        name: &str,
        value: f64,
        kind: MetricKind,
        tags: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Drop every series recorded for `agent_id`.
    fn clear_agent(&self, agent_id: Uuid) -> Result<(), MetricsError>;
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(
        &self,
        _agent_id: Uuid,
        _name: &str,
        _value: f64,
        _kind: MetricKind,
        _tags: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        Ok(())
    }

    fn clear_agent(&self, _agent_id: Uuid) -> Result<(), MetricsError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// A histogram that tracks the distribution of observed values across buckets.
#[derive(Debug)]
pub struct Histogram {
    pub buckets: Vec<f64>,
    pub counts: Vec<AtomicU64>,
    pub sum: AtomicU64,
    pub count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        // Sum is stored as f64 bits.
        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        for (i, boundary) in self.buckets.iter().enumerate() {
            if value <= *boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Task/skill duration buckets (in seconds).
fn default_duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A sorted list of key=value pairs distinguishing series of one metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    fn for_agent(agent_id: Uuid, tags: &[(&str, &str)]) -> Self {
        let id = agent_id.to_string();
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(tags.len() + 1);
        pairs.push(("agent_id", id.as_str()));
        pairs.extend(tags.iter().filter(|(k, _)| *k != "agent_id"));
        Self::new(&pairs)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    fn has(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|(k, v)| k == key && v == value)
    }

    /// Format labels as `{key="value",key2="value2"}` for Prometheus output.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

type SeriesKey = (String, Labels);

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// In-process metrics store: counters, gauges and histograms, each series
/// labelled with the owning agent.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<SeriesKey, AtomicU64>>,
    gauges: RwLock<AHashMap<SeriesKey, AtomicU64>>,
    histograms: RwLock<AHashMap<SeriesKey, Histogram>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Counters -----------------------------------------------------------

    pub fn increment_counter_by(&self, name: &str, labels: Labels, amount: u64) -> Result<(), MetricsError> {
        let key = (name.to_string(), labels);
        {
            let map = self.counters.read().map_err(|_| MetricsError::Poisoned)?;
            if let Some(c) = map.get(&key) {
                c.fetch_add(amount, Ordering::Relaxed);
                return Ok(());
            }
        }
        let mut map = self.counters.write().map_err(|_| MetricsError::Poisoned)?;
        map.entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
        Ok(())
    }

    pub fn get_counter(&self, name: &str, labels: &Labels) -> u64 {
        let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
        map.get(&(name.to_string(), labels.clone()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of a counter across every series for one agent.
    pub fn agent_counter_total(&self, agent_id: Uuid, name: &str) -> u64 {
        let id = agent_id.to_string();
        let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .filter(|((n, l), _)| n == name && l.has("agent_id", &id))
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    // -- Gauges -------------------------------------------------------------

    pub fn set_gauge(&self, name: &str, labels: Labels, value: f64) -> Result<(), MetricsError> {
        let key = (name.to_string(), labels);
        {
            let map = self.gauges.read().map_err(|_| MetricsError::Poisoned)?;
            if let Some(g) = map.get(&key) {
                g.store(value.to_bits(), Ordering::Relaxed);
                return Ok(());
            }
        }
        let mut map = self.gauges.write().map_err(|_| MetricsError::Poisoned)?;
        map.entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn get_gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        let map = self.gauges.read().unwrap_or_else(|e| e.into_inner());
        map.get(&(name.to_string(), labels.clone()))
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    // -- Histograms ---------------------------------------------------------

    pub fn record_histogram(&self, name: &str, labels: Labels, value: f64) -> Result<(), MetricsError> {
        let key = (name.to_string(), labels);
        {
            let map = self.histograms.read().map_err(|_| MetricsError::Poisoned)?;
            if let Some(h) = map.get(&key) {
                h.observe(value);
                return Ok(());
            }
        }
        let mut map = self.histograms.write().map_err(|_| MetricsError::Poisoned)?;
        map.entry(key)
            .or_insert_with(|| Histogram::new(default_duration_buckets()))
            .observe(value);
        Ok(())
    }

    pub fn histogram_count(&self, name: &str, labels: &Labels) -> u64 {
        let map = self.histograms.read().unwrap_or_else(|e| e.into_inner());
        map.get(&(name.to_string(), labels.clone()))
            .map(|h| h.get_count())
            .unwrap_or(0)
    }

    /// Number of series (of any kind) labelled with `agent_id`.
    pub fn series_for_agent(&self, agent_id: Uuid) -> usize {
        let id = agent_id.to_string();
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        let gauges = self.gauges.read().unwrap_or_else(|e| e.into_inner());
        let histograms = self.histograms.read().unwrap_or_else(|e| e.into_inner());
        counters.keys().filter(|(_, l)| l.has("agent_id", &id)).count()
            + gauges.keys().filter(|(_, l)| l.has("agent_id", &id)).count()
            + histograms.keys().filter(|(_, l)| l.has("agent_id", &id)).count()
    }

    // -- Export --------------------------------------------------------------

    /// Export all metrics in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        {
            let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
            let mut keys: Vec<&SeriesKey> = map.keys().collect();
            keys.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1 .0.cmp(&b.1 .0)));
            let mut last: Option<&str> = None;
            for key in keys {
                if last != Some(key.0.as_str()) {
                    out.push_str(&format!("# TYPE {} counter\n", key.0));
                    last = Some(key.0.as_str());
                }
                let v = map[key].load(Ordering::Relaxed);
                out.push_str(&format!("{}{} {}\n", key.0, key.1.prometheus_str(), v));
            }
        }

        {
            let map = self.gauges.read().unwrap_or_else(|e| e.into_inner());
            let mut keys: Vec<&SeriesKey> = map.keys().collect();
            keys.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1 .0.cmp(&b.1 .0)));
            let mut last: Option<&str> = None;
            for key in keys {
                if last != Some(key.0.as_str()) {
                    out.push_str(&format!("# TYPE {} gauge\n", key.0));
                    last = Some(key.0.as_str());
                }
                let v = f64::from_bits(map[key].load(Ordering::Relaxed));
                out.push_str(&format!("{}{} {}\n", key.0, key.1.prometheus_str(), v));
            }
        }

        {
            let map = self.histograms.read().unwrap_or_else(|e| e.into_inner());
            let mut keys: Vec<&SeriesKey> = map.keys().collect();
            keys.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1 .0.cmp(&b.1 .0)));
            let mut last: Option<&str> = None;
            for key in keys {
                if last != Some(key.0.as_str()) {
                    out.push_str(&format!("# TYPE {} histogram\n", key.0));
                    last = Some(key.0.as_str());
                }
                let h = &map[key];
                let labels = key.1.prometheus_str();
                out.push_str(&format!("{}_sum{} {}\n", key.0, labels, h.get_sum()));
                out.push_str(&format!("{}_count{} {}\n", key.0, labels, h.get_count()));
            }
        }

        out
    }

    /// Export all metrics as a JSON value.
    pub fn export_json(&self) -> serde_json::Value {
        let mut counters_json = serde_json::Map::new();
        {
            let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
            for ((name, labels), val) in map.iter() {
                counters_json.insert(
                    format!("{}{}", name, labels.prometheus_str()),
                    serde_json::json!(val.load(Ordering::Relaxed)),
                );
            }
        }

        let mut gauges_json = serde_json::Map::new();
        {
            let map = self.gauges.read().unwrap_or_else(|e| e.into_inner());
            for ((name, labels), val) in map.iter() {
                gauges_json.insert(
                    format!("{}{}", name, labels.prometheus_str()),
                    serde_json::json!(f64::from_bits(val.load(Ordering::Relaxed))),
                );
            }
        }

        let mut histograms_json = serde_json::Map::new();
        {
            let map = self.histograms.read().unwrap_or_else(|e| e.into_inner());
            for ((name, labels), h) in map.iter() {
                histograms_json.insert(
                    format!("{}{}", name, labels.prometheus_str()),
                    serde_json::json!({ "sum": h.get_sum(), "count": h.get_count() }),
                );
            }
        }

        serde_json::json!({
            "counters": counters_json,
            "gauges": gauges_json,
            "histograms": histograms_json,
        })
    }
}

impl MetricsSink for MetricsCollector {
    fn record(
        &self,
        agent_id: Uuid,
        name: &str,
        value: f64,
        kind: MetricKind,
        tags: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        let labels = Labels::for_agent(agent_id, tags);
        match kind {
            MetricKind::Counter => {
                if value < 0.0 {
                    return Err(MetricsError::InvalidValue {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                self.increment_counter_by(name, labels, value.round() as u64)
            }
            MetricKind::Gauge => self.set_gauge(name, labels, value),
            MetricKind::Histogram => self.record_histogram(name, labels, value),
        }
    }

    fn clear_agent(&self, agent_id: Uuid) -> Result<(), MetricsError> {
        let id = agent_id.to_string();
        self.counters
            .write()
            .map_err(|_| MetricsError::Poisoned)?
            .retain(|(_, l), _| !l.has("agent_id", &id));
        self.gauges
            .write()
            .map_err(|_| MetricsError::Poisoned)?
            .retain(|(_, l), _| !l.has("agent_id", &id));
        self.histograms
            .write()
            .map_err(|_| MetricsError::Poisoned)?
            .retain(|(_, l), _| !l.has("agent_id", &id));
        Ok(())
    }
}
