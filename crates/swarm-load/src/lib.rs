//! Weighted load scoring, ring-buffered trend detection, and offload
//! threshold notification.

use std::collections::VecDeque;

use tokio::sync::{broadcast, RwLock};
use tracing::trace;

fn clip01(x: f64) -> f64 {
    x.max(0.0).min(1.0)
}

/// Weighting applied to each normalized input; the core spec requires
/// these to sum to 1.0, though nothing here enforces it at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadWeights {
    pub cpu: f64,
    pub memory: f64,
    pub session: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        Self {
            cpu: 0.3,
            memory: 0.3,
            session: 0.4,
        }
    }
}

/// Normalization ceilings: an observed value at or above its cap clips
/// to a norm of 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadCaps {
    pub max_cpu_cores: f64,
    pub max_memory_bytes: u64,
    pub max_goroutines: u32,
    pub max_sessions: u32,
}

impl Default for LoadCaps {
    fn default() -> Self {
        Self {
            max_cpu_cores: 1.0,
            max_memory_bytes: 1024 * 1024 * 1024,
            max_goroutines: 1000,
            max_sessions: 100,
        }
    }
}

/// A raw sample of this node's resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadObservation {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub goroutines: u32,
    pub sessions: u32,
}

/// `clip01(CPUWeight*cpuNorm + MemoryWeight*memNorm + SessionWeight*sessionNorm)`.
/// `goroutines` is tracked in [`LoadCaps`] but does not enter the score,
/// matching the weighted formula (CPU/Memory/Session only).
#[must_use]
pub fn score(obs: &LoadObservation, caps: &LoadCaps, weights: &LoadWeights) -> f64 {
    let cpu_norm = clip01(obs.cpu_cores / caps.max_cpu_cores.max(f64::MIN_POSITIVE));
    let mem_norm = clip01(obs.memory_bytes as f64 / caps.max_memory_bytes.max(1) as f64);
    let session_norm = clip01(obs.sessions as f64 / f64::from(caps.max_sessions.max(1)));
    clip01(weights.cpu * cpu_norm + weights.memory * mem_norm + weights.session * session_norm)
}

/// `increasing` above this slope, `decreasing` below its negation, else
/// `stable`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendThresholds {
    pub increasing: f64,
    pub decreasing: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            increasing: 0.01,
            decreasing: -0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Maintains a bounded ring of recent scores and notifies listeners when
/// `should_offload` transitions from false to true. A channel, not a
/// callback list, carries the notification so a slow or reentrant
/// listener can't block the sampler.
pub struct LoadMonitor {
    samples: RwLock<VecDeque<f64>>,
    sample_size: usize,
    offload_threshold: f64,
    trend: TrendThresholds,
    offload_tx: broadcast::Sender<f64>,
    was_offloading: std::sync::atomic::AtomicBool,
}

impl LoadMonitor {
    #[must_use]
    pub fn new(sample_size: usize, offload_threshold: f64, trend: TrendThresholds) -> Self {
        let (offload_tx, _) = broadcast::channel(32);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(sample_size.max(1))),
            sample_size: sample_size.max(1),
            offload_threshold,
            trend,
            offload_tx,
            was_offloading: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn subscribe_offload(&self) -> broadcast::Receiver<f64> {
        self.offload_tx.subscribe()
    }

    /// Record a new score sample, evicting the oldest if the ring is
    /// full. Returns the resulting `should_offload` verdict and fires the
    /// offload channel on a false-to-true transition.
    pub async fn record(&self, current: f64) -> bool {
        let mut samples = self.samples.write().await;
        if samples.len() >= self.sample_size {
            samples.pop_front();
        }
        samples.push_back(current);
        let average = Self::average_locked(&samples, current);
        drop(samples);

        let offloading = 0.7 * current + 0.3 * average > self.offload_threshold;
        let was = self.was_offloading.swap(offloading, std::sync::atomic::Ordering::SeqCst);
        if offloading && !was {
            let _ = self.offload_tx.send(current);
            trace!(current, average, "load monitor entering offload state");
        }
        offloading
    }

    fn average_locked(samples: &VecDeque<f64>, fallback_current: f64) -> f64 {
        if samples.is_empty() {
            return fallback_current;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    pub async fn average(&self, current: f64) -> f64 {
        let samples = self.samples.read().await;
        Self::average_locked(&samples, current)
    }

    pub async fn should_offload(&self, current: f64) -> bool {
        let average = self.average(current).await;
        0.7 * current + 0.3 * average > self.offload_threshold
    }

    /// Least-squares slope of the ring against sample index.
    pub async fn trend(&self) -> Trend {
        let samples = self.samples.read().await;
        if samples.len() < 2 {
            return Trend::Stable;
        }
        let n = samples.len() as f64;
        let xs: Vec<f64> = (0..samples.len()).map(|i| i as f64).collect();
        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = samples.iter().sum::<f64>() / n;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (x, y) in xs.iter().zip(samples.iter()) {
            numerator += (x - x_mean) * (y - y_mean);
            denominator += (x - x_mean).powi(2);
        }
        if denominator == 0.0 {
            return Trend::Stable;
        }
        let slope = numerator / denominator;
        if slope > self.trend.increasing {
            Trend::Increasing
        } else if slope < self.trend.decreasing {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}
