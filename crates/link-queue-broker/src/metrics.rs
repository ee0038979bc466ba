use link_queue_core::Outcome;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Settled requests by outcome
    pub requests_total: IntCounterVec,
    pub enqueued_total: IntCounter,

    pub queue_depth: IntGauge,

    // Availability probe results
    pub probe_checks_total: IntCounterVec,

    pub cycle_duration: Histogram,

    // Mirrors the queue's own counter, refreshed at scrape time
    pub persist_failures_total: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("lq_requests_total", "Settled linking requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let enqueued_total = IntCounter::new("lq_enqueued_total", "Requests accepted into the queue")?;
        registry.register(Box::new(enqueued_total.clone()))?;

        let queue_depth = IntGauge::new("lq_queue_depth", "Number of queued requests")?;
        registry.register(Box::new(queue_depth.clone()))?;

        let probe_checks_total = IntCounterVec::new(
            Opts::new("lq_probe_checks_total", "Availability probe checks by result"),
            &["result"],
        )?;
        registry.register(Box::new(probe_checks_total.clone()))?;

        let cycle_duration = Histogram::with_opts(HistogramOpts::new(
            "lq_cycle_duration_seconds",
            "Duration of processor cycles in seconds",
        ))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let persist_failures_total = IntGauge::new(
            "lq_persist_failures_total",
            "Queue snapshot writes that failed since start",
        )?;
        registry.register(Box::new(persist_failures_total.clone()))?;

        Ok(BrokerMetrics {
            registry,
            requests_total,
            enqueued_total,
            queue_depth,
            probe_checks_total,
            cycle_duration,
            persist_failures_total,
        })
    }

    pub fn inc_requests_total(&self, outcome: Outcome) {
        self.requests_total.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn inc_probe_checks(&self, available: bool) {
        let result = if available { "available" } else { "unavailable" };
        self.probe_checks_total.with_label_values(&[result]).inc();
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.cycle_duration.observe(duration_secs);
    }

    /// Refresh the gauges derived from queue state
    pub fn update_queue(&self, depth: usize, persist_failures: u64) {
        self.queue_depth.set(depth as i64);
        self.persist_failures_total.set(persist_failures as i64);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
