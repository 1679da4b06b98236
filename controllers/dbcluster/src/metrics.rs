//! Prometheus metrics for reconciles and admission requests

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Controller metrics, registered on a private registry served at `/metrics`.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Reconciles by outcome (`ok`, `error`, `config_error`)
    pub reconciles_total: IntCounterVec,
    pub reconcile_duration_seconds: HistogramVec,
    /// Component phase transitions by component and new phase
    pub phase_transitions_total: IntCounterVec,
    /// Admission requests by endpoint and verdict
    pub admission_requests_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("dbops".to_string()), None)?;

        let reconciles_total = IntCounterVec::new(
            Opts::new("reconciles_total", "DbCluster reconciles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciles_total.clone()))?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new("reconcile_duration_seconds", "DbCluster reconcile duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        let phase_transitions_total = IntCounterVec::new(
            Opts::new("component_phase_transitions_total", "Component phase transitions"),
            &["component", "phase"],
        )?;
        registry.register(Box::new(phase_transitions_total.clone()))?;

        let admission_requests_total = IntCounterVec::new(
            Opts::new("admission_requests_total", "Admission requests by verdict"),
            &["endpoint", "verdict"],
        )?;
        registry.register(Box::new(admission_requests_total.clone()))?;

        Ok(Self {
            registry,
            reconciles_total,
            reconcile_duration_seconds,
            phase_transitions_total,
            admission_requests_total,
        })
    }

    pub fn observe_reconcile(&self, outcome: &str, seconds: f64) {
        self.reconciles_total.with_label_values(&[outcome]).inc();
        self.reconcile_duration_seconds
            .with_label_values(&[outcome])
            .observe(seconds);
    }

    pub fn observe_admission(&self, endpoint: &str, allowed: bool) {
        let verdict = if allowed { "allowed" } else { "denied" };
        self.admission_requests_total
            .with_label_values(&[endpoint, verdict])
            .inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
