//! Prometheus metrics for autoscaler decisions

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Evaluations by component and decision
    pub decisions_total: IntCounterVec,
    /// Satellite writes by component, action and result
    pub actions_total: IntCounterVec,
    /// Last sampled utilization ratio
    pub utilization: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("dbops_autoscaler".to_string()), None)?;

        let decisions_total = IntCounterVec::new(
            Opts::new("decisions_total", "Autoscaler evaluations by decision"),
            &["component", "decision"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let actions_total = IntCounterVec::new(
            Opts::new("actions_total", "Satellite create/scale/delete actions"),
            &["component", "action", "result"],
        )?;
        registry.register(Box::new(actions_total.clone()))?;

        let utilization = GaugeVec::new(
            Opts::new("utilization_ratio", "Last sampled usage/quota ratio"),
            &["autoscaler", "component", "resource"],
        )?;
        registry.register(Box::new(utilization.clone()))?;

        Ok(Self {
            registry,
            decisions_total,
            actions_total,
            utilization,
        })
    }

    pub fn observe_action(&self, component: &str, action: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.actions_total
            .with_label_values(&[component, action, result])
            .inc();
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
