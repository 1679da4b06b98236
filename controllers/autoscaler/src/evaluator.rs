//! # Scaling Decisions
//!
//! Pure decision logic of the autoscaler loop. Given the sampled utilization,
//! the current satellite and the timers kept in the autoscaler status, decide
//! what to do this tick. Nothing here talks to the cluster.
//!
//! Utilization is classified with hysteresis:
//! - any rule at or above its `maxThreshold` scales out
//! - every rule with data at or below its `minThreshold` scales in
//! - anything in between holds and resets the floor timer
//!
//! A satellite that sits at its replica floor with low utilization for the
//! whole decommission window is deleted.

use chrono::{DateTime, Duration, Utc};
use crds::quantity::parse_quantity;
use crds::{AutoResource, AutoRule, AutoScalerComponentStatus, ComponentAutoScalerSpec, NoDataPolicy};
use std::collections::BTreeMap;
use std::fmt;

/// Utilization relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    AboveMax,
    BelowMin,
    MidBand,
    NoData,
}

/// Classify samples against `rules`. Rules without a sample are ignored.
pub fn classify(rules: &BTreeMap<String, AutoRule>, samples: &BTreeMap<String, f64>) -> Signal {
    let observed: Vec<_> = rules
        .iter()
        .filter_map(|(name, rule)| samples.get(name).map(|value| (rule, *value)))
        .collect();
    if observed.is_empty() {
        return Signal::NoData;
    }
    if observed.iter().any(|(rule, value)| *value >= rule.max_threshold) {
        return Signal::AboveMax;
    }
    let all_low = observed
        .iter()
        .all(|(rule, value)| rule.min_threshold.is_some_and(|min| *value <= min));
    if all_low { Signal::BelowMin } else { Signal::MidBand }
}

/// Scaling parameters of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub profile_name: String,
    pub profile: AutoResource,
    pub scale_in_interval: Duration,
    pub scale_out_interval: Duration,
    pub decommission_interval: Duration,
    pub no_data: NoDataPolicy,
}

impl Policy {
    pub fn from_spec(spec: &ComponentAutoScalerSpec) -> Result<Self, String> {
        let (name, profile) = spec
            .primary_profile()
            .ok_or_else(|| "no resource profile configured".to_string())?;
        let quantities = [
            ("cpu", Some(profile.cpu.as_str())),
            ("memory", Some(profile.memory.as_str())),
            ("storage", profile.storage.as_deref()),
        ];
        let invalid = quantities
            .into_iter()
            .find_map(|(field, value)| value.filter(|v| parse_quantity(v).is_none()).map(|v| (field, v)));
        if let Some((field, value)) = invalid {
            return Err(format!("resource profile {} {}: invalid quantity {:?}", name, field, value));
        }
        Ok(Self {
            profile_name: name.clone(),
            profile: profile.clone(),
            scale_in_interval: Duration::seconds(spec.scale_in_interval_seconds()),
            scale_out_interval: Duration::seconds(spec.scale_out_interval_seconds()),
            decommission_interval: Duration::seconds(spec.decommission_interval_seconds()),
            no_data: spec.no_data_policy,
        })
    }

    pub fn floor(&self) -> i32 {
        self.profile.floor()
    }

    /// Replica ceiling, never below the floor.
    pub fn ceiling(&self) -> i32 {
        self.profile
            .max_replicas
            .map_or(i32::MAX, |max| max.max(self.floor()))
    }

    /// Rules that apply to this policy's profile.
    pub fn applicable_rules(&self, rules: &BTreeMap<String, AutoRule>) -> BTreeMap<String, AutoRule> {
        rules
            .iter()
            .filter(|(_, rule)| {
                rule.resource_types.is_empty() || rule.resource_types.contains(&self.profile_name)
            })
            .map(|(name, rule)| (name.clone(), rule.clone()))
            .collect()
    }
}

/// What the loop knows about the current satellite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatelliteView {
    pub replicas: i32,
    pub healthy: bool,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create { replicas: i32 },
    ScaleOut { from: i32, to: i32 },
    ScaleIn { from: i32, to: i32 },
    Decommission,
    Hold(String),
}

impl Decision {
    /// Metric label of the decision.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Create { .. } => "create",
            Decision::ScaleOut { .. } => "scale_out",
            Decision::ScaleIn { .. } => "scale_in",
            Decision::Decommission => "decommission",
            Decision::Hold(_) => "hold",
        }
    }

    pub fn is_action(&self) -> bool {
        !matches!(self, Decision::Hold(_))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Create { replicas } => write!(f, "create satellite with {} replicas", replicas),
            Decision::ScaleOut { from, to } => write!(f, "scale out from {} to {}", from, to),
            Decision::ScaleIn { from, to } => write!(f, "scale in from {} to {}", from, to),
            Decision::Decommission => f.write_str("decommission satellite"),
            Decision::Hold(reason) => write!(f, "hold: {}", reason),
        }
    }
}

fn elapsed(since: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
    since.is_none_or(|t| now - t >= interval)
}

/// Decide the action for this tick.
///
/// Updates the floor and pending timers in `status`; the caller records
/// `lastScaleTime` once an action has been applied.
pub fn decide(
    policy: &Policy,
    status: &mut AutoScalerComponentStatus,
    satellite: Option<SatelliteView>,
    signal: Signal,
    now: DateTime<Utc>,
) -> Decision {
    if let Some(view) = satellite {
        if !view.healthy {
            return Decision::Hold("waiting for satellite to become healthy".to_string());
        }
        status.pending_since = None;
    }

    let signal = match (signal, policy.no_data) {
        (Signal::NoData, NoDataPolicy::Hold) => return Decision::Hold("no utilization data".to_string()),
        (Signal::NoData, NoDataPolicy::TreatAsIdle) => Signal::BelowMin,
        (signal, _) => signal,
    };

    match (signal, satellite) {
        (Signal::AboveMax, None) => {
            status.floor_since = None;
            Decision::Create {
                replicas: policy.floor().min(policy.ceiling()),
            }
        }
        (Signal::AboveMax, Some(view)) => {
            status.floor_since = None;
            if !elapsed(status.last_scale_time, policy.scale_out_interval, now) {
                return Decision::Hold("scale-out cooldown".to_string());
            }
            let to = view.replicas.saturating_add(policy.profile.step()).min(policy.ceiling());
            if to <= view.replicas {
                return Decision::Hold(format!("at maxReplicas {}", policy.ceiling()));
            }
            Decision::ScaleOut { from: view.replicas, to }
        }
        (Signal::BelowMin, None) => {
            status.floor_since = None;
            Decision::Hold("utilization low, no satellite".to_string())
        }
        (Signal::BelowMin, Some(view)) if view.replicas > policy.floor() => {
            status.floor_since = None;
            if !elapsed(status.last_scale_time, policy.scale_in_interval, now) {
                return Decision::Hold("scale-in cooldown".to_string());
            }
            let to = (view.replicas - policy.profile.step()).max(policy.floor());
            Decision::ScaleIn { from: view.replicas, to }
        }
        (Signal::BelowMin, Some(_)) => {
            let since = *status.floor_since.get_or_insert(now);
            if now - since >= policy.decommission_interval {
                Decision::Decommission
            } else {
                Decision::Hold("at replica floor".to_string())
            }
        }
        (Signal::MidBand | Signal::NoData, _) => {
            status.floor_since = None;
            Decision::Hold("utilization within thresholds".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(max: f64, min: Option<f64>) -> AutoRule {
        AutoRule {
            max_threshold: max,
            min_threshold: min,
            resource_types: Vec::new(),
        }
    }

    fn policy() -> Policy {
        Policy {
            profile_name: "storage".to_string(),
            profile: AutoResource {
                cpu: "1024m".to_string(),
                memory: "2Gi".to_string(),
                storage: Some("10Gi".to_string()),
                count: Some(2),
                min_replicas: Some(1),
                max_replicas: Some(5),
            },
            scale_in_interval: Duration::seconds(500),
            scale_out_interval: Duration::seconds(300),
            decommission_interval: Duration::seconds(600),
            no_data: NoDataPolicy::Hold,
        }
    }

    fn healthy(replicas: i32) -> Option<SatelliteView> {
        Some(SatelliteView { replicas, healthy: true })
    }

    fn t(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_classify_hysteresis() {
        let rules = BTreeMap::from([
            ("cpu".to_string(), rule(0.5, Some(0.2))),
            ("memory".to_string(), rule(0.8, Some(0.3))),
        ]);
        let samples = |cpu: f64, memory: f64| BTreeMap::from([("cpu".to_string(), cpu), ("memory".to_string(), memory)]);

        assert_eq!(classify(&rules, &samples(0.5, 0.1)), Signal::AboveMax);
        assert_eq!(classify(&rules, &samples(0.1, 0.1)), Signal::BelowMin);
        assert_eq!(classify(&rules, &samples(0.1, 0.5)), Signal::MidBand);
        assert_eq!(classify(&rules, &BTreeMap::new()), Signal::NoData);

        // Rules without samples do not block scale-in
        let only_cpu = BTreeMap::from([("cpu".to_string(), 0.1)]);
        assert_eq!(classify(&rules, &only_cpu), Signal::BelowMin);
    }

    #[test]
    fn test_rule_without_min_never_scales_in() {
        let rules = BTreeMap::from([("cpu".to_string(), rule(0.5, None))]);
        let samples = BTreeMap::from([("cpu".to_string(), 0.0)]);
        assert_eq!(classify(&rules, &samples), Signal::MidBand);
    }

    #[test]
    fn test_create_then_scale_out_after_cooldown() {
        let policy = policy();
        let mut status = AutoScalerComponentStatus::default();

        assert_eq!(
            decide(&policy, &mut status, None, Signal::AboveMax, t(0)),
            Decision::Create { replicas: 1 }
        );

        status.last_scale_time = Some(t(0));
        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::AboveMax, t(100)),
            Decision::Hold("scale-out cooldown".to_string())
        );
        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::AboveMax, t(300)),
            Decision::ScaleOut { from: 1, to: 3 }
        );
        assert_eq!(
            decide(&policy, &mut status, healthy(4), Signal::AboveMax, t(300)),
            Decision::ScaleOut { from: 4, to: 5 }
        );
        assert!(matches!(
            decide(&policy, &mut status, healthy(5), Signal::AboveMax, t(300)),
            Decision::Hold(_)
        ));
    }

    #[test]
    fn test_unhealthy_satellite_holds_everything() {
        let policy = policy();
        let mut status = AutoScalerComponentStatus {
            floor_since: Some(t(0)),
            pending_since: Some(t(0)),
            ..Default::default()
        };
        let view = Some(SatelliteView { replicas: 1, healthy: false });

        let decision = decide(&policy, &mut status, view, Signal::BelowMin, t(10_000));
        assert_eq!(decision, Decision::Hold("waiting for satellite to become healthy".to_string()));
        assert_eq!(status.floor_since, Some(t(0)));
        assert_eq!(status.pending_since, Some(t(0)));

        decide(&policy, &mut status, healthy(1), Signal::MidBand, t(10_000));
        assert_eq!(status.pending_since, None);
    }

    #[test]
    fn test_scale_in_respects_cooldown_and_floor() {
        let policy = policy();
        let mut status = AutoScalerComponentStatus {
            last_scale_time: Some(t(0)),
            ..Default::default()
        };

        assert_eq!(
            decide(&policy, &mut status, healthy(4), Signal::BelowMin, t(499)),
            Decision::Hold("scale-in cooldown".to_string())
        );
        assert_eq!(
            decide(&policy, &mut status, healthy(4), Signal::BelowMin, t(500)),
            Decision::ScaleIn { from: 4, to: 2 }
        );
        assert_eq!(
            decide(&policy, &mut status, healthy(2), Signal::BelowMin, t(500)),
            Decision::ScaleIn { from: 2, to: 1 }
        );
        assert_eq!(status.floor_since, None);
    }

    #[test]
    fn test_decommission_after_window_at_floor() {
        let policy = policy();
        let mut status = AutoScalerComponentStatus::default();

        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(0)),
            Decision::Hold("at replica floor".to_string())
        );
        assert_eq!(status.floor_since, Some(t(0)));
        assert!(matches!(
            decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(599)),
            Decision::Hold(_)
        ));
        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(600)),
            Decision::Decommission
        );
    }

    #[test]
    fn test_mid_band_resets_floor_timer() {
        let policy = policy();
        let mut status = AutoScalerComponentStatus::default();

        decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(0));
        decide(&policy, &mut status, healthy(1), Signal::MidBand, t(300));
        assert_eq!(status.floor_since, None);

        decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(400));
        assert!(matches!(
            decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(900)),
            Decision::Hold(_)
        ));
        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::BelowMin, t(1000)),
            Decision::Decommission
        );
    }

    #[test]
    fn test_no_data_policies() {
        let mut policy = policy();
        let mut status = AutoScalerComponentStatus {
            floor_since: Some(t(0)),
            ..Default::default()
        };

        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::NoData, t(1000)),
            Decision::Hold("no utilization data".to_string())
        );
        assert_eq!(status.floor_since, Some(t(0)));

        policy.no_data = NoDataPolicy::TreatAsIdle;
        assert_eq!(
            decide(&policy, &mut status, healthy(1), Signal::NoData, t(1000)),
            Decision::Decommission
        );
    }

    #[test]
    fn test_policy_from_spec_and_rule_filter() {
        let spec = ComponentAutoScalerSpec {
            resources: BTreeMap::from([("storage".to_string(), policy().profile)]),
            rules: BTreeMap::from([
                ("cpu".to_string(), AutoRule {
                    resource_types: vec!["storage".to_string()],
                    ..rule(0.5, Some(0.2))
                }),
                ("memory".to_string(), AutoRule {
                    resource_types: vec!["compute".to_string()],
                    ..rule(0.8, None)
                }),
            ]),
            ..Default::default()
        };
        let policy = Policy::from_spec(&spec).unwrap();
        assert_eq!(policy.profile_name, "storage");
        assert_eq!(policy.decommission_interval, Duration::seconds(600));

        let rules = policy.applicable_rules(&spec.rules);
        assert_eq!(rules.keys().collect::<Vec<_>>(), vec!["cpu"]);

        assert!(Policy::from_spec(&ComponentAutoScalerSpec::default()).is_err());
    }

    #[test]
    fn test_policy_rejects_malformed_profile_quantities() {
        let profile = |cpu: &str, storage: Option<&str>| ComponentAutoScalerSpec {
            resources: BTreeMap::from([(
                "storage".to_string(),
                AutoResource {
                    cpu: cpu.to_string(),
                    storage: storage.map(str::to_string),
                    ..policy().profile
                },
            )]),
            ..Default::default()
        };

        let err = Policy::from_spec(&profile("lots", None)).unwrap_err();
        assert_eq!(err, "resource profile storage cpu: invalid quantity \"lots\"");
        let err = Policy::from_spec(&profile("2", Some("10GB"))).unwrap_err();
        assert!(err.contains("storage: invalid quantity"));
        assert!(Policy::from_spec(&profile("2", None)).is_ok());
    }
}
