//! Component phase derivation.

use crds::MemberPhase;

#[derive(Debug, Clone, Copy)]
pub struct PhaseInput {
    pub failure_members: usize,
    /// Replicas the component is heading to, spares included
    pub target: i32,
    /// Replicas written this reconcile
    pub planned: i32,
    /// Replicas the workload reports
    pub observed: i32,
    /// A template change is being rolled out
    pub upgrading: bool,
}

/// Phase of a component from what this reconcile observed and planned.
///
/// Failover wins over scaling, which wins over upgrading.
pub fn derive_phase(input: &PhaseInput) -> MemberPhase {
    if input.failure_members > 0 {
        MemberPhase::Failover
    } else if input.planned != input.target || input.observed != input.planned {
        MemberPhase::Scaling
    } else if input.upgrading {
        MemberPhase::Upgrading
    } else {
        MemberPhase::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady() -> PhaseInput {
        PhaseInput {
            failure_members: 0,
            target: 3,
            planned: 3,
            observed: 3,
            upgrading: false,
        }
    }

    #[test]
    fn test_phase_priority() {
        assert_eq!(derive_phase(&steady()), MemberPhase::Normal);
        assert_eq!(
            derive_phase(&PhaseInput { upgrading: true, ..steady() }),
            MemberPhase::Upgrading
        );
        assert_eq!(
            derive_phase(&PhaseInput { observed: 2, upgrading: true, ..steady() }),
            MemberPhase::Scaling
        );
        assert_eq!(
            derive_phase(&PhaseInput { failure_members: 1, observed: 2, ..steady() }),
            MemberPhase::Failover
        );
    }

    #[test]
    fn test_held_scale_in_stays_scaling() {
        let held = PhaseInput { target: 3, planned: 4, observed: 4, ..steady() };
        assert_eq!(derive_phase(&held), MemberPhase::Scaling);
    }
}
