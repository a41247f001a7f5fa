//! Component F: decision engine (spec §4.F). Pure function, no I/O.

use crate::models::{Counters, Decision, Thresholds, VerificationStatus};

pub fn decide(counters: Counters, thresholds: Thresholds) -> Decision {
    let total_ok = counters.total >= thresholds.min_total;
    let credited_ok = counters.credited >= thresholds.min_credited;
    let unique_ok = counters.unique_counterparties >= thresholds.min_unique;

    if total_ok && credited_ok && unique_ok {
        return Decision {
            status: VerificationStatus::Approved,
            failure_reason: None,
        };
    }

    let reason = match (total_ok, credited_ok, unique_ok) {
        (false, false, true) => format!(
            "Insufficient total ({}/{}) and credited ({}/{}) transactions",
            counters.total, thresholds.min_total, counters.credited, thresholds.min_credited
        ),
        (false, false, false) => format!(
            "Insufficient total ({}/{}) and credited ({}/{}) transactions, \
             insufficient unique wallets ({}/{})",
            counters.total,
            thresholds.min_total,
            counters.credited,
            thresholds.min_credited,
            counters.unique_counterparties,
            thresholds.min_unique
        ),
        (false, true, true) => format!(
            "Insufficient transactions ({}/{})",
            counters.total, thresholds.min_total
        ),
        (false, true, false) => format!(
            "Insufficient transactions ({}/{}), insufficient unique wallets ({}/{})",
            counters.total,
            thresholds.min_total,
            counters.unique_counterparties,
            thresholds.min_unique
        ),
        (true, false, true) => format!(
            "Insufficient credited transactions ({}/{})",
            counters.credited, thresholds.min_credited
        ),
        (true, false, false) => format!(
            "Insufficient credited transactions ({}/{}), insufficient unique wallets ({}/{})",
            counters.credited,
            thresholds.min_credited,
            counters.unique_counterparties,
            thresholds.min_unique
        ),
        (true, true, false) => format!(
            "Insufficient unique wallets ({}/{})",
            counters.unique_counterparties, thresholds.min_unique
        ),
        (true, true, true) => unreachable!("all thresholds satisfied handled above"),
    };

    Decision {
        status: VerificationStatus::Rejected,
        failure_reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds {
            min_total: 100,
            min_credited: 50,
            min_unique: 10,
        }
    }

    #[test]
    fn approves_when_all_thresholds_met() {
        let counters = Counters {
            total: 150,
            credited: 80,
            unique_counterparties: 25,
        };
        let decision = decide(counters, thresholds());
        assert_eq!(decision.status, VerificationStatus::Approved);
        assert!(decision.failure_reason.is_none());
        assert!(decision.meets_requirements());
    }

    #[test]
    fn rejects_on_credited_only() {
        let counters = Counters {
            total: 120,
            credited: 30,
            unique_counterparties: 15,
        };
        let decision = decide(counters, thresholds());
        assert_eq!(decision.status, VerificationStatus::Rejected);
        assert_eq!(
            decision.failure_reason.as_deref(),
            Some("Insufficient credited transactions (30/50)")
        );
    }

    #[test]
    fn rejects_on_total_and_unique() {
        let counters = Counters {
            total: 40,
            credited: 40,
            unique_counterparties: 5,
        };
        let decision = decide(counters, thresholds());
        let reason = decision.failure_reason.unwrap();
        assert!(reason.contains("Insufficient transactions (40/100)"));
        assert!(reason.contains("Insufficient unique wallets (5/10)"));
    }

    #[test]
    fn rejects_on_total_and_credited() {
        let counters = Counters {
            total: 10,
            credited: 5,
            unique_counterparties: 20,
        };
        let decision = decide(counters, thresholds());
        assert_eq!(
            decision.failure_reason.as_deref(),
            Some("Insufficient total (10/100) and credited (5/50) transactions")
        );
    }

    #[test]
    fn rejects_on_all_three() {
        let counters = Counters {
            total: 1,
            credited: 0,
            unique_counterparties: 0,
        };
        let decision = decide(counters, thresholds());
        let reason = decision.failure_reason.unwrap();
        assert!(reason.contains("total"));
        assert!(reason.contains("credited"));
        assert!(reason.contains("unique"));
    }

    #[test]
    fn boundary_values_are_approved() {
        let counters = Counters {
            total: 100,
            credited: 50,
            unique_counterparties: 10,
        };
        assert!(decide(counters, thresholds()).meets_requirements());
    }

    #[test]
    fn decision_is_reproducible_for_same_inputs() {
        let counters = Counters {
            total: 40,
            credited: 5,
            unique_counterparties: 3,
        };
        let first = decide(counters, thresholds());
        let second = decide(counters, thresholds());
        assert_eq!(first, second);
    }
}
