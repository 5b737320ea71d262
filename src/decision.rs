//! Debounced incident decision over two independent tooth counts.
//!
//! A cycle is a *failure cycle* only when both detectors see fewer teeth
//! than expected. Failure cycles increment the streak; any other cycle
//! resets it to zero, even if one detector still under-counts. An incident
//! is declared once the streak reaches the threshold.

use serde::{Deserialize, Serialize};

pub const DESCRIPTION_CLEAR: &str = "Sin novedades";
pub const DESCRIPTION_INCIDENT: &str = "Posible incidente";

/// Indicator bundle computed once per cycle and stored verbatim in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentIndicators {
    #[serde(rename = "esperado")]
    pub expected: u32,
    #[serde(rename = "detecciones_local")]
    pub local_count: u32,
    #[serde(rename = "detecciones_nube")]
    pub cloud_count: u32,
    /// Clamped at zero.
    #[serde(rename = "faltantes_local")]
    pub missing_local: i64,
    /// Not clamped: negative when the cloud model over-counts.
    #[serde(rename = "faltantes_nube")]
    pub missing_cloud: i64,
    #[serde(rename = "ciclos_falla_consecutiva")]
    pub consecutive_failures: u32,
    #[serde(rename = "ciclos_para_incidente")]
    pub threshold: u32,
    #[serde(rename = "es_incidente")]
    pub is_incident: bool,
    #[serde(rename = "descripcion")]
    pub description: String,
}

impl IncidentIndicators {
    pub fn is_failure_cycle(&self) -> bool {
        self.missing_local > 0 && self.missing_cloud > 0
    }
}

/// Evaluate one cycle.
///
/// `previous_failures` is the streak before this cycle; the returned
/// bundle carries the updated streak in `consecutive_failures`.
pub fn evaluate(
    expected: u32,
    local_count: u32,
    cloud_count: u32,
    previous_failures: u32,
    threshold: u32,
) -> IncidentIndicators {
    let missing_local = (i64::from(expected) - i64::from(local_count)).max(0);
    let missing_cloud = i64::from(expected) - i64::from(cloud_count);

    let failure_cycle = missing_local > 0 && missing_cloud > 0;
    let consecutive_failures = if failure_cycle {
        previous_failures.saturating_add(1)
    } else {
        0
    };
    let is_incident = consecutive_failures >= threshold;

    IncidentIndicators {
        expected,
        local_count,
        cloud_count,
        missing_local,
        missing_cloud,
        consecutive_failures,
        threshold,
        is_incident,
        description: if is_incident {
            DESCRIPTION_INCIDENT
        } else {
            DESCRIPTION_CLEAR
        }
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_counts_keep_streak_at_zero() {
        let mut streak = 0;
        for _ in 0..10 {
            let ind = evaluate(20, 20, 20, streak, 2);
            streak = ind.consecutive_failures;
            assert!(!ind.is_incident);
            assert_eq!(ind.description, "Sin novedades");
        }
        assert_eq!(streak, 0);
    }

    #[test]
    fn two_cycle_example() {
        let first = evaluate(20, 20, 18, 0, 2);
        // Local saw every tooth, so this is not a failure cycle.
        assert_eq!(first.consecutive_failures, 0);

        let first = evaluate(20, 19, 18, 0, 2);
        assert!(first.is_failure_cycle());
        assert_eq!(first.consecutive_failures, 1);
        assert!(!first.is_incident);

        let second = evaluate(20, 19, 17, first.consecutive_failures, 2);
        assert_eq!(second.consecutive_failures, 2);
        assert!(second.is_incident);
        assert_eq!(second.missing_local, 1);
        assert_eq!(second.missing_cloud, 3);
        assert_eq!(second.description, "Posible incidente");
    }

    #[test]
    fn incident_only_on_threshold_cycle() {
        let threshold = 4;
        let mut streak = 0;
        for cycle in 1..=threshold {
            let ind = evaluate(20, 15, 15, streak, threshold);
            streak = ind.consecutive_failures;
            assert_eq!(ind.is_incident, cycle == threshold, "cycle {cycle}");
        }
    }

    #[test]
    fn either_source_recovering_resets_streak() {
        let ind = evaluate(20, 20, 10, 5, 10);
        assert_eq!(ind.consecutive_failures, 0);
        let ind = evaluate(20, 10, 20, 5, 10);
        assert_eq!(ind.consecutive_failures, 0);
        let ind = evaluate(20, 10, 25, 5, 10);
        assert_eq!(ind.consecutive_failures, 0);
        assert_eq!(ind.missing_cloud, -5);
    }

    #[test]
    fn local_overcount_is_clamped() {
        let ind = evaluate(20, 23, 19, 0, 2);
        assert_eq!(ind.missing_local, 0);
        assert_eq!(ind.missing_cloud, 1);
        assert!(!ind.is_failure_cycle());
    }

    #[test]
    fn threshold_one_fires_immediately() {
        let ind = evaluate(20, 19, 19, 0, 1);
        assert!(ind.is_incident);
    }

    #[test]
    fn serialized_field_names() {
        let ind = evaluate(20, 19, 17, 1, 2);
        let json = serde_json::to_value(&ind).unwrap();
        assert_eq!(json["esperado"], 20);
        assert_eq!(json["detecciones_local"], 19);
        assert_eq!(json["detecciones_nube"], 17);
        assert_eq!(json["faltantes_local"], 1);
        assert_eq!(json["faltantes_nube"], 3);
        assert_eq!(json["ciclos_falla_consecutiva"], 2);
        assert_eq!(json["ciclos_para_incidente"], 2);
        assert_eq!(json["es_incidente"], true);
        assert_eq!(json["descripcion"], "Posible incidente");
    }
}
