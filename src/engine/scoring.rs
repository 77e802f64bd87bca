//! Threshold scoring for environmental metrics.
//!
//! Pure functions: identical metrics always produce an identical
//! [`AnalysisSummary`]. No I/O, no randomness, no wall clock.

use crate::types::{AnalysisSummary, AreaMetrics, EnvironmentalSnapshot, FloodRiskLevel, PriorityLevel};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Heat index (°C) above which heat stress is an issue.
pub const HEAT_ISSUE_C: f64 = 32.0;
/// Heat index (°C) above which heat counts as critical.
pub const HEAT_CRITICAL_C: f64 = 35.0;

/// AQI above which air quality is an issue.
pub const AQI_ISSUE: u32 = 100;
/// AQI above which air quality counts as critical.
pub const AQI_CRITICAL: u32 = 150;

/// Green coverage (%) below which it is an issue.
pub const GREEN_ISSUE_PCT: f64 = 25.0;
/// Green coverage (%) below which it counts as critical.
pub const GREEN_CRITICAL_PCT: f64 = 15.0;

/// Water stress (%) above which it is an issue.
pub const WATER_STRESS_ISSUE_PCT: f64 = 60.0;

/// Critical tally at which the priority becomes `Critical`.
const CRITICAL_TALLY: usize = 2;
/// Issue count at which the priority becomes `High`.
const HIGH_ISSUE_COUNT: usize = 3;

pub const NO_ISSUES: &str = "No major issues detected";
pub const KEEP_MONITORING: &str = "Continue monitoring environmental metrics";

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct Rule {
    triggered: fn(&AreaMetrics) -> bool,
    issue: &'static str,
    recommendation: &'static str,
}

/// Evaluated in order; output lists keep this order.
const RULES: [Rule; 5] = [
    Rule {
        triggered: |m| m.heat_index > HEAT_ISSUE_C,
        issue: "High heat stress detected",
        recommendation: "Implement cooling strategies: green roofs, tree planting, cool pavements",
    },
    Rule {
        triggered: |m| m.air_quality > AQI_ISSUE,
        issue: "Poor air quality (unhealthy levels)",
        recommendation: "Create green barriers, reduce traffic emissions, improve ventilation",
    },
    Rule {
        triggered: |m| m.green_coverage < GREEN_ISSUE_PCT,
        issue: "Low green space coverage",
        recommendation: "Increase urban green infrastructure and parks",
    },
    Rule {
        triggered: |m| m.water_stress.is_some_and(|w| w > WATER_STRESS_ISSUE_PCT),
        issue: "High water stress",
        recommendation: "Improve water management and conservation",
    },
    Rule {
        triggered: |m| matches!(m.flood_risk, FloodRiskLevel::High | FloodRiskLevel::VeryHigh),
        issue: "Significant flood risk",
        recommendation: "Implement flood mitigation: permeable surfaces, retention systems",
    },
];

/// Number of metrics past their critical threshold.
pub fn critical_tally(metrics: &AreaMetrics) -> usize {
    [
        metrics.heat_index > HEAT_CRITICAL_C,
        metrics.air_quality > AQI_CRITICAL,
        metrics.flood_risk == FloodRiskLevel::VeryHigh,
        metrics.green_coverage < GREEN_CRITICAL_PCT,
    ]
    .into_iter()
    .filter(|hit| *hit)
    .count()
}

fn priority(critical: usize, issues: usize) -> PriorityLevel {
    if critical >= CRITICAL_TALLY {
        PriorityLevel::Critical
    } else if issues >= HIGH_ISSUE_COUNT {
        PriorityLevel::High
    } else if issues >= 1 {
        PriorityLevel::Medium
    } else {
        PriorityLevel::Low
    }
}

/// Apply the threshold table to a set of metrics.
pub fn summarize(metrics: &AreaMetrics) -> AnalysisSummary {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    for rule in RULES.iter().filter(|r| (r.triggered)(metrics)) {
        issues.push(rule.issue.to_string());
        recommendations.push(rule.recommendation.to_string());
    }

    let priority_level = priority(critical_tally(metrics), issues.len());

    if issues.is_empty() {
        issues.push(NO_ISSUES.to_string());
        recommendations.push(KEEP_MONITORING.to_string());
    }

    AnalysisSummary { issues, recommendations, priority_level }
}

/// Score the headline metrics of a merged snapshot.
pub fn summarize_snapshot(snapshot: &EnvironmentalSnapshot) -> AnalysisSummary {
    summarize(&snapshot.metrics())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
