//! Citizen report intake.
//!
//! Validates submissions, scores their priority, attaches an LLM insight
//! for environmental and planning reports, and keeps them in an in-memory
//! desk that serves status lookups, recent listings and statistics.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{SharedClock, SystemClock};
use crate::engine::Narrator;
use crate::types::EchoError;

/// Maximum priority score.
pub const MAX_PRIORITY_SCORE: u8 = 20;

/// Days of per-day trend data kept in statistics.
const TREND_WINDOW_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Submission types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    EnvironmentalIssue,
    FloodRisk,
    HeatStress,
    AirQuality,
    GreenSpace,
    #[serde(rename = "urban_planning_suggestion")]
    UrbanPlanning,
    #[serde(rename = "infrastructure_issue")]
    Infrastructure,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::EnvironmentalIssue => "environmental_issue",
            ReportType::FloodRisk => "flood_risk",
            ReportType::HeatStress => "heat_stress",
            ReportType::AirQuality => "air_quality",
            ReportType::GreenSpace => "green_space",
            ReportType::UrbanPlanning => "urban_planning_suggestion",
            ReportType::Infrastructure => "infrastructure_issue",
        }
    }

    fn weight(&self) -> u8 {
        match self {
            ReportType::EnvironmentalIssue => 5,
            ReportType::FloodRisk => 8,
            ReportType::HeatStress => 6,
            ReportType::AirQuality => 7,
            ReportType::Infrastructure => 6,
            ReportType::GreenSpace => 3,
            ReportType::UrbanPlanning => 4,
        }
    }

    /// Report types that receive an LLM insight.
    pub fn wants_insight(&self) -> bool {
        matches!(self, ReportType::EnvironmentalIssue | ReportType::UrbanPlanning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    fn weight(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 3,
            Severity::High => 7,
            Severity::Critical => 10,
        }
    }

    pub fn review_time(&self) -> &'static str {
        match self {
            Severity::Critical => "24 hours",
            Severity::High => "3 days",
            Severity::Medium => "1 week",
            Severity::Low => "2 weeks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    HeatIsland,
    Flooding,
    AirPollution,
    GreenCoverage,
    Transportation,
    WasteManagement,
    Energy,
    Other,
}

impl ReportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::HeatIsland => "heat_island",
            ReportCategory::Flooding => "flooding",
            ReportCategory::AirPollution => "air_pollution",
            ReportCategory::GreenCoverage => "green_coverage",
            ReportCategory::Transportation => "transportation",
            ReportCategory::WasteManagement => "waste_management",
            ReportCategory::Energy => "energy",
            ReportCategory::Other => "other",
        }
    }

    fn weight(&self) -> u8 {
        match self {
            ReportCategory::HeatIsland => 6,
            ReportCategory::Flooding => 8,
            ReportCategory::AirPollution => 7,
            ReportCategory::GreenCoverage => 4,
            ReportCategory::Transportation => 5,
            ReportCategory::WasteManagement => 5,
            ReportCategory::Energy => 4,
            ReportCategory::Other => 2,
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub reporter_name: String,
    pub reporter_email: String,
    pub report_type: ReportType,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: ReportCategory,
    pub location: ReportLocation,
    pub date_observed: DateTime<Utc>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub contact_permission: bool,
    #[serde(default)]
    pub follow_up: bool,
}

fn check_length(field: &str, value: &str, min: usize, max: Option<usize>) -> Result<(), EchoError> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(EchoError::Validation(format!(
            "{field} must be at least {min} characters"
        )));
    }
    if let Some(max) = max {
        if len > max {
            return Err(EchoError::Validation(format!(
                "{field} must be at most {max} characters"
            )));
        }
    }
    Ok(())
}

/// `local@domain.tld`: an `@` with a dot somewhere after it.
fn plausible_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain
                    .find('.')
                    .is_some_and(|dot| dot > 0 && dot + 1 < domain.len())
        }
        None => false,
    }
}

impl ReportSubmission {
    pub fn validate(&self) -> Result<(), EchoError> {
        check_length("reporter_name", &self.reporter_name, 3, Some(100))?;
        if !plausible_email(&self.reporter_email) {
            return Err(EchoError::Validation(format!(
                "reporter_email is not a valid address: {}",
                self.reporter_email
            )));
        }
        check_length("title", &self.title, 5, Some(200))?;
        check_length("description", &self.description, 20, None)?;
        if let (Some(lat), Some(lng)) = (self.location.latitude, self.location.longitude) {
            crate::types::Coordinate::new(lat, lng)?;
        }
        Ok(())
    }

    /// Severity + type + category weights, capped at [`MAX_PRIORITY_SCORE`].
    pub fn priority_score(&self) -> u8 {
        (self.severity.weight() + self.report_type.weight() + self.category.weight())
            .min(MAX_PRIORITY_SCORE)
    }

    fn insight_prompt(&self) -> String {
        format!(
            "Analyze this citizen report for urban planning insights:\n\n\
             Report Type: {}\n\
             Category: {}\n\
             Severity: {}\n\
             Title: {}\n\
             Description: {}\n\
             Location: {}\n\n\
             Provide:\n\
             1. Key insights about the reported issue\n\
             2. Potential causes or contributing factors\n\
             3. Suggested immediate actions\n\
             4. Long-term planning recommendations\n\
             5. Related environmental factors to consider\n\n\
             Focus on actionable insights for urban planners and city leaders.",
            self.report_type,
            self.category,
            self.severity,
            self.title.trim(),
            self.description.trim(),
            self.location.address,
        )
    }
}

// ---------------------------------------------------------------------------
// Desk records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Submitted,
    UnderReview,
    Resolved,
    Closed,
}

/// Insight attached to a report. `error` is set when the LLM call failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportInsight {
    pub analysis: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReport {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub priority_score: u8,
    pub ai_analysis: Option<ReportInsight>,
    pub submission: ReportSubmission,
}

/// Response to a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReceipt {
    pub report_id: String,
    pub status: String,
    pub message: String,
    pub estimated_review_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportStatusView {
    pub report_id: String,
    pub status: ReportStatus,
    pub submitted_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub priority_score: u8,
    pub title: String,
    pub category: ReportCategory,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentReport {
    pub id: String,
    pub title: String,
    pub category: ReportCategory,
    pub severity: Severity,
    pub location: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReportStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub category: ReportCategory,
    pub severity: Severity,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportStatistics {
    pub total_reports: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub recent_trends: Vec<TrendPoint>,
    pub average_priority: f64,
    pub most_common_category: String,
    pub most_common_severity: String,
    pub reports_last_7_days: u64,
    pub reports_last_30_days: u64,
}

/// Key with the highest count; ties go to the first key in order.
fn most_common(counts: &BTreeMap<String, u64>) -> String {
    counts
        .iter()
        .fold(None::<(&String, u64)>, |best, (k, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((k, v)),
        })
        .map(|(k, _)| k.clone())
        .unwrap_or_else(|| "none".into())
}

// ---------------------------------------------------------------------------
// Desk
// ---------------------------------------------------------------------------

pub struct ReportDesk {
    reports: RwLock<HashMap<String, StoredReport>>,
    narrator: Option<Arc<Narrator>>,
    clock: SharedClock,
}

impl ReportDesk {
    pub fn new(narrator: Option<Arc<Narrator>>) -> Self {
        Self::with_clock(narrator, Arc::new(SystemClock))
    }

    pub fn with_clock(narrator: Option<Arc<Narrator>>, clock: SharedClock) -> Self {
        Self { reports: RwLock::new(HashMap::new()), narrator, clock }
    }

    async fn insight(&self, submission: &ReportSubmission) -> Option<ReportInsight> {
        if !submission.report_type.wants_insight() {
            return None;
        }
        let narrator = self.narrator.as_ref()?;
        let generated_at = self.clock.now();
        Some(match narrator.insight(&submission.insight_prompt()).await {
            Ok(n) => ReportInsight {
                analysis: n.text,
                generated_at,
                model: Some(n.model),
                error: None,
            },
            Err(e) => ReportInsight {
                analysis: "AI analysis temporarily unavailable".into(),
                generated_at,
                model: None,
                error: Some(e),
            },
        })
    }

    /// Validate, score and store a submission.
    pub async fn submit(&self, submission: ReportSubmission) -> Result<ReportReceipt, EchoError> {
        submission.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let ai_analysis = self.insight(&submission).await;
        let report = StoredReport {
            id: id.clone(),
            submitted_at: self.clock.now(),
            status: ReportStatus::Submitted,
            priority_score: submission.priority_score(),
            ai_analysis,
            submission,
        };

        info!(
            report_id = %id,
            report_type = %report.submission.report_type,
            severity = %report.submission.severity,
            priority_score = report.priority_score,
            "Report submitted"
        );
        if report.ai_analysis.as_ref().is_some_and(|a| a.error.is_some()) {
            warn!(report_id = %id, "Report stored without AI insight");
        }

        let receipt = ReportReceipt {
            report_id: id.clone(),
            status: "submitted".into(),
            message: format!("Report submitted successfully. Reference ID: {id}"),
            estimated_review_time: report.submission.severity.review_time().into(),
        };
        self.reports.write().await.insert(id, report);
        Ok(receipt)
    }

    pub async fn get(&self, id: &str) -> Option<StoredReport> {
        self.reports.read().await.get(id).cloned()
    }

    pub async fn status(&self, id: &str) -> Result<ReportStatusView, EchoError> {
        let reports = self.reports.read().await;
        let report = reports
            .get(id)
            .ok_or_else(|| EchoError::NotFound(format!("report {id}")))?;
        Ok(ReportStatusView {
            report_id: report.id.clone(),
            status: report.status,
            submitted_at: report.submitted_at,
            last_updated: self.clock.now(),
            priority_score: report.priority_score,
            title: report.submission.title.clone(),
            category: report.submission.category,
            severity: report.submission.severity,
        })
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Vec<RecentReport> {
        let reports = self.reports.read().await;
        let mut sorted: Vec<&StoredReport> = reports.values().collect();
        sorted.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then_with(|| a.id.cmp(&b.id)));
        sorted
            .into_iter()
            .take(limit)
            .map(|r| RecentReport {
                id: r.id.clone(),
                title: r.submission.title.clone(),
                category: r.submission.category,
                severity: r.submission.severity,
                location: r.submission.location.address.clone(),
                submitted_at: r.submitted_at,
                status: r.status,
            })
            .collect()
    }

    pub async fn statistics(&self) -> ReportStatistics {
        let reports = self.reports.read().await;
        let now = self.clock.now();

        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        let mut trends: BTreeMap<(NaiveDate, ReportCategory, Severity), u64> = BTreeMap::new();
        let mut priority_sum = 0u64;
        let mut last_7 = 0;
        let mut last_30 = 0;

        for report in reports.values() {
            let s = &report.submission;
            *by_category.entry(s.category.as_str().to_string()).or_insert(0) += 1;
            *by_severity.entry(s.severity.as_str().to_string()).or_insert(0) += 1;
            *by_type.entry(s.report_type.as_str().to_string()).or_insert(0) += 1;
            priority_sum += u64::from(report.priority_score);

            let age = now - report.submitted_at;
            if age <= Duration::days(7) {
                last_7 += 1;
            }
            if age <= Duration::days(TREND_WINDOW_DAYS) {
                last_30 += 1;
                *trends
                    .entry((report.submitted_at.date_naive(), s.category, s.severity))
                    .or_insert(0) += 1;
            }
        }

        let total = reports.len() as u64;
        ReportStatistics {
            total_reports: total,
            most_common_category: most_common(&by_category),
            most_common_severity: most_common(&by_severity),
            by_category,
            by_severity,
            by_type,
            recent_trends: trends
                .into_iter()
                .map(|((date, category, severity), count)| TrendPoint { date, category, severity, count })
                .collect(),
            average_priority: if total == 0 { 0.0 } else { priority_sum as f64 / total as f64 },
            reports_last_7_days: last_7,
            reports_last_30_days: last_30,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
