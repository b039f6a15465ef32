//! Incident reports: the closed severity/type vocabularies, the multi-step
//! draft a client fills in, and the append-only book reports land in.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::CommunityError;

/// Three-level ordinal classification shared by reports and stories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

impl FromStr for Severity {
    type Err = CommunityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(CommunityError::UnknownSeverity(other.to_string())),
        }
    }
}

/// Kind of incident being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IncidentType {
    #[serde(rename = "Sexual Harassment")]
    SexualHarassment,
    #[serde(rename = "Verbal Harassment")]
    VerbalHarassment,
    #[serde(rename = "Physical Harassment")]
    PhysicalHarassment,
    #[serde(rename = "Cyberbullying")]
    Cyberbullying,
    #[serde(rename = "Stalking")]
    Stalking,
    #[serde(rename = "Discrimination")]
    Discrimination,
    #[serde(rename = "Workplace Harassment")]
    WorkplaceHarassment,
    #[serde(rename = "Other")]
    Other,
}

impl IncidentType {
    pub const ALL: [IncidentType; 8] = [
        IncidentType::SexualHarassment,
        IncidentType::VerbalHarassment,
        IncidentType::PhysicalHarassment,
        IncidentType::Cyberbullying,
        IncidentType::Stalking,
        IncidentType::Discrimination,
        IncidentType::WorkplaceHarassment,
        IncidentType::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            IncidentType::SexualHarassment => "Sexual Harassment",
            IncidentType::VerbalHarassment => "Verbal Harassment",
            IncidentType::PhysicalHarassment => "Physical Harassment",
            IncidentType::Cyberbullying => "Cyberbullying",
            IncidentType::Stalking => "Stalking",
            IncidentType::Discrimination => "Discrimination",
            IncidentType::WorkplaceHarassment => "Workplace Harassment",
            IncidentType::Other => "Other",
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IncidentType {
    type Err = CommunityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentType::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or_else(|| CommunityError::UnknownIncidentType(s.to_string()))
    }
}

/// A point on the simulated map plus the free-text address the reporter gave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

/// A stored incident report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: u64,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub location: ReportLocation,
    /// Submission date; never taken from the client
    pub date: NaiveDate,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Step of the three-page report form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStep {
    /// Incident type and severity
    Details,
    /// Address and incident date
    WhereAndWhen,
    /// Optional description, then submit
    Review,
}

/// What a client sends when filing a report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportDraft {
    #[serde(rename = "type")]
    pub incident_type: Option<IncidentType>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub location: String,
    /// Date the incident happened. Required by the form but not stored.
    pub incident_date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ReportDraft {
    /// Check that every field required up to and including `step` is present
    pub fn validate_step(&self, step: DraftStep) -> Result<(), CommunityError> {
        if self.incident_type.is_none() {
            return Err(CommunityError::MissingField("type"));
        }
        if step == DraftStep::Details {
            return Ok(());
        }
        if self.location.trim().is_empty() {
            return Err(CommunityError::MissingField("location"));
        }
        if self.incident_date.is_none() {
            return Err(CommunityError::MissingField("incident_date"));
        }
        Ok(())
    }
}

/// Filter applied by the map and submitted-reports views; `None` means "all"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFilter {
    #[serde(default, rename = "type")]
    pub incident_type: Option<IncidentType>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl ReportFilter {
    #[cfg(test)]
    pub fn by_severity(severity: Severity) -> Self {
        Self {
            incident_type: None,
            severity: Some(severity),
        }
    }

    pub fn matches(&self, report: &Report) -> bool {
        self.incident_type.map_or(true, |t| t == report.incident_type)
            && self.severity.map_or(true, |s| s == report.severity)
    }
}

/// Ordering for the submitted-reports list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSort {
    /// Newest first
    #[default]
    Date,
    /// Highest severity first
    Severity,
    /// Alphabetical by type label
    Type,
}

/// Base point the simulated coordinates scatter around
pub const MAP_CENTER: (f64, f64) = (40.7128, -74.0060);

/// Produce a simulated map point within 0.05 degrees of [`MAP_CENTER`]
pub fn simulated_coordinates<R: Rng>(rng: &mut R) -> (f64, f64) {
    let lat = MAP_CENTER.0 + (rng.random::<f64>() - 0.5) * 0.1;
    let lng = MAP_CENTER.1 + (rng.random::<f64>() - 0.5) * 0.1;
    (lat, lng)
}

/// Append-only, insertion-ordered sequence of reports
#[derive(Debug, Default)]
pub struct ReportBook {
    reports: Vec<Report>,
    last_id: u64,
}

impl ReportBook {
    pub fn from_seed(reports: Vec<Report>) -> Self {
        let last_id = reports.iter().map(|r| r.id).max().unwrap_or(0);
        Self { reports, last_id }
    }

    pub fn all(&self) -> &[Report] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Validate and store a draft. `today` becomes the stored date.
    pub fn submit(
        &mut self,
        draft: ReportDraft,
        today: NaiveDate,
        coords: (f64, f64),
    ) -> Result<&Report, CommunityError> {
        draft.validate_step(DraftStep::Review)?;
        let incident_type = draft.incident_type.ok_or(CommunityError::MissingField("type"))?;

        let id = self.next_id();
        let description = draft
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        self.reports.push(Report {
            id,
            incident_type,
            location: ReportLocation {
                lat: coords.0,
                lng: coords.1,
                address: draft.location.trim().to_string(),
            },
            date: today,
            time: draft.time,
            severity: draft.severity,
            description,
        });

        info!(id, %incident_type, severity = %draft.severity, "report submitted");
        Ok(&self.reports[self.reports.len() - 1])
    }

    /// Timestamp-derived, strictly increasing
    fn next_id(&mut self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last_id = now.max(self.last_id + 1);
        self.last_id
    }

    pub fn filtered(&self, filter: &ReportFilter) -> Vec<Report> {
        self.reports
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn list(&self, filter: &ReportFilter, sort: ReportSort) -> Vec<Report> {
        let mut out = self.filtered(filter);
        match sort {
            ReportSort::Date => out.sort_by(|a, b| b.date.cmp(&a.date)),
            ReportSort::Severity => out.sort_by(|a, b| b.severity.cmp(&a.severity)),
            ReportSort::Type => out.sort_by(|a, b| a.incident_type.label().cmp(b.incident_type.label())),
        }
        out
    }

    /// Distinct incident types present, in first-seen order
    pub fn incident_types(&self) -> Vec<IncidentType> {
        let mut types = Vec::new();
        for report in &self.reports {
            if !types.contains(&report.incident_type) {
                types.push(report.incident_type);
            }
        }
        types
    }

    /// Last `n` reports matching `filter`, most recent first
    pub fn recent(&self, filter: &ReportFilter, n: usize) -> Vec<Report> {
        let matching = self.filtered(filter);
        matching.into_iter().rev().take(n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(severity: Severity) -> ReportDraft {
        ReportDraft {
            incident_type: Some(IncidentType::Stalking),
            severity,
            location: "  Times Square ".into(),
            incident_date: NaiveDate::from_ymd_opt(2020, 5, 1),
            time: NaiveTime::from_hms_opt(21, 15, 0),
            description: Some("   ".into()),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    #[test]
    fn test_submit_uses_submission_date() {
        let mut book = ReportBook::default();
        let report = book.submit(draft(Severity::High), today(), (1.0, 2.0)).unwrap();
        assert_eq!(report.date, today());
        assert_eq!(report.location.address, "Times Square");
        assert_eq!(report.description, None);
    }

    #[test]
    fn test_ids_unique_and_increasing() {
        let mut book = ReportBook::from_seed(Vec::new());
        let mut ids = Vec::new();
        for _ in 0..50 {
            ids.push(book.submit(draft(Severity::Low), today(), (0.0, 0.0)).unwrap().id);
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_validation_steps() {
        let mut d = ReportDraft::default();
        assert!(matches!(
            d.validate_step(DraftStep::Details),
            Err(CommunityError::MissingField("type"))
        ));
        d.incident_type = Some(IncidentType::Other);
        assert!(d.validate_step(DraftStep::Details).is_ok());
        assert!(matches!(
            d.validate_step(DraftStep::WhereAndWhen),
            Err(CommunityError::MissingField("location"))
        ));
        d.location = "Park".into();
        assert!(matches!(
            d.validate_step(DraftStep::Review),
            Err(CommunityError::MissingField("incident_date"))
        ));

        let mut book = ReportBook::default();
        assert!(book.submit(d, today(), (0.0, 0.0)).is_err());
        assert_eq!(book.len(), 0);
    }

    #[test]
    fn test_severity_rejects_unknown() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert!("critical".parse::<Severity>().is_err());
        assert!(serde_json::from_str::<Severity>(r#""urgent""#).is_err());
    }

    #[test]
    fn test_severity_filters_partition_reports() {
        let mut book = ReportBook::default();
        for s in [Severity::Low, Severity::High, Severity::Medium, Severity::High] {
            book.submit(draft(s), today(), (0.0, 0.0)).unwrap();
        }

        let mut union: Vec<u64> = Vec::new();
        for severity in Severity::ALL {
            let subset = book.filtered(&ReportFilter::by_severity(severity));
            assert!(subset.iter().all(|r| r.severity == severity));
            union.extend(subset.iter().map(|r| r.id));
        }
        union.sort_unstable();
        let mut all: Vec<u64> = book.all().iter().map(|r| r.id).collect();
        all.sort_unstable();
        assert_eq!(union, all);
    }

    #[test]
    fn test_sort_by_severity() {
        let mut book = ReportBook::default();
        for s in [Severity::Low, Severity::High, Severity::Medium] {
            book.submit(draft(s), today(), (0.0, 0.0)).unwrap();
        }
        let sorted = book.list(&ReportFilter::default(), ReportSort::Severity);
        let order: Vec<Severity> = sorted.iter().map(|r| r.severity).collect();
        assert_eq!(order, vec![Severity::High, Severity::Medium, Severity::Low]);
    }

    #[test]
    fn test_simulated_coordinates_near_center() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let (lat, lng) = simulated_coordinates(&mut rng);
            assert!((lat - MAP_CENTER.0).abs() <= 0.05);
            assert!((lng - MAP_CENTER.1).abs() <= 0.05);
        }
    }
}
