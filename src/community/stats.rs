//! Dashboard aggregates over the report book

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use super::report::{IncidentType, Report, Severity};

const TOP_TYPES: usize = 5;

/// Part of the day an incident happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPeriod {
    /// 12 AM to 6 AM
    Night,
    /// 6 AM to 12 PM
    Morning,
    /// 12 PM to 6 PM
    Afternoon,
    /// 6 PM to 12 AM
    Evening,
}

impl DayPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => DayPeriod::Night,
            6..=11 => DayPeriod::Morning,
            12..=17 => DayPeriod::Afternoon,
            _ => DayPeriod::Evening,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl SeverityCounts {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: usize,
    pub this_month: usize,
    pub this_week: usize,
    pub by_severity: SeverityCounts,
    /// Most frequent types, highest count first
    pub top_types: Vec<(IncidentType, usize)>,
    pub by_period: BTreeMap<DayPeriod, usize>,
}

impl DashboardStats {
    pub fn compute(reports: &[Report], today: NaiveDate) -> Self {
        let mut by_severity = SeverityCounts::default();
        let mut by_type: BTreeMap<IncidentType, usize> = BTreeMap::new();
        let mut by_period = BTreeMap::new();
        let mut this_month = 0;
        let mut this_week = 0;

        for report in reports {
            by_severity.bump(report.severity);
            *by_type.entry(report.incident_type).or_default() += 1;

            if let Some(time) = report.time {
                *by_period.entry(DayPeriod::from_hour(time.hour())).or_default() += 1;
            }
            if report.date.year() == today.year() && report.date.month() == today.month() {
                this_month += 1;
            }
            if (today - report.date).num_days() <= 7 {
                this_week += 1;
            }
        }

        let mut top_types: Vec<(IncidentType, usize)> = by_type.into_iter().collect();
        // stable sort keeps ties in type order
        top_types.sort_by(|a, b| b.1.cmp(&a.1));
        top_types.truncate(TOP_TYPES);

        Self {
            total: reports.len(),
            this_month,
            this_week,
            by_severity,
            top_types,
            by_period,
        }
    }
}

/// Display-only area summary shown beside the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub area: String,
    pub count: u32,
    pub trend: String,
}

pub fn hotspots() -> Vec<Hotspot> {
    [
        ("Downtown District", 12, "+23%"),
        ("University Campus", 8, "-15%"),
        ("Transit Hub", 15, "+45%"),
        ("Entertainment District", 6, "+12%"),
    ]
    .into_iter()
    .map(|(area, count, trend)| Hotspot {
        area: area.to_string(),
        count,
        trend: trend.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::seed;

    #[test]
    fn test_day_period_boundaries() {
        assert_eq!(DayPeriod::from_hour(0), DayPeriod::Night);
        assert_eq!(DayPeriod::from_hour(5), DayPeriod::Night);
        assert_eq!(DayPeriod::from_hour(6), DayPeriod::Morning);
        assert_eq!(DayPeriod::from_hour(12), DayPeriod::Afternoon);
        assert_eq!(DayPeriod::from_hour(18), DayPeriod::Evening);
        assert_eq!(DayPeriod::from_hour(23), DayPeriod::Evening);
    }

    #[test]
    fn test_seed_stats() {
        let reports = seed::reports().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let stats = DashboardStats::compute(&reports, today);

        assert_eq!(stats.total, 4);
        assert_eq!(stats.this_month, 4);
        // 2024-01-12 is 4 days back, all within the week
        assert_eq!(stats.this_week, 4);
        assert_eq!(
            stats.by_severity,
            SeverityCounts {
                low: 1,
                medium: 1,
                high: 2
            }
        );
        assert_eq!(stats.by_period.get(&DayPeriod::Evening), Some(&3));
        assert_eq!(stats.by_period.get(&DayPeriod::Afternoon), Some(&1));
        assert_eq!(stats.top_types.len(), 4);
    }

    #[test]
    fn test_old_reports_not_in_month() {
        let reports = seed::reports().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let stats = DashboardStats::compute(&reports, today);
        assert_eq!(stats.this_month, 0);
        assert_eq!(stats.this_week, 0);
    }
}
