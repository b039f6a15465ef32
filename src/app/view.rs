//! Tab selection and the payload each tab renders

use serde::{Deserialize, Serialize};

use crate::community::{DashboardStats, Hotspot, IncidentType, Report, Severity, Story};
use crate::location::TrackingStatus;
use crate::trigger::VoiceStatus;

/// Every screen a client can show
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    #[default]
    Home,
    Report,
    Map,
    Dashboard,
    Resources,
    Stories,
    VoiceSafety,
    LiveLocation,
    SubmittedReports,
}

#[cfg(test)]
impl View {
    pub const ALL: [View; 9] = [
        View::Home,
        View::Report,
        View::Map,
        View::Dashboard,
        View::Resources,
        View::Stories,
        View::VoiceSafety,
        View::LiveLocation,
        View::SubmittedReports,
    ];
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            View::Home => "home",
            View::Report => "report",
            View::Map => "map",
            View::Dashboard => "dashboard",
            View::Resources => "resources",
            View::Stories => "stories",
            View::VoiceSafety => "voice-safety",
            View::LiveLocation => "live-location",
            View::SubmittedReports => "submitted-reports",
        };
        f.write_str(name)
    }
}

/// Rendered content of one view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "kebab-case")]
pub enum ViewSnapshot {
    Home {
        reports_submitted: usize,
        stories_shared: usize,
    },
    Report {
        incident_types: Vec<IncidentType>,
        severities: Vec<Severity>,
    },
    Map {
        reports: Vec<Report>,
        incident_types: Vec<IncidentType>,
        hotspots: Vec<Hotspot>,
    },
    Dashboard(DashboardView),
    Resources(ResourceDirectory),
    Stories {
        stories: Vec<Story>,
        incident_types: Vec<IncidentType>,
    },
    VoiceSafety(VoiceStatus),
    LiveLocation(TrackingStatus),
    SubmittedReports {
        reports: Vec<Report>,
    },
}

#[cfg(test)]
impl ViewSnapshot {
    pub fn view(&self) -> View {
        match self {
            ViewSnapshot::Home { .. } => View::Home,
            ViewSnapshot::Report { .. } => View::Report,
            ViewSnapshot::Map { .. } => View::Map,
            ViewSnapshot::Dashboard(_) => View::Dashboard,
            ViewSnapshot::Resources(_) => View::Resources,
            ViewSnapshot::Stories { .. } => View::Stories,
            ViewSnapshot::VoiceSafety(_) => View::VoiceSafety,
            ViewSnapshot::LiveLocation(_) => View::LiveLocation,
            ViewSnapshot::SubmittedReports { .. } => View::SubmittedReports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub stats: DashboardStats,
    pub recent: Vec<Report>,
    pub hotspots: Vec<Hotspot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotline {
    pub name: String,
    pub number: String,
    pub description: String,
    pub available: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportTopic {
    pub title: String,
    pub description: String,
}

/// Static help content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDirectory {
    pub hotlines: Vec<Hotline>,
    pub topics: Vec<SupportTopic>,
    pub tips: Vec<String>,
}

impl ResourceDirectory {
    /// The directory, with the configured number listed first
    pub fn with_emergency_number(emergency_number: &str) -> Self {
        let hotlines = [
            (
                "Emergency Services",
                emergency_number,
                "For immediate danger or emergencies",
            ),
            (
                "National Sexual Assault Hotline",
                "1-800-656-4673",
                "Free, confidential support for survivors",
            ),
            (
                "Crisis Text Line",
                "Text HOME to 741741",
                "Free, 24/7 crisis counseling via text",
            ),
            (
                "National Domestic Violence Hotline",
                "1-800-799-7233",
                "Confidential support for domestic violence",
            ),
        ]
        .into_iter()
        .map(|(name, number, description)| Hotline {
            name: name.to_string(),
            number: number.to_string(),
            description: description.to_string(),
            available: "24/7".to_string(),
        })
        .collect();

        let topics = [
            ("Know Your Rights", "Understanding your legal rights in harassment situations"),
            ("Safety Planning", "Creating personal safety strategies and plans"),
            ("Community Support Groups", "Connect with local support networks"),
            ("Educational Resources", "Learn about harassment prevention and response"),
        ]
        .into_iter()
        .map(|(title, description)| SupportTopic {
            title: title.to_string(),
            description: description.to_string(),
        })
        .collect();

        let tips = [
            "Trust your instincts if something feels wrong",
            "Stay aware of your surroundings, especially in isolated areas",
            "Keep emergency contacts easily accessible on your phone",
            "Consider traveling with others when possible",
            "Report suspicious behavior to appropriate authorities",
            "Document incidents with dates, times, and locations when safe to do so",
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();

        Self {
            hotlines,
            topics,
            tips,
        }
    }
}
