use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::UnknownStatus;

// --- Timestamp hooks ---

/// Stamps for a record about to be inserted: `(created_at, updated_at)`,
/// both the same instant.
pub fn stamp_created() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now, now)
}

/// Fresh `updated_at` for a record last stamped at `previous`.
/// Always strictly later than `previous`, even if the clock hasn't moved.
pub fn stamp_updated(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

// --- Application status ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    #[default]
    Draft,
    Applied,
    Responded,
    InterviewScheduled,
    InterviewCompleted,
    OfferReceived,
    OfferAccepted,
    OfferDeclined,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ApplicationStatus; 10] = [
        ApplicationStatus::Draft,
        ApplicationStatus::Applied,
        ApplicationStatus::Responded,
        ApplicationStatus::InterviewScheduled,
        ApplicationStatus::InterviewCompleted,
        ApplicationStatus::OfferReceived,
        ApplicationStatus::OfferAccepted,
        ApplicationStatus::OfferDeclined,
        ApplicationStatus::Rejected,
        ApplicationStatus::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "DRAFT",
            ApplicationStatus::Applied => "APPLIED",
            ApplicationStatus::Responded => "RESPONDED",
            ApplicationStatus::InterviewScheduled => "INTERVIEW_SCHEDULED",
            ApplicationStatus::InterviewCompleted => "INTERVIEW_COMPLETED",
            ApplicationStatus::OfferReceived => "OFFER_RECEIVED",
            ApplicationStatus::OfferAccepted => "OFFER_ACCEPTED",
            ApplicationStatus::OfferDeclined => "OFFER_DECLINED",
            ApplicationStatus::Rejected => "REJECTED",
            ApplicationStatus::Withdrawn => "WITHDRAWN",
        }
    }

    /// The application has reached an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::OfferAccepted
                | ApplicationStatus::OfferDeclined
                | ApplicationStatus::Rejected
                | ApplicationStatus::Withdrawn
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    // Accepts "interview-scheduled" as well as "INTERVIEW_SCHEDULED".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_uppercase();
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl ToSql for ApplicationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ApplicationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// --- User ---

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub linkedin_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "<redacted>");
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("linkedin_id", &self.linkedin_id)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub linkedin_id: Option<String>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            linkedin_id: None,
        }
    }

    pub fn with_linkedin_id(mut self, linkedin_id: impl Into<String>) -> Self {
        self.linkedin_id = Some(linkedin_id.into());
        self
    }
}

/// What the sign-in provider hands back after an OAuth login.
#[derive(Clone)]
pub struct LinkedInProfile {
    pub linkedin_id: String,
    pub email: String,
    pub name: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

// --- Job application ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobApplication {
    pub id: i64,
    pub user_id: i64,
    pub job_id: String, // id of the posting on the job board
    pub company_name: String,
    pub job_title: String,
    pub location: Option<String>,
    pub job_type: Option<String>,
    pub salary_range: Option<String>,
    pub description: Option<String>,
    pub status: ApplicationStatus,
    pub applied_date: Option<DateTime<Utc>>,
    pub response_date: Option<DateTime<Utc>>,
    pub interview_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewJobApplication {
    pub user_id: i64,
    pub job_id: String,
    pub company_name: String,
    pub job_title: String,
    pub location: Option<String>,
    pub job_type: Option<String>,
    pub salary_range: Option<String>,
    pub description: Option<String>,
    /// `None` means `Draft`.
    pub status: Option<ApplicationStatus>,
    pub applied_date: Option<DateTime<Utc>>,
    pub response_date: Option<DateTime<Utc>>,
    pub interview_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl NewJobApplication {
    pub fn new(
        user_id: i64,
        job_id: impl Into<String>,
        company_name: impl Into<String>,
        job_title: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            job_id: job_id.into(),
            company_name: company_name.into(),
            job_title: job_title.into(),
            ..Default::default()
        }
    }
}

/// Per-status counts for one user's applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplicationStats {
    pub total: usize,
    pub by_status: BTreeMap<ApplicationStatus, usize>,
}

impl ApplicationStats {
    pub fn count(&self, status: ApplicationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Applications still waiting on an outcome (submitted, not terminal).
    pub fn in_progress(&self) -> usize {
        self.by_status
            .iter()
            .filter(|(status, _)| **status != ApplicationStatus::Draft && !status.is_terminal())
            .map(|(_, n)| n)
            .sum()
    }
}

// --- User preferences ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub id: i64,
    pub user_id: i64,
    pub desired_job_titles: BTreeSet<String>,
    pub desired_locations: BTreeSet<String>,
    pub desired_industries: BTreeSet<String>,
    pub desired_job_types: BTreeSet<String>,
    pub experience_level: Option<String>,
    pub min_salary: Option<i32>,
    pub max_salary: Option<i32>,
    pub remote_only: bool,
    pub auto_apply: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUserPreferences {
    pub user_id: i64,
    pub desired_job_titles: BTreeSet<String>,
    pub desired_locations: BTreeSet<String>,
    pub desired_industries: BTreeSet<String>,
    pub desired_job_types: BTreeSet<String>,
    pub experience_level: Option<String>,
    pub min_salary: Option<i32>,
    pub max_salary: Option<i32>,
    pub remote_only: bool,
    pub auto_apply: bool,
}

impl NewUserPreferences {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

impl UserPreferences {
    /// Overwrites every criterion with the values in `new`. Id, owner and
    /// timestamps are left alone.
    pub fn apply(&mut self, new: NewUserPreferences) {
        self.desired_job_titles = new.desired_job_titles;
        self.desired_locations = new.desired_locations;
        self.desired_industries = new.desired_industries;
        self.desired_job_types = new.desired_job_types;
        self.experience_level = new.experience_level;
        self.min_salary = new.min_salary;
        self.max_salary = new.max_salary;
        self.remote_only = new.remote_only;
        self.auto_apply = new.auto_apply;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_accepts_all_spellings() {
        assert_eq!("DRAFT".parse::<ApplicationStatus>(), Ok(ApplicationStatus::Draft));
        assert_eq!(
            "interview-scheduled".parse::<ApplicationStatus>(),
            Ok(ApplicationStatus::InterviewScheduled)
        );
        assert_eq!(
            " offer_received ".parse::<ApplicationStatus>(),
            Ok(ApplicationStatus::OfferReceived)
        );
        for status in ApplicationStatus::ALL {
            assert_eq!(status.as_str().parse::<ApplicationStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        let err = "hired".parse::<ApplicationStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("hired".to_string()));
    }

    #[test]
    fn test_status_default_and_terminal() {
        assert_eq!(ApplicationStatus::default(), ApplicationStatus::Draft);
        let terminal: Vec<_> = ApplicationStatus::ALL
            .into_iter()
            .filter(ApplicationStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                ApplicationStatus::OfferAccepted,
                ApplicationStatus::OfferDeclined,
                ApplicationStatus::Rejected,
                ApplicationStatus::Withdrawn,
            ]
        );
    }

    #[test]
    fn test_status_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&ApplicationStatus::OfferDeclined).unwrap();
        assert_eq!(json, "\"OFFER_DECLINED\"");
        let back: ApplicationStatus = serde_json::from_str("\"WITHDRAWN\"").unwrap();
        assert_eq!(back, ApplicationStatus::Withdrawn);
        assert!(serde_json::from_str::<ApplicationStatus>("\"HIRED\"").is_err());
    }

    #[test]
    fn test_stamp_created_sets_equal_times() {
        let (created, updated) = stamp_created();
        assert_eq!(created, updated);
    }

    #[test]
    fn test_stamp_updated_strictly_advances() {
        // A stamp from the future forces the +1µs path.
        let future = Utc::now() + Duration::hours(1);
        assert_eq!(stamp_updated(future), future + Duration::microseconds(1));

        let past = Utc::now() - Duration::seconds(1);
        assert!(stamp_updated(past) > past);
    }

    #[test]
    fn test_user_debug_redacts_tokens() {
        let (created_at, updated_at) = stamp_created();
        let user = User {
            id: 1,
            email: "a@x.com".to_string(),
            name: "A".to_string(),
            linkedin_id: None,
            access_token: Some("secret-access".to_string()),
            refresh_token: Some("secret-refresh".to_string()),
            created_at,
            updated_at,
        };
        let debug = format!("{:?}", user);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_stats_in_progress_skips_draft_and_terminal() {
        let mut stats = ApplicationStats::default();
        stats.by_status.insert(ApplicationStatus::Draft, 2);
        stats.by_status.insert(ApplicationStatus::Applied, 3);
        stats.by_status.insert(ApplicationStatus::InterviewScheduled, 1);
        stats.by_status.insert(ApplicationStatus::Rejected, 4);
        stats.total = 10;
        assert_eq!(stats.in_progress(), 4);
        assert_eq!(stats.count(ApplicationStatus::Withdrawn), 0);
    }
}
