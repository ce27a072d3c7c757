//! Credential model and renewal outcome types

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credential class holding a browser session cookie
pub const SESSION_COOKIE_KEY: &str = "GMAIL_COOKIE";

/// Status of a credential row, stored as an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
    Inactive = 0,
    Active = 1,
}

impl CredentialStatus {
    /// Integer representation used in the `status` column
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decode the `status` column
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Inactive),
            1 => Some(Self::Active),
            _ => None,
        }
    }
}

/// How the `expires` column is persisted by a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryMode {
    /// Integer epoch seconds
    #[default]
    EpochSeconds,
    /// Calendar date, read back as midnight UTC
    Date,
}

impl ExpiryMode {
    /// Convert an epoch-seconds column value
    pub fn from_epoch(seconds: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(seconds, 0).single()
    }

    /// Convert a date column value
    pub fn from_date(date: NaiveDate) -> DateTime<Utc> {
        date.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_default()
    }

    /// Truncate an instant to what this mode can persist
    pub fn truncate(self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::EpochSeconds => Self::from_epoch(at.timestamp()).unwrap_or(at),
            Self::Date => Self::from_date(at.date_naive()),
        }
    }
}

/// Persisted credential row from the `configs` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub group: String,
    pub key: String,
    pub value: Option<String>,
    pub status: CredentialStatus,
    pub expires: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
}

impl Credential {
    /// Returns the stored cookie if there is anything to renew
    pub fn renewable_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Why a credential was rejected by the external service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Response status other than 200
    Status(u16),
    /// Landing page indicator missing or pointing elsewhere
    Location(Option<String>),
    /// The response carried a `link` header, i.e. a login challenge
    LoginRedirect(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "unexpected status {}", status),
            Self::Location(Some(location)) => write!(f, "unexpected location {}", location),
            Self::Location(None) => write!(f, "missing location"),
            Self::LoginRedirect(link) => write!(f, "login redirect {}", link),
        }
    }
}

/// Classified result of one renewal attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service handed out fresh cookie values
    Renewed {
        value: String,
        expires: Option<DateTime<Utc>>,
    },
    /// The credential is expired or revoked
    Invalid(InvalidReason),
    /// The credential is still valid and nothing was refreshed
    NoChange,
}
