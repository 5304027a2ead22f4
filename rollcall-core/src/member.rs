//! Member data: registered profiles and in-progress submissions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::identity::{GroupId, UserId};
use crate::registration::RegistrationError;

// ============================================================================
// Email
// ============================================================================

/// An email address as typed by the user.
///
/// No syntax validation happens here; host policy is enforced by
/// `rollcall_auth::email::EmailHosts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(pub String);

impl Email {
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the address at the first `@`. Returns `None` if either side is empty.
    pub fn split(&self) -> Option<(&str, &str)> {
        match self.0.split_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() => Some((user, host)),
            _ => None,
        }
    }

    /// The host part of the address, if any.
    pub fn host(&self) -> Option<&str> {
        self.split().map(|(_, host)| host)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Pronouns
// ============================================================================

/// Pronouns a member chose to display. `Hidden` means the member left the
/// field blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pronouns {
    HeHim,
    SheHer,
    TheyThem,
    Any,
    #[default]
    Hidden,
}

impl Pronouns {
    pub const ALL: [Pronouns; 5] = [
        Pronouns::HeHim,
        Pronouns::SheHer,
        Pronouns::TheyThem,
        Pronouns::Any,
        Pronouns::Hidden,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeHim => "he/him",
            Self::SheHer => "she/her",
            Self::TheyThem => "they/them",
            Self::Any => "any",
            Self::Hidden => "",
        }
    }
}

/// Error returned when pronouns text is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pronouns {0:?}, must be he/him, she/her, they/them, any, or blank")]
pub struct UnknownPronouns(pub String);

impl FromStr for Pronouns {
    type Err = UnknownPronouns;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| UnknownPronouns(s.trim().to_string()))
    }
}

impl fmt::Display for Pronouns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Pronouns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pronouns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Member metadata and profile
// ============================================================================

/// Validated information a member registered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberMetadata {
    pub email: Email,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub pronouns: Pronouns,
}

impl MemberMetadata {
    /// First name, followed by the last name if there is one.
    pub fn name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }

    /// Display name applied to the member after registration.
    pub fn nickname(&self) -> String {
        let name = self.name();
        match self.pronouns {
            Pronouns::Hidden => name,
            Pronouns::Any => format!("{name} (any pronouns)"),
            pronouns => format!("{name} ({pronouns})"),
        }
    }
}

/// Durable record of a registered member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub metadata: MemberMetadata,
    pub registered_at: DateTime<Utc>,
}

impl MemberProfile {
    pub fn new(group_id: GroupId, user_id: UserId, metadata: MemberMetadata) -> Self {
        Self {
            group_id,
            user_id,
            metadata,
            registered_at: Utc::now(),
        }
    }
}

// ============================================================================
// Pending submission
// ============================================================================

/// Raw registration form contents, kept between form submission and
/// verification. Nothing here has been validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub pronouns: String,
}

impl PendingSubmission {
    /// Returns a copy with surrounding whitespace removed from every field.
    pub fn normalized(&self) -> Self {
        Self {
            email: self.email.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            pronouns: self.pronouns.trim().to_string(),
        }
    }

    /// Validates pronouns and required fields.
    ///
    /// Email host policy is checked separately by the caller.
    pub fn to_metadata(&self) -> Result<MemberMetadata, RegistrationError> {
        let pronouns: Pronouns = self
            .pronouns
            .parse()
            .map_err(|e: UnknownPronouns| RegistrationError::Validation(e.to_string()))?;

        if self.first_name.trim().is_empty() {
            return Err(RegistrationError::Validation(
                "first name must not be empty".into(),
            ));
        }

        Ok(MemberMetadata {
            email: Email::new(self.email.trim()),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            pronouns,
        })
    }
}

impl From<&MemberMetadata> for PendingSubmission {
    fn from(metadata: &MemberMetadata) -> Self {
        Self {
            email: metadata.email.0.clone(),
            first_name: metadata.first_name.clone(),
            last_name: metadata.last_name.clone(),
            pronouns: metadata.pronouns.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pronouns: Pronouns, last: &str) -> MemberMetadata {
        MemberMetadata {
            email: Email::new("ada@csu.edu"),
            first_name: "Ada".into(),
            last_name: last.into(),
            pronouns,
        }
    }

    #[test]
    fn test_pronouns_parse() {
        assert_eq!("he/him".parse::<Pronouns>().unwrap(), Pronouns::HeHim);
        assert_eq!(" She/Her ".parse::<Pronouns>().unwrap(), Pronouns::SheHer);
        assert_eq!("".parse::<Pronouns>().unwrap(), Pronouns::Hidden);
        assert_eq!("any".parse::<Pronouns>().unwrap(), Pronouns::Any);
        assert!("xe/xem".parse::<Pronouns>().is_err());
    }

    #[test]
    fn test_pronouns_serde_uses_display_text() {
        let json = serde_json::to_string(&Pronouns::TheyThem).unwrap();
        assert_eq!(json, "\"they/them\"");

        let hidden: Pronouns = serde_json::from_str("\"\"").unwrap();
        assert_eq!(hidden, Pronouns::Hidden);

        assert!(serde_json::from_str::<Pronouns>("\"it/its\"").is_err());
    }

    #[test]
    fn test_nickname() {
        assert_eq!(metadata(Pronouns::HeHim, "Lovelace").nickname(), "Ada Lovelace (he/him)");
        assert_eq!(metadata(Pronouns::Any, "").nickname(), "Ada (any pronouns)");
        assert_eq!(metadata(Pronouns::Hidden, "Lovelace").nickname(), "Ada Lovelace");
    }

    #[test]
    fn test_email_split() {
        assert_eq!(Email::new("a@b.edu").split(), Some(("a", "b.edu")));
        assert_eq!(Email::new("a@b@c").host(), Some("b@c"));
        assert_eq!(Email::new("nobody").host(), None);
        assert_eq!(Email::new("@b.edu").host(), None);
        assert_eq!(Email::new("a@").host(), None);
    }

    #[test]
    fn test_submission_normalized_trims() {
        let raw = PendingSubmission {
            email: "  ada@csu.edu ".into(),
            first_name: "\tAda".into(),
            last_name: " ".into(),
            pronouns: " any\n".into(),
        };
        let normalized = raw.normalized();
        assert_eq!(normalized.email, "ada@csu.edu");
        assert_eq!(normalized.first_name, "Ada");
        assert_eq!(normalized.last_name, "");
        assert_eq!(normalized.pronouns, "any");
    }

    #[test]
    fn test_submission_rejects_unknown_pronouns() {
        let submission = PendingSubmission {
            email: "ada@csu.edu".into(),
            first_name: "Ada".into(),
            pronouns: "ze/zir".into(),
            ..Default::default()
        };
        let err = submission.to_metadata().unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));
    }

    #[test]
    fn test_submission_requires_first_name() {
        let submission = PendingSubmission {
            email: "ada@csu.edu".into(),
            ..Default::default()
        };
        assert!(matches!(
            submission.to_metadata(),
            Err(RegistrationError::Validation(_))
        ));
    }

    #[test]
    fn test_submission_round_trips_through_metadata() {
        let original = metadata(Pronouns::SheHer, "Lovelace");
        let restored = PendingSubmission::from(&original).to_metadata().unwrap();
        assert_eq!(restored, original);
    }
}
