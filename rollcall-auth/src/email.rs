//! Email policy: host allow-list and the external verifier seam.

use std::fmt;

use async_trait::async_trait;
use rollcall_core::Email;

/// Reasons an email address is refused by the host allow-list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailRejection {
    #[error("email missing @hostname.com")]
    MissingHost,

    #[error("unknown email host {host:?}, must be within {allowed}")]
    UnknownHost { host: String, allowed: String },
}

/// Allowed email hosts. An empty list allows every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailHosts(Vec<String>);

impl EmailHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches('@').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list such as `"csu.edu, mail.csu.edu"`.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hosts(&self) -> &[String] {
        &self.0
    }

    /// Check that `email` has a host and, if the list is non-empty, that the
    /// host is on it. Hosts compare case-insensitively.
    pub fn check(&self, email: &Email) -> Result<(), EmailRejection> {
        let host = email.host().ok_or(EmailRejection::MissingHost)?;
        if self.0.is_empty() || self.0.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)) {
            return Ok(());
        }
        Err(EmailRejection::UnknownHost {
            host: host.to_string(),
            allowed: self.to_string(),
        })
    }
}

/// Lists hosts in prose: `a`, `a or b`, `a, b, or c`.
impl fmt::Display for EmailHosts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("any host"),
            [one] => f.write_str(one),
            [a, b] => write!(f, "{a} or {b}"),
            [init @ .., last] => {
                for host in init {
                    write!(f, "{host}, ")?;
                }
                write!(f, "or {last}")
            }
        }
    }
}

/// Failure reported by an [`EmailVerifier`].
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The address does not belong to a real identity. Shown to the user.
    #[error("{0}")]
    Rejected(String),

    /// The verifier could not be reached.
    #[error("email verifier unavailable: {0}")]
    Unavailable(String),
}

/// External identity check run after the host allow-list, such as a
/// directory lookup at the institution owning the email host.
#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify(&self, email: &Email) -> Result<(), VerifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_hosts() {
        assert_eq!(EmailHosts::new(["a.edu"]).to_string(), "a.edu");
        assert_eq!(EmailHosts::new(["a.edu", "b.edu"]).to_string(), "a.edu or b.edu");
        assert_eq!(
            EmailHosts::new(["a.edu", "b.edu", "c.edu"]).to_string(),
            "a.edu, b.edu, or c.edu"
        );
    }

    #[test]
    fn test_parse_list_normalizes() {
        let hosts = EmailHosts::parse_list(" CSU.edu, @mail.csu.edu ,,");
        assert_eq!(hosts.hosts(), ["csu.edu", "mail.csu.edu"]);
        assert!(EmailHosts::parse_list("").is_empty());
    }

    #[test]
    fn test_check_allowed_host() {
        let hosts = EmailHosts::new(["csu.edu"]);
        assert!(hosts.check(&Email::new("ada@csu.edu")).is_ok());
        assert!(hosts.check(&Email::new("ada@CSU.EDU")).is_ok());
    }

    #[test]
    fn test_check_unknown_host() {
        let hosts = EmailHosts::new(["csu.edu", "mail.csu.edu"]);
        let err = hosts.check(&Email::new("ada@gmail.com")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown email host \"gmail.com\", must be within csu.edu or mail.csu.edu"
        );
    }

    #[test]
    fn test_check_missing_host() {
        let hosts = EmailHosts::default();
        assert_eq!(
            hosts.check(&Email::new("ada")),
            Err(EmailRejection::MissingHost)
        );
        assert!(hosts.check(&Email::new("ada@anything.org")).is_ok());
    }
}
