//! One-time verification PINs.
//!
//! A PIN is a 4-digit decimal code in `0001..=9999`; `0000` is reserved as
//! the invalid sentinel and is never issued. Every group owns a separate code
//! space mapping live PINs to the user they were issued to.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::Rng;
use rollcall_core::{GroupId, UserId};
use tokio_util::sync::CancellationToken;

use crate::ephemeral::{EphemeralStore, Janitor};

/// Number of digits in a PIN.
pub const PIN_DIGITS: usize = 4;

/// Default time budget for finding an unused PIN.
pub const DEFAULT_ISSUE_TIMEOUT: Duration = Duration::from_secs(5);

/// A 4-digit verification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pin(u16);

impl Pin {
    /// Reserved sentinel. Never issued and never valid.
    pub const INVALID: Pin = Pin(0);
    /// Largest valid code.
    pub const MAX: u16 = 9999;

    /// Returns `None` for the sentinel and anything above [`Pin::MAX`].
    pub fn new(code: u16) -> Option<Self> {
        (1..=Self::MAX).contains(&code).then_some(Self(code))
    }

    /// Sample a uniformly random valid PIN.
    pub fn generate() -> Self {
        Self(OsRng.gen_range(1..=Self::MAX))
    }

    /// Parse user input. Surrounding whitespace is ignored; exactly four
    /// ASCII digits are required.
    pub fn parse(input: &str) -> Result<Self, PinError> {
        let digits = input.trim();
        if digits.len() != PIN_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PinError::InvalidFormat);
        }
        let code: u16 = digits.parse().map_err(|_| PinError::InvalidFormat)?;
        Self::new(code).ok_or(PinError::InvalidFormat)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl FromStr for Pin {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// PIN issuance and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    #[error("PIN must be {PIN_DIGITS} digits between 0001 and 9999")]
    InvalidFormat,

    /// Unknown, expired, already used, or issued to someone else.
    #[error("PIN not found")]
    NotFound,

    #[error("no unused PIN found within the issuance budget")]
    Exhausted,

    #[error("PIN issuance cancelled")]
    Cancelled,
}

type CodeSpace = EphemeralStore<Pin, UserId>;

/// Per-group PIN code spaces sharing one janitor.
///
/// Clones share state. [`with_cancellation`](Self::with_cancellation)
/// derives a handle bound to a different cancellation scope.
#[derive(Clone)]
pub struct PinRegistry {
    groups: Arc<DashMap<GroupId, Arc<CodeSpace>>>,
    janitor: Janitor,
    max_age: Duration,
    issue_timeout: Duration,
    cancel: CancellationToken,
}

impl PinRegistry {
    pub fn new(janitor: Janitor, max_age: Duration) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            janitor,
            max_age,
            issue_timeout: DEFAULT_ISSUE_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_issue_timeout(mut self, timeout: Duration) -> Self {
        self.issue_timeout = timeout;
        self
    }

    /// A handle sharing all code spaces whose issuance stops when `cancel`
    /// fires.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    fn code_space(&self, group: GroupId) -> Arc<CodeSpace> {
        self.groups
            .entry(group)
            .or_insert_with(|| EphemeralStore::with_janitor(self.max_age, &self.janitor))
            .clone()
    }

    /// Issue an unused PIN for `user` in `group`.
    ///
    /// Random codes are tried until one is free, bounded by the issuance
    /// timeout and the handle's cancellation token. An earlier PIN issued to
    /// the same user stays valid until it expires or is used.
    pub async fn issue(&self, group: GroupId, user: UserId) -> Result<Pin, PinError> {
        let codes = self.code_space(group);
        let deadline = tokio::time::sleep(self.issue_timeout);
        tokio::pin!(deadline);

        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PinError::Cancelled);
            }

            let pin = Pin::generate();
            attempts += 1;
            let (_, inserted) = codes.get_or_set(pin, user);
            if inserted {
                tracing::debug!(group = %group, user = %user, attempts, "PIN issued");
                return Ok(pin);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PinError::Cancelled),
                _ = &mut deadline => {
                    tracing::warn!(group = %group, attempts, "PIN space exhausted");
                    return Err(PinError::Exhausted);
                }
                _ = tokio::task::yield_now() => {}
            }
        }
    }

    /// Consume `pin` if it was issued to `user` in `group`.
    ///
    /// A PIN presented by a different user is reported as not found and is
    /// left in place for its owner.
    pub fn validate(&self, group: GroupId, user: UserId, pin: Pin) -> Result<UserId, PinError> {
        if !pin.is_valid() {
            return Err(PinError::NotFound);
        }
        let codes = self
            .groups
            .get(&group)
            .map(|codes| Arc::clone(codes.value()))
            .ok_or(PinError::NotFound)?;

        codes
            .take_if(&pin, |owner| *owner == user)
            .ok_or(PinError::NotFound)
    }

    /// Number of live and not-yet-swept PINs in `group`.
    pub fn outstanding(&self, group: GroupId) -> usize {
        self.groups.get(&group).map_or(0, |codes| codes.len())
    }

    /// Close every code space.
    pub async fn close(&self) {
        let spaces: Vec<Arc<CodeSpace>> = self
            .groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.groups.clear();
        for space in spaces {
            space.close().await;
        }
    }

    #[cfg(test)]
    fn fill(&self, group: GroupId, owner: UserId, skip: Option<u16>) {
        let codes = self.code_space(group);
        for code in 1..=Pin::MAX {
            if Some(code) != skip {
                codes.set(Pin(code), owner);
            }
        }
    }
}

impl fmt::Debug for PinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinRegistry")
            .field("groups", &self.groups.len())
            .field("max_age", &self.max_age)
            .field("issue_timeout", &self.issue_timeout)
            .finish()
    }
}
