//! Gateway to the external key/value ledger.
//!
//! Every write is submit-then-confirm. A submission bundles zero or one
//! payment with any number of key writes and is applied atomically, or not
//! at all. Nothing read through the gateway may be cached across calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::amount::Amount;
use crate::error::{CashError, LedgerResult, Result};

pub mod http;
pub mod memory;

pub use http::HttpLedger;
pub use memory::{MemoryLedger, MemoryLedgerConfig};

/// Smallest balance a submission may leave its sender with.
pub const MIN_BALANCE: Amount = Amount::from_micro(100_000);
/// Charged to the sender of every submission.
pub const FLAT_FEE: Amount = Amount::from_micro(1_000);
/// What a sender must hold beyond any payment: the minimum balance plus one fee.
pub const SENDER_RESERVE: Amount = Amount::from_micro(101_000);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition on the current value of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expect {
    Any,
    Absent,
    Equals(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyWrite {
    pub key: String,
    pub value: Vec<u8>,
    pub expect: Expect,
}

impl KeyWrite {
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            expect: Expect::Any,
        }
    }

    pub fn if_absent(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            expect: Expect::Absent,
        }
    }

    pub fn if_equals(key: impl Into<String>, value: Vec<u8>, current: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            expect: Expect::Equals(current),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payment {
    pub to: String,
    pub amount: Amount,
}

/// Per-sender idempotency key: a ledger accepts one submission per (sender, lease).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Lease([u8; 32]);

impl Lease {
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"algocash_lease:");
        hasher.update(label.as_bytes());
        let result = hasher.finalize();

        let mut lease = [0u8; 32];
        lease.copy_from_slice(&result);
        Self(lease)
    }

    pub fn for_redemption(code: &str) -> Self {
        Self::derive(&format!("redeem:{}", code))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Signing identity. Pays the fee, and the payment if there is one.
    pub sender: String,
    pub writes: Vec<KeyWrite>,
    pub payment: Option<Payment>,
    pub lease: Option<Lease>,
    pub note: Option<String>,
}

impl Submission {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            writes: Vec::new(),
            payment: None,
            lease: None,
            note: None,
        }
    }

    pub fn write(mut self, write: KeyWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn pay(mut self, to: impl Into<String>, amount: Amount) -> Self {
        self.payment = Some(Payment {
            to: to.into(),
            amount,
        });
        self
    }

    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { round: u64 },
    TimedOut,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Full scan of the application's namespace.
    async fn read_all(&self) -> LedgerResult<Vec<(String, Vec<u8>)>>;

    async fn read_one(&self, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    async fn submit(&self, submission: Submission) -> LedgerResult<SubmissionId>;

    /// Polls for a bounded number of rounds. `TimedOut` means the outcome is unknown.
    async fn await_confirmation(&self, id: &SubmissionId) -> LedgerResult<Confirmation>;

    async fn balance(&self, address: &str) -> LedgerResult<Amount>;

    /// Whether `Expect` preconditions are enforced by the ledger itself.
    fn supports_conditional_writes(&self) -> bool;
}

/// Waits for `id` and turns a timeout into [`CashError::ConfirmationTimeout`].
pub async fn confirm(ledger: &dyn LedgerGateway, id: &SubmissionId) -> Result<u64> {
    match ledger.await_confirmation(id).await? {
        Confirmation::Confirmed { round } => Ok(round),
        Confirmation::TimedOut => Err(CashError::ConfirmationTimeout(id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_stable_and_distinct() {
        assert_eq!(Lease::for_redemption("ABC"), Lease::for_redemption("ABC"));
        assert_ne!(Lease::for_redemption("ABC"), Lease::for_redemption("ABD"));
        assert_ne!(Lease::derive("redeem:ABC"), Lease::derive("ABC"));
        assert_eq!(Lease::derive("x").to_string().len(), 64);
    }

    #[test]
    fn test_submission_builder() {
        let submission = Submission::new("SENDER")
            .write(KeyWrite::if_absent("K", b"V".to_vec()))
            .pay("DEST", Amount::from_units(1))
            .with_note("mint");

        assert_eq!(submission.writes.len(), 1);
        assert_eq!(submission.writes[0].expect, Expect::Absent);
        assert_eq!(submission.payment.as_ref().unwrap().to, "DEST");
        assert_eq!(submission.note.as_deref(), Some("mint"));
        assert!(submission.lease.is_none());
    }
}
