/// Gateway backed by a ledger node's REST API. Reads go to the node; writes
/// are handed to the external signing service, which signs with the
/// submission's sender identity and broadcasts.
use algocash_net::{NodeClient, StateEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Confirmation, Expect, LedgerGateway, Submission, SubmissionId};
use crate::amount::Amount;
use crate::error::{LedgerError, LedgerResult};

/// Rounds to poll before reporting an unknown outcome.
pub const DEFAULT_CONFIRMATION_ROUNDS: u32 = 4;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Signing-service wire format. Byte strings are hex encoded.
#[derive(Serialize)]
struct WireSubmission<'a> {
    #[serde(rename = "app-id")]
    app_id: u64,
    sender: &'a str,
    writes: Vec<WireWrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment: Option<WirePayment<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Serialize)]
struct WireWrite {
    key: String,
    value: String,
    /// "any", "absent" or the hex of the expected current value
    expect: String,
}

#[derive(Serialize)]
struct WirePayment<'a> {
    to: &'a str,
    /// micro-units
    amount: u64,
}

impl<'a> WireSubmission<'a> {
    fn from_submission(app_id: u64, submission: &'a Submission) -> Self {
        let writes = submission
            .writes
            .iter()
            .map(|w| WireWrite {
                key: hex::encode(w.key.as_bytes()),
                value: hex::encode(&w.value),
                expect: match &w.expect {
                    Expect::Any => "any".to_string(),
                    Expect::Absent => "absent".to_string(),
                    Expect::Equals(current) => hex::encode(current),
                },
            })
            .collect();

        Self {
            app_id,
            sender: &submission.sender,
            writes,
            payment: submission.payment.as_ref().map(|p| WirePayment {
                to: &p.to,
                amount: p.amount.micro(),
            }),
            lease: submission.lease.map(|l| l.to_string()),
            note: submission.note.as_deref(),
        }
    }
}

pub struct HttpLedger {
    client: NodeClient,
    app_id: u64,
    conditional_writes: bool,
    confirmation_rounds: u32,
    poll_interval: Duration,
}

impl HttpLedger {
    pub fn new(client: NodeClient, app_id: u64) -> Self {
        Self {
            client,
            app_id,
            conditional_writes: false,
            confirmation_rounds: DEFAULT_CONFIRMATION_ROUNDS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Declare that the application enforces write preconditions.
    pub fn with_conditional_writes(mut self, enabled: bool) -> Self {
        self.conditional_writes = enabled;
        self
    }

    pub fn with_confirmation_rounds(mut self, rounds: u32) -> Self {
        self.confirmation_rounds = rounds.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn decode_entry(entry: &StateEntry) -> Option<(String, Vec<u8>)> {
        let key = hex::decode(&entry.key).ok()?;
        let key = String::from_utf8(key).ok()?;
        let value = hex::decode(&entry.value).ok()?;
        Some((key, value))
    }
}

/// Body of a 409 from the signing service.
#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
enum Conflict {
    /// The lease is held by an earlier submission.
    Lease { existing: String },
    /// A write precondition did not hold. `key` is hex, as sent.
    Condition { key: String },
}

fn classify_submit_error(e: algocash_net::NetError, submission: &Submission) -> LedgerError {
    let body = match e {
        algocash_net::NetError::Status { status: 409, body } => body,
        other => return LedgerError::from(other),
    };

    match serde_json::from_str::<Conflict>(&body) {
        Ok(Conflict::Lease { existing }) => LedgerError::LeaseInUse {
            lease: submission.lease.map(|l| l.to_string()).unwrap_or_default(),
            existing: SubmissionId(existing),
        },
        Ok(Conflict::Condition { key }) => {
            let key = hex::decode(&key)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or(key);
            LedgerError::ConditionFailed { key }
        }
        Err(e) => {
            warn!("Unrecognised conflict from signing service ({}): {}", e, body);
            LedgerError::Rejected(format!("conflict: {}", body))
        }
    }
}

#[async_trait]
impl LedgerGateway for HttpLedger {
    async fn read_all(&self) -> LedgerResult<Vec<(String, Vec<u8>)>> {
        let state = self.client.application_state(self.app_id).await?;
        let mut entries = Vec::with_capacity(state.entries.len());
        for entry in &state.entries {
            match Self::decode_entry(entry) {
                Some(kv) => entries.push(kv),
                None => warn!("Skipping undecodable state entry with key {}", entry.key),
            }
        }
        Ok(entries)
    }

    async fn read_one(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        // The node only serves the namespace as a whole
        let entries = self.read_all().await?;
        Ok(entries.into_iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    async fn submit(&self, submission: Submission) -> LedgerResult<SubmissionId> {
        let wire = WireSubmission::from_submission(self.app_id, &submission);
        let response = self
            .client
            .broadcast(&wire)
            .await
            .map_err(|e| classify_submit_error(e, &submission))?;
        debug!("Signing service accepted submission {}", response.tx_id);
        Ok(SubmissionId(response.tx_id))
    }

    async fn await_confirmation(&self, id: &SubmissionId) -> LedgerResult<Confirmation> {
        for attempt in 0..self.confirmation_rounds {
            let pending = self.client.pending_transaction(id.as_str()).await?;
            if let Some(round) = pending.confirmed_round.filter(|r| *r > 0) {
                return Ok(Confirmation::Confirmed { round });
            }
            if !pending.pool_error.is_empty() {
                return Err(LedgerError::Rejected(pending.pool_error));
            }
            debug!(
                "{} not confirmed yet (attempt {}/{})",
                id,
                attempt + 1,
                self.confirmation_rounds
            );
            tokio::time::sleep(self.poll_interval).await;
        }
        warn!("Gave up waiting for {} after {} rounds", id, self.confirmation_rounds);
        Ok(Confirmation::TimedOut)
    }

    async fn balance(&self, address: &str) -> LedgerResult<Amount> {
        let account = self.client.account(address).await?;
        Ok(Amount::from_micro(account.amount))
    }

    fn supports_conditional_writes(&self) -> bool {
        self.conditional_writes
    }
}
