/// In-process ledger with the same observable rules as the real one: flat
/// fees, a minimum balance, atomic submissions, conditional writes and
/// leases. Faults can be injected to exercise the unhappy paths.
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    Confirmation, Expect, LedgerGateway, Submission, SubmissionId, FLAT_FEE, MIN_BALANCE,
};
use crate::amount::Amount;
use crate::error::{LedgerError, LedgerResult};

#[derive(Clone, Debug)]
pub struct MemoryLedgerConfig {
    pub min_balance: Amount,
    pub fee: Amount,
    pub conditional_writes: bool,
}

impl Default for MemoryLedgerConfig {
    fn default() -> Self {
        Self {
            min_balance: MIN_BALANCE,
            fee: FLAT_FEE,
            conditional_writes: true,
        }
    }
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    withhold_confirmations: bool,
    /// Submissions still allowed before every further one fails as unavailable
    submits_before_outage: Option<usize>,
}

#[derive(Default)]
struct Inner {
    round: u64,
    counter: u64,
    state: BTreeMap<String, Vec<u8>>,
    balances: HashMap<String, u64>,
    submissions: HashMap<SubmissionId, u64>,
    leases: HashMap<(String, [u8; 32]), SubmissionId>,
    payments: Vec<(String, String, Amount)>,
    faults: Faults,
}

pub struct MemoryLedger {
    config: MemoryLedgerConfig,
    inner: RwLock<Inner>,
    calls: AtomicUsize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(MemoryLedgerConfig::default())
    }
}

impl MemoryLedger {
    pub fn new(config: MemoryLedgerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &MemoryLedgerConfig {
        &self.config
    }

    pub async fn fund(&self, address: &str, amount: Amount) {
        let mut inner = self.inner.write().await;
        *inner.balances.entry(address.to_string()).or_insert(0) += amount.micro();
    }

    /// Overwrite a key directly, bypassing submission rules.
    pub async fn set_raw(&self, key: &str, value: &[u8]) {
        let mut inner = self.inner.write().await;
        inner.state.insert(key.to_string(), value.to_vec());
    }

    pub async fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().await.state.get(key).cloned()
    }

    /// Every payment applied so far as (from, to, amount).
    pub async fn payments(&self) -> Vec<(String, String, Amount)> {
        self.inner.read().await.payments.clone()
    }

    pub async fn round(&self) -> u64 {
        self.inner.read().await.round
    }

    /// Number of gateway calls served, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().await.faults.unavailable = unavailable;
    }

    /// Apply submissions but never report them confirmed.
    pub async fn withhold_confirmations(&self, withhold: bool) {
        self.inner.write().await.faults.withhold_confirmations = withhold;
    }

    /// Let `n` more submissions through, then fail every submission as unavailable.
    pub async fn fail_submits_after(&self, n: usize) {
        self.inner.write().await.faults.submits_before_outage = Some(n);
    }

    pub async fn clear_faults(&self) {
        self.inner.write().await.faults = Faults::default();
    }

    fn track(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_available(inner: &Inner) -> LedgerResult<()> {
        if inner.faults.unavailable {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        Ok(())
    }

    fn next_id(inner: &mut Inner, sender: &str) -> SubmissionId {
        inner.counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(b"memory_ledger_tx:");
        hasher.update(inner.counter.to_le_bytes());
        hasher.update(sender.as_bytes());
        let digest = hasher.finalize();
        SubmissionId(hex::encode_upper(&digest[..20]))
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn read_all(&self) -> LedgerResult<Vec<(String, Vec<u8>)>> {
        self.track();
        let inner = self.inner.read().await;
        Self::check_available(&inner)?;
        Ok(inner
            .state
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn read_one(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        self.track();
        let inner = self.inner.read().await;
        Self::check_available(&inner)?;
        Ok(inner.state.get(key).cloned())
    }

    async fn submit(&self, submission: Submission) -> LedgerResult<SubmissionId> {
        self.track();
        let mut inner = self.inner.write().await;
        Self::check_available(&inner)?;

        if let Some(remaining) = inner.faults.submits_before_outage {
            if remaining == 0 {
                return Err(LedgerError::Unavailable("connection reset".into()));
            }
            inner.faults.submits_before_outage = Some(remaining - 1);
        }

        if let Some(lease) = &submission.lease {
            let slot = (submission.sender.clone(), *lease.as_bytes());
            if let Some(existing) = inner.leases.get(&slot) {
                return Err(LedgerError::LeaseInUse {
                    lease: lease.to_string(),
                    existing: existing.clone(),
                });
            }
        }

        if self.config.conditional_writes {
            for write in &submission.writes {
                let current = inner.state.get(&write.key);
                let holds = match &write.expect {
                    Expect::Any => true,
                    Expect::Absent => current.is_none(),
                    Expect::Equals(expected) => current == Some(expected),
                };
                if !holds {
                    return Err(LedgerError::ConditionFailed {
                        key: write.key.clone(),
                    });
                }
            }
        }

        let sender_balance = inner
            .balances
            .get(&submission.sender)
            .copied()
            .unwrap_or(0);
        let spend = self.config.fee.micro()
            + submission
                .payment
                .as_ref()
                .map(|p| p.amount.micro())
                .unwrap_or(0);
        let remaining = sender_balance.checked_sub(spend).ok_or_else(|| {
            LedgerError::Rejected(format!(
                "overspend: {} has {}, needs {}",
                submission.sender,
                Amount::from_micro(sender_balance),
                Amount::from_micro(spend)
            ))
        })?;
        if remaining < self.config.min_balance.micro() {
            return Err(LedgerError::Rejected(format!(
                "balance of {} would drop below minimum {}",
                submission.sender, self.config.min_balance
            )));
        }

        let id = Self::next_id(&mut inner, &submission.sender);
        inner
            .balances
            .insert(submission.sender.clone(), remaining);
        if let Some(payment) = &submission.payment {
            *inner.balances.entry(payment.to.clone()).or_insert(0) += payment.amount.micro();
            inner.payments.push((
                submission.sender.clone(),
                payment.to.clone(),
                payment.amount,
            ));
        }
        for write in submission.writes {
            inner.state.insert(write.key, write.value);
        }
        if let Some(lease) = submission.lease {
            inner
                .leases
                .insert((submission.sender.clone(), *lease.as_bytes()), id.clone());
        }
        inner.round += 1;
        let round = inner.round;
        inner.submissions.insert(id.clone(), round);

        debug!("memory ledger applied {} at round {}", id, round);
        Ok(id)
    }

    async fn await_confirmation(&self, id: &SubmissionId) -> LedgerResult<Confirmation> {
        self.track();
        let inner = self.inner.read().await;
        Self::check_available(&inner)?;
        if inner.faults.withhold_confirmations {
            return Ok(Confirmation::TimedOut);
        }
        match inner.submissions.get(id) {
            Some(round) => Ok(Confirmation::Confirmed { round: *round }),
            None => Err(LedgerError::Rejected(format!("unknown submission {}", id))),
        }
    }

    async fn balance(&self, address: &str) -> LedgerResult<Amount> {
        self.track();
        let inner = self.inner.read().await;
        Self::check_available(&inner)?;
        Ok(Amount::from_micro(
            inner.balances.get(address).copied().unwrap_or(0),
        ))
    }

    fn supports_conditional_writes(&self) -> bool {
        self.config.conditional_writes
    }
}
