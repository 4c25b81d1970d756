//! Voucher lifecycle on the ledger: mint, verify, redeem.
//!
//! A voucher is `Active` until redeemed and `Used` afterwards. Redemption is
//! keyed by the code itself:
//!
//! 1. claim:  `code := USED` and `R_<code> := intent`, conditional on the active value
//! 2. pay:    payout leased on the code, so it can be submitted at most once
//! 3. settle: `code := WITHDRAWN_<payout>`, conditional on `USED`
//!
//! A redemption interrupted between 1 and 3 is pending and is finished by
//! [`VoucherStore::resume`], which never pays twice.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::address::{AddressValidator, ChecksumAddressValidator};
use crate::amount::{Amount, DenominationPolicy};
use crate::code::{CodeGenerator, VoucherCode};
use crate::entry::{
    code_of_intent_key, intent_key, withdrawn_value, ActiveRecord, RedemptionIntent, VoucherState,
    USED_SENTINEL,
};
use crate::error::{CashError, LedgerError, Result};
use crate::ledger::{
    confirm, KeyWrite, LedgerGateway, Lease, Submission, SubmissionId, SENDER_RESERVE,
};
use crate::locks::{KeyedLocks, SignerLanes};
use crate::pool::{Payout, PayoutSource};

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub policy: DenominationPolicy,
    /// Signs every state write and pays the fees
    pub custodial_address: String,
    /// Balance the custodial account must hold before a mint is attempted
    pub mint_fee_reserve: Amount,
    pub collision_retries: u32,
}

impl StoreConfig {
    pub fn new(custodial_address: impl Into<String>) -> Self {
        Self {
            policy: DenominationPolicy::default(),
            custodial_address: custodial_address.into(),
            mint_fee_reserve: SENDER_RESERVE,
            collision_retries: 8,
        }
    }

    pub fn with_policy(mut self, policy: DenominationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_mint_fee_reserve(mut self, reserve: Amount) -> Self {
        self.mint_fee_reserve = reserve;
        self
    }

    pub fn with_collision_retries(mut self, retries: u32) -> Self {
        self.collision_retries = retries.max(1);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MintReceipt {
    pub code: VoucherCode,
    pub amount: Amount,
    pub minted_at: DateTime<Utc>,
    pub submission: SubmissionId,
    pub round: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VerifyReason {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "already used")]
    AlreadyUsed,
    /// The entry under the code cannot be decoded
    #[serde(rename = "corrupt")]
    Corrupt,
}

impl fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerifyReason::Active => "active",
            VerifyReason::NotFound => "not found",
            VerifyReason::AlreadyUsed => "already used",
            VerifyReason::Corrupt => "corrupt",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    pub reason: VerifyReason,
}

impl Verification {
    fn active(amount: Amount) -> Self {
        Self {
            valid: true,
            amount: Some(amount),
            reason: VerifyReason::Active,
        }
    }

    fn invalid(reason: VerifyReason) -> Self {
        Self {
            valid: false,
            amount: None,
            reason,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub code: VoucherCode,
    pub amount: Amount,
    pub destination: String,
    pub payout: SubmissionId,
    pub payout_round: u64,
    pub settlement: SubmissionId,
    /// Finished by `resume` rather than in one pass
    pub resumed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Active,
    /// Claimed, payout not yet settled on the ledger
    Pending,
    Redeemed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Voucher {
    pub code: VoucherCode,
    pub status: NoteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_tx: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RedemptionRecord {
    pub code: VoucherCode,
    pub payout_tx: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingRedemption {
    pub code: VoucherCode,
    pub destination: String,
    pub amount: Amount,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Outstanding {
    pub count: usize,
    pub total: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RedemptionEvent {
    pub code: VoucherCode,
    pub amount: Amount,
    pub destination: String,
    pub payout: SubmissionId,
}

/// Decoded view of the whole namespace.
#[derive(Default)]
struct Snapshot {
    notes: BTreeMap<VoucherCode, VoucherState>,
    intents: HashMap<VoucherCode, RedemptionIntent>,
}

impl Snapshot {
    fn from_entries(entries: Vec<(String, Vec<u8>)>) -> Self {
        let mut snapshot = Snapshot::default();
        for (key, raw) in entries {
            if let Some(code) = code_of_intent_key(&key) {
                match RedemptionIntent::decode_entry(&key, &raw) {
                    Ok(intent) => {
                        snapshot.intents.insert(code, intent);
                    }
                    Err(e) => warn!("Skipping entry: {}", e),
                }
                continue;
            }
            if !VoucherCode::is_code_shaped(&key) {
                continue;
            }
            let Ok(code) = VoucherCode::parse(&key) else {
                continue;
            };
            match VoucherState::decode_entry(&key, &raw) {
                Ok(state) => {
                    snapshot.notes.insert(code, state);
                }
                Err(e) => warn!("Skipping entry: {}", e),
            }
        }
        snapshot
    }

    fn is_pending(&self, code: &VoucherCode, state: &VoucherState) -> bool {
        matches!(state, VoucherState::Used { payout: None }) && self.intents.contains_key(code)
    }
}

pub struct VoucherStore {
    config: StoreConfig,
    ledger: Arc<dyn LedgerGateway>,
    funding: Arc<dyn PayoutSource>,
    lanes: Arc<SignerLanes>,
    codes: CodeGenerator,
    validator: Arc<dyn AddressValidator>,
    code_locks: KeyedLocks,
    events: broadcast::Sender<RedemptionEvent>,
}

impl VoucherStore {
    pub fn new(
        config: StoreConfig,
        ledger: Arc<dyn LedgerGateway>,
        funding: Arc<dyn PayoutSource>,
        lanes: Arc<SignerLanes>,
    ) -> Self {
        if !ledger.supports_conditional_writes() {
            warn!("Ledger does not enforce write conditions, relying on in-process locks");
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            ledger,
            funding,
            lanes,
            codes: CodeGenerator::default(),
            validator: Arc::new(ChecksumAddressValidator),
            code_locks: KeyedLocks::new(),
            events,
        }
    }

    pub fn with_code_generator(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_address_validator(mut self, validator: Arc<dyn AddressValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn payout_address(&self) -> &str {
        self.funding.address()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RedemptionEvent> {
        self.events.subscribe()
    }

    /// Issue a new voucher worth `amount`.
    pub async fn mint(&self, amount: Amount) -> Result<MintReceipt> {
        self.config.policy.check(amount)?;

        let custodial = &self.config.custodial_address;
        let available = self.ledger.balance(custodial).await?;
        if available < self.config.mint_fee_reserve {
            return Err(CashError::InsufficientFunds {
                account: custodial.clone(),
                needed: self.config.mint_fee_reserve,
                available,
            });
        }

        for attempt in 0..self.config.collision_retries {
            let code = self.codes.generate_salted(amount, u64::from(attempt));
            let _guard = self.code_locks.lock(code.as_str()).await;

            if self.ledger.read_one(code.as_str()).await?.is_some() {
                debug!("Code {} already on the ledger, regenerating", code);
                continue;
            }

            let minted_at = self.codes.now();
            let record = ActiveRecord::new(amount, minted_at);
            let submission = Submission::new(custodial.as_str())
                .write(KeyWrite::if_absent(code.as_str(), record.encode()?))
                .with_note("algocash:mint");

            let id = match self.lanes.submit(self.ledger.as_ref(), submission).await {
                Ok(id) => id,
                Err(LedgerError::ConditionFailed { .. }) => {
                    debug!("Code {} taken concurrently, regenerating", code);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let round = confirm(self.ledger.as_ref(), &id).await?;

            info!("🪙 Minted {} worth {} in round {}", code, amount, round);
            return Ok(MintReceipt {
                code,
                amount,
                minted_at,
                submission: id,
                round,
            });
        }

        warn!("Gave up minting {} after {} collisions", amount, self.config.collision_retries);
        Err(CashError::CodeCollision(self.config.collision_retries))
    }

    /// Read-only check of a code. Input that cannot be a code is simply not found.
    /// Only ledger failures are errors; every state of the entry is a verdict.
    pub async fn verify(&self, code: &str) -> Result<Verification> {
        let Ok(code) = VoucherCode::parse(code) else {
            return Ok(Verification::invalid(VerifyReason::NotFound));
        };

        Ok(match self.load(&code).await {
            Ok(None) => Verification::invalid(VerifyReason::NotFound),
            Ok(Some((_, VoucherState::Used { .. }))) => {
                Verification::invalid(VerifyReason::AlreadyUsed)
            }
            Ok(Some((_, VoucherState::Active(record)))) => Verification::active(record.amount),
            Err(e @ CashError::CorruptEntry { .. }) => {
                warn!("Verify of {}: {}", code, e);
                Verification::invalid(VerifyReason::Corrupt)
            }
            Err(e) => return Err(e),
        })
    }

    /// Redeem `code`, paying its value to `destination`.
    pub async fn redeem(&self, code: &str, destination: &str) -> Result<Redemption> {
        let code = VoucherCode::parse(code)?;
        self.load_active(&code).await?;
        self.validator.validate(destination)?;

        let _guard = self.code_locks.lock(code.as_str()).await;
        // Another redeemer may have finished while we waited
        let (raw, record) = self.load_active(&code).await?;
        // A short funding source fails here, with the code still active
        self.funding.ensure_funds(record.amount).await?;

        let intent = RedemptionIntent {
            destination: destination.to_string(),
            amount: record.amount,
            claimed_at: self.codes.now(),
        };
        let claim = Submission::new(self.config.custodial_address.as_str())
            .write(KeyWrite::if_equals(
                code.as_str(),
                USED_SENTINEL.as_bytes().to_vec(),
                raw,
            ))
            .write(KeyWrite::if_absent(intent_key(&code), intent.encode()?))
            .with_note("algocash:claim");

        let claim_id = match self.lanes.submit(self.ledger.as_ref(), claim).await {
            Ok(id) => id,
            Err(LedgerError::ConditionFailed { key }) => {
                debug!("Claim on {} lost the race ({})", code, key);
                return Err(CashError::AlreadyRedeemed(code.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let round = confirm(self.ledger.as_ref(), &claim_id).await?;
        info!("🔒 Claimed {} for {} in round {}", code, destination, round);

        self.pay_and_settle(&code, &intent, false).await
    }

    /// Finish a claimed but unsettled redemption.
    pub async fn resume(&self, code: &str) -> Result<Redemption> {
        let code = VoucherCode::parse(code)?;
        let _guard = self.code_locks.lock(code.as_str()).await;

        match self.load(&code).await? {
            Some((_, VoucherState::Used { payout: None })) => {}
            _ => return Err(CashError::NotPending(code.to_string())),
        }
        let key = intent_key(&code);
        let intent = match self.ledger.read_one(&key).await? {
            Some(raw) => RedemptionIntent::decode_entry(&key, &raw)?,
            None => return Err(CashError::NotPending(code.to_string())),
        };

        info!("Resuming redemption of {} to {}", code, intent.destination);
        let result = self.pay_and_settle(&code, &intent, true).await;
        if !matches!(result, Err(CashError::InsufficientLiquidity { .. })) {
            return result;
        }

        info!("Pending redemption of {} needs {}, topping up", code, intent.amount);
        if self.funding.make_room(intent.amount).await? {
            return self.pay_and_settle(&code, &intent, true).await;
        }
        result
    }

    pub async fn pending_redemptions(&self) -> Result<Vec<PendingRedemption>> {
        let snapshot = self.scan().await?;
        let mut pending: Vec<PendingRedemption> = snapshot
            .notes
            .iter()
            .filter(|(code, state)| snapshot.is_pending(code, state))
            .filter_map(|(code, _)| {
                snapshot.intents.get(code).map(|intent| PendingRedemption {
                    code: code.clone(),
                    destination: intent.destination.clone(),
                    amount: intent.amount,
                    claimed_at: intent.claimed_at,
                })
            })
            .collect();
        pending.sort_by_key(|p| p.claimed_at);
        Ok(pending)
    }

    /// Resume every pending redemption. Failures are logged and left pending.
    pub async fn resume_pending(&self) -> Result<Vec<Redemption>> {
        let pending = self.pending_redemptions().await?;
        let mut finished = Vec::with_capacity(pending.len());
        for p in pending {
            match self.resume(p.code.as_str()).await {
                Ok(redemption) => finished.push(redemption),
                Err(CashError::NotPending(_)) => {}
                Err(e) => warn!("Could not resume {}: {}", p.code, e),
            }
        }
        Ok(finished)
    }

    /// Every voucher on the ledger. Spent ones carry no amount.
    pub async fn list_all(&self, include_spent: bool) -> Result<Vec<Voucher>> {
        let snapshot = self.scan().await?;
        let vouchers = snapshot
            .notes
            .iter()
            .filter_map(|(code, state)| {
                let voucher = match state {
                    VoucherState::Active(record) => Voucher {
                        code: code.clone(),
                        status: NoteStatus::Active,
                        amount: Some(record.amount),
                        minted_at: Some(record.timestamp),
                        payout_tx: None,
                    },
                    VoucherState::Used { .. } if !include_spent => return None,
                    VoucherState::Used { payout } => Voucher {
                        code: code.clone(),
                        status: if snapshot.is_pending(code, state) {
                            NoteStatus::Pending
                        } else {
                            NoteStatus::Redeemed
                        },
                        amount: None,
                        minted_at: None,
                        payout_tx: payout.clone(),
                    },
                };
                Some(voucher)
            })
            .collect();
        Ok(vouchers)
    }

    pub async fn history(&self) -> Result<Vec<RedemptionRecord>> {
        let snapshot = self.scan().await?;
        Ok(snapshot
            .notes
            .into_iter()
            .filter_map(|(code, state)| match state {
                VoucherState::Used {
                    payout: Some(payout_tx),
                } => Some(RedemptionRecord { code, payout_tx }),
                _ => None,
            })
            .collect())
    }

    /// Count and total value of active vouchers.
    pub async fn outstanding(&self) -> Result<Outstanding> {
        let snapshot = self.scan().await?;
        Ok(snapshot
            .notes
            .values()
            .fold(Outstanding::default(), |acc, state| match state {
                VoucherState::Active(record) => Outstanding {
                    count: acc.count + 1,
                    total: acc.total.saturating_add(record.amount),
                },
                VoucherState::Used { .. } => acc,
            }))
    }

    async fn scan(&self) -> Result<Snapshot> {
        Ok(Snapshot::from_entries(self.ledger.read_all().await?))
    }

    async fn load(&self, code: &VoucherCode) -> Result<Option<(Vec<u8>, VoucherState)>> {
        match self.ledger.read_one(code.as_str()).await? {
            Some(raw) => {
                let state = VoucherState::decode_entry(code.as_str(), &raw)?;
                Ok(Some((raw, state)))
            }
            None => Ok(None),
        }
    }

    async fn load_active(&self, code: &VoucherCode) -> Result<(Vec<u8>, ActiveRecord)> {
        match self.load(code).await? {
            None => Err(CashError::UnknownCode(code.to_string())),
            Some((_, VoucherState::Used { .. })) => Err(CashError::AlreadyRedeemed(code.to_string())),
            Some((raw, VoucherState::Active(record))) => Ok((raw, record)),
        }
    }

    async fn pay_and_settle(
        &self,
        code: &VoucherCode,
        intent: &RedemptionIntent,
        resumed: bool,
    ) -> Result<Redemption> {
        let Payout {
            submission: payout,
            round: payout_round,
            reused,
        } = self
            .funding
            .pay_out(
                &intent.destination,
                intent.amount,
                Some(Lease::for_redemption(code.as_str())),
            )
            .await?;
        if reused {
            info!("Payout for {} was already made as {}", code, payout);
        }

        let settlement = self.settle(code, &payout).await?;
        info!("✅ Redeemed {} ({}) to {}", code, intent.amount, intent.destination);

        let event = RedemptionEvent {
            code: code.clone(),
            amount: intent.amount,
            destination: intent.destination.clone(),
            payout: payout.clone(),
        };
        if self.events.send(event).is_err() {
            debug!("No redemption subscribers");
        }

        Ok(Redemption {
            code: code.clone(),
            amount: intent.amount,
            destination: intent.destination.clone(),
            payout,
            payout_round,
            settlement,
            resumed,
        })
    }

    async fn settle(&self, code: &VoucherCode, payout: &SubmissionId) -> Result<SubmissionId> {
        let submission = Submission::new(self.config.custodial_address.as_str())
            .write(KeyWrite::if_equals(
                code.as_str(),
                withdrawn_value(payout.as_str()),
                USED_SENTINEL.as_bytes().to_vec(),
            ))
            .with_note("algocash:settle");

        match self.lanes.submit(self.ledger.as_ref(), submission).await {
            Ok(id) => {
                confirm(self.ledger.as_ref(), &id).await?;
                Ok(id)
            }
            Err(LedgerError::ConditionFailed { .. }) => {
                // Settled elsewhere; accept it only if it records this payout
                match self.load(code).await? {
                    Some((_, VoucherState::Used { payout: Some(tx) })) if tx == payout.as_str() => {
                        Ok(payout.clone())
                    }
                    _ => Err(CashError::LedgerRejected(format!(
                        "settlement of {} conflicts with the ledger state",
                        code
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{derive_code, ManualClock};
    use crate::ledger::MemoryLedger;
    use crate::pool::{LiquidityPool, PoolConfig};

    const CUSTODY: &str = "CUSTODY";
    const POOL: &str = "POOL";
    const NOW: u64 = 1_700_000_000_000;

    struct AnyAddress;

    impl AddressValidator for AnyAddress {
        fn validate(&self, address: &str) -> Result<()> {
            if address.is_empty() {
                return Err(CashError::InvalidAddress("empty".into()));
            }
            Ok(())
        }
    }

    async fn setup() -> (Arc<MemoryLedger>, VoucherStore) {
        let ledger = Arc::new(MemoryLedger::default());
        ledger.fund(CUSTODY, Amount::from_units(100)).await;
        ledger.fund(POOL, Amount::from_units(50)).await;

        let lanes = Arc::new(SignerLanes::new());
        let pool = Arc::new(LiquidityPool::new(
            PoolConfig::new(POOL, CUSTODY),
            ledger.clone(),
            lanes.clone(),
        ));
        let store = VoucherStore::new(StoreConfig::new(CUSTODY), ledger.clone(), pool, lanes)
            .with_code_generator(CodeGenerator::new(Arc::new(ManualClock::new(NOW))))
            .with_address_validator(Arc::new(AnyAddress));
        (ledger, store)
    }

    #[tokio::test]
    async fn test_mint_then_verify() {
        let (ledger, store) = setup().await;

        let receipt = store.mint(Amount::from_units(5)).await.unwrap();
        assert_eq!(receipt.code, derive_code(Amount::from_units(5), NOW));
        assert_eq!(receipt.minted_at.timestamp_millis(), NOW as i64);

        let raw = ledger.raw(receipt.code.as_str()).await.unwrap();
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            r#"{"amount":5,"timestamp":"2023-11-14T22:13:20.000Z"}"#
        );

        let verification = store.verify(receipt.code.as_str()).await.unwrap();
        assert_eq!(verification, Verification::active(Amount::from_units(5)));
        // Idempotent
        assert_eq!(store.verify(receipt.code.as_str()).await.unwrap(), verification);
    }

    #[tokio::test]
    async fn test_mint_rejects_out_of_policy_without_ledger_access() {
        let (ledger, store) = setup().await;

        for amount in [Amount::ZERO, Amount::from_units(3), Amount::from_micro(500_000)] {
            let err = store.mint(amount).await.unwrap_err();
            assert!(matches!(err, CashError::InvalidAmount(_)), "{}", amount);
        }
        assert_eq!(ledger.calls(), 0);
    }

    #[tokio::test]
    async fn test_range_policy() {
        let (_ledger, store) = setup().await;
        let store = VoucherStore {
            config: StoreConfig::new(CUSTODY)
                .with_policy(DenominationPolicy::parse("0.1..0.9").unwrap()),
            ..store
        };

        let receipt = store.mint(Amount::from_micro(300_000)).await.unwrap();
        let verification = store.verify(receipt.code.as_str()).await.unwrap();
        assert_eq!(verification.amount, Some(Amount::from_micro(300_000)));
        assert!(matches!(
            store.mint(Amount::from_units(1)).await,
            Err(CashError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_mint_requires_fee_reserve() {
        let ledger = Arc::new(MemoryLedger::default());
        let lanes = Arc::new(SignerLanes::new());
        let pool = Arc::new(LiquidityPool::new(
            PoolConfig::new(POOL, CUSTODY),
            ledger.clone(),
            lanes.clone(),
        ));
        let store = VoucherStore::new(StoreConfig::new(CUSTODY), ledger, pool, lanes);

        let err = store.mint(Amount::from_units(1)).await.unwrap_err();
        assert!(matches!(err, CashError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_mint_regenerates_on_collision() {
        let (ledger, store) = setup().await;
        let amount = Amount::from_units(2);
        let taken = derive_code(amount, NOW);
        ledger.set_raw(taken.as_str(), b"USED").await;

        let receipt = store.mint(amount).await.unwrap();
        assert_ne!(receipt.code, taken);
        assert_eq!(receipt.code, derive_code(amount, NOW + 1));
        assert_eq!(ledger.raw(taken.as_str()).await.unwrap(), b"USED".to_vec());
    }

    #[tokio::test]
    async fn test_mint_gives_up_after_retries() {
        let (ledger, store) = setup().await;
        let amount = Amount::from_units(1);
        for salt in 0..8 {
            ledger.set_raw(derive_code(amount, NOW + salt).as_str(), b"USED").await;
        }

        let err = store.mint(amount).await.unwrap_err();
        assert!(matches!(err, CashError::CodeCollision(8)));
    }

    #[tokio::test]
    async fn test_verify_outcomes() {
        let (ledger, store) = setup().await;

        let not_found = store.verify("NOPE").await.unwrap();
        assert_eq!(not_found, Verification::invalid(VerifyReason::NotFound));
        assert_eq!(ledger.calls(), 0);

        assert_eq!(
            store.verify("AAAAAAAAAAAA").await.unwrap().reason,
            VerifyReason::NotFound
        );

        ledger.set_raw("BBBBBBBBBBBB", b"WITHDRAWN_TX1").await;
        let used = store.verify("bbbbbbbbbbbb").await.unwrap();
        assert!(!used.valid);
        assert_eq!(used.reason, VerifyReason::AlreadyUsed);
        assert_eq!(
            serde_json::to_value(&used).unwrap(),
            serde_json::json!({"valid": false, "reason": "already used"})
        );

        ledger.set_raw("CCCCCCCCCCCC", b"garbage").await;
        let corrupt = store.verify("CCCCCCCCCCCC").await.unwrap();
        assert_eq!(corrupt, Verification::invalid(VerifyReason::Corrupt));
        assert_eq!(
            serde_json::to_value(&corrupt).unwrap(),
            serde_json::json!({"valid": false, "reason": "corrupt"})
        );
        // Redeeming it is still refused outright
        assert!(matches!(
            store.redeem("CCCCCCCCCCCC", "DEST").await,
            Err(CashError::CorruptEntry { .. })
        ));
    }

    #[tokio::test]
    async fn test_redeem_pays_and_settles() {
        let (ledger, store) = setup().await;
        let mut events = store.subscribe();
        let receipt = store.mint(Amount::from_units(5)).await.unwrap();

        let redemption = store.redeem(receipt.code.as_str(), "DEST").await.unwrap();
        assert_eq!(redemption.amount, Amount::from_units(5));
        assert!(!redemption.resumed);
        assert_eq!(ledger.balance("DEST").await.unwrap(), Amount::from_units(5));

        let raw = ledger.raw(receipt.code.as_str()).await.unwrap();
        assert_eq!(raw, format!("WITHDRAWN_{}", redemption.payout).into_bytes());

        let event = events.recv().await.unwrap();
        assert_eq!(event.code, receipt.code);
        assert_eq!(event.payout, redemption.payout);

        assert_eq!(
            store.verify(receipt.code.as_str()).await.unwrap().reason,
            VerifyReason::AlreadyUsed
        );
        assert!(matches!(
            store.redeem(receipt.code.as_str(), "DEST").await,
            Err(CashError::AlreadyRedeemed(_))
        ));
    }

    #[tokio::test]
    async fn test_redeem_errors() {
        let (ledger, store) = setup().await;
        assert!(matches!(
            store.redeem("NOPE", "DEST").await,
            Err(CashError::UnknownCode(_))
        ));
        assert!(matches!(
            store.redeem("ZZZZZZZZZZZZ", "DEST").await,
            Err(CashError::UnknownCode(_))
        ));

        let receipt = store.mint(Amount::from_units(1)).await.unwrap();
        assert!(matches!(
            store.redeem(receipt.code.as_str(), "").await,
            Err(CashError::InvalidAddress(_))
        ));
        assert!(store.verify(receipt.code.as_str()).await.unwrap().valid);
        assert!(ledger.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_history_and_outstanding() {
        let (_ledger, store) = setup().await;
        let five = store.mint(Amount::from_units(5)).await.unwrap();
        let two = store.mint(Amount::from_units(2)).await.unwrap();
        let one = store.mint(Amount::from_units(1)).await.unwrap();
        store.redeem(two.code.as_str(), "DEST").await.unwrap();

        let active = store.list_all(false).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|v| v.status == NoteStatus::Active));

        let all = store.list_all(true).await.unwrap();
        assert_eq!(all.len(), 3);
        let spent = all.iter().find(|v| v.code == two.code).unwrap();
        assert_eq!(spent.status, NoteStatus::Redeemed);
        assert_eq!(spent.amount, None);

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].code, two.code);

        let outstanding = store.outstanding().await.unwrap();
        assert_eq!(outstanding.count, 2);
        assert_eq!(outstanding.total, Amount::from_units(6));
        assert!(active.iter().any(|v| v.code == five.code));
        assert!(active.iter().any(|v| v.code == one.code));
    }

    #[tokio::test]
    async fn test_resume_requires_pending_claim() {
        let (ledger, store) = setup().await;
        let receipt = store.mint(Amount::from_units(1)).await.unwrap();

        assert!(matches!(
            store.resume(receipt.code.as_str()).await,
            Err(CashError::NotPending(_))
        ));

        // A bare USED without an intent is a settled legacy redemption
        ledger.set_raw("DDDDDDDDDDDD", b"USED").await;
        assert!(matches!(
            store.resume("DDDDDDDDDDDD").await,
            Err(CashError::NotPending(_))
        ));
        assert!(store.pending_redemptions().await.unwrap().is_empty());
    }
}
