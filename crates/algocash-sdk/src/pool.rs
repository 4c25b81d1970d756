//! Liquidity pool: a hot account that funds redemptions and is topped up
//! from the custodial account when it runs low.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::error::{CashError, LedgerError, Result};
use crate::ledger::{confirm, LedgerGateway, Lease, Submission, SubmissionId, SENDER_RESERVE};
use crate::locks::SignerLanes;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub address: String,
    pub custodial_address: String,
    /// Replenish when the balance drops below this
    pub minimum_threshold: Amount,
    pub replenish_amount: Amount,
    /// Kept back on every payout to cover fees and the ledger's minimum balance
    pub reserve: Amount,
}

impl PoolConfig {
    pub fn new(address: impl Into<String>, custodial_address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            custodial_address: custodial_address.into(),
            minimum_threshold: Amount::from_units(5),
            replenish_amount: Amount::from_units(10),
            reserve: SENDER_RESERVE,
        }
    }

    pub fn with_minimum_threshold(mut self, threshold: Amount) -> Self {
        self.minimum_threshold = threshold;
        self
    }

    pub fn with_replenish_amount(mut self, amount: Amount) -> Self {
        self.replenish_amount = amount;
        self
    }

    pub fn with_reserve(mut self, reserve: Amount) -> Self {
        self.reserve = reserve;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub submission: SubmissionId,
    pub round: u64,
    /// The lease was already spent; `submission` is the earlier payout.
    pub reused: bool,
}

/// An account that pays redemptions out.
#[async_trait]
pub trait PayoutSource: Send + Sync {
    fn address(&self) -> &str;

    /// Fails with the source's shortfall error unless `amount` can be paid now.
    async fn ensure_funds(&self, amount: Amount) -> Result<()>;

    /// Try to make `amount` payable. Returns whether funds were added.
    async fn make_room(&self, _amount: Amount) -> Result<bool> {
        Ok(false)
    }

    async fn pay_out(&self, destination: &str, amount: Amount, lease: Option<Lease>)
        -> Result<Payout>;
}

async fn send_payment(
    ledger: &dyn LedgerGateway,
    lanes: &SignerLanes,
    sender: &str,
    destination: &str,
    amount: Amount,
    lease: Option<Lease>,
) -> Result<Payout> {
    let mut submission = Submission::new(sender)
        .pay(destination, amount)
        .with_note("algocash:payout");
    if let Some(lease) = lease {
        submission = submission.with_lease(lease);
    }

    match lanes.submit(ledger, submission).await {
        Ok(id) => {
            let round = confirm(ledger, &id).await?;
            info!("💸 Paid {} from {} to {} ({})", amount, sender, destination, id);
            Ok(Payout {
                submission: id,
                round,
                reused: false,
            })
        }
        Err(LedgerError::LeaseInUse { existing, .. }) => {
            info!("Payout to {} already submitted as {}", destination, existing);
            let round = confirm(ledger, &existing).await?;
            Ok(Payout {
                submission: existing,
                round,
                reused: true,
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplenishOutcome {
    Replenished {
        amount: Amount,
        submission: SubmissionId,
        round: u64,
        balance_before: Amount,
    },
    AboveThreshold {
        balance: Amount,
    },
    /// Another replenishment is already running.
    InFlight,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub address: String,
    pub balance: Amount,
    pub minimum_threshold: Amount,
    pub replenish_amount: Amount,
    pub reserve: Amount,
    pub low: bool,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LiquidityPool {
    config: PoolConfig,
    ledger: Arc<dyn LedgerGateway>,
    lanes: Arc<SignerLanes>,
    replenishing: AtomicBool,
}

impl LiquidityPool {
    pub fn new(config: PoolConfig, ledger: Arc<dyn LedgerGateway>, lanes: Arc<SignerLanes>) -> Self {
        Self {
            config,
            ledger,
            lanes,
            replenishing: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub async fn balance(&self) -> Result<Amount> {
        Ok(self.ledger.balance(&self.config.address).await?)
    }

    /// Top the pool up from the custodial account if it is below threshold.
    pub async fn replenish_if_needed(&self) -> Result<ReplenishOutcome> {
        self.replenish_to(self.config.minimum_threshold, false).await
    }

    /// Top the pool up until it can pay `amount`, whatever the threshold says.
    /// Transfers at least `replenish_amount`, more if the shortfall is larger.
    pub async fn replenish_for(&self, amount: Amount) -> Result<ReplenishOutcome> {
        let target = amount
            .saturating_add(self.config.reserve)
            .max(self.config.minimum_threshold);
        self.replenish_to(target, true).await
    }

    async fn replenish_to(&self, target: Amount, cover_shortfall: bool) -> Result<ReplenishOutcome> {
        let Some(_in_flight) = InFlight::acquire(&self.replenishing) else {
            debug!("Replenishment already in flight");
            return Ok(ReplenishOutcome::InFlight);
        };

        let balance = self.balance().await?;
        if balance >= target {
            return Ok(ReplenishOutcome::AboveThreshold { balance });
        }

        let transfer = if cover_shortfall {
            self.config
                .replenish_amount
                .max(target.saturating_sub(balance))
        } else {
            self.config.replenish_amount
        };
        let custodial = &self.config.custodial_address;
        let needed = transfer.saturating_add(self.config.reserve);
        let available = self.ledger.balance(custodial).await?;
        if available < needed {
            warn!(
                "Custodial account cannot replenish pool: need {}, have {}",
                needed, available
            );
            return Err(CashError::InsufficientFunds {
                account: custodial.clone(),
                needed,
                available,
            });
        }

        info!(
            "🔄 Pool balance {} below {}, transferring {}",
            balance, target, transfer
        );
        let submission = Submission::new(custodial.as_str())
            .pay(self.config.address.as_str(), transfer)
            .with_note("algocash:replenish");
        let id = self.lanes.submit(self.ledger.as_ref(), submission).await?;
        let round = confirm(self.ledger.as_ref(), &id).await?;

        info!("✅ Pool replenished in round {}", round);
        Ok(ReplenishOutcome::Replenished {
            amount: transfer,
            submission: id,
            round,
            balance_before: balance,
        })
    }

    pub async fn status(&self) -> Result<PoolStatus> {
        let balance = self.balance().await?;
        Ok(PoolStatus {
            address: self.config.address.clone(),
            balance,
            minimum_threshold: self.config.minimum_threshold,
            replenish_amount: self.config.replenish_amount,
            reserve: self.config.reserve,
            low: balance < self.config.minimum_threshold,
        })
    }
}

#[async_trait]
impl PayoutSource for LiquidityPool {
    fn address(&self) -> &str {
        &self.config.address
    }

    async fn ensure_funds(&self, amount: Amount) -> Result<()> {
        let available = self.balance().await?;
        let needed = amount.saturating_add(self.config.reserve);
        if available < needed {
            warn!("Pool cannot pay {}: balance {}", amount, available);
            return Err(CashError::InsufficientLiquidity { needed, available });
        }
        Ok(())
    }

    async fn make_room(&self, amount: Amount) -> Result<bool> {
        Ok(matches!(
            self.replenish_for(amount).await?,
            ReplenishOutcome::Replenished { .. }
        ))
    }

    async fn pay_out(
        &self,
        destination: &str,
        amount: Amount,
        lease: Option<Lease>,
    ) -> Result<Payout> {
        self.ensure_funds(amount).await?;

        send_payment(
            self.ledger.as_ref(),
            &self.lanes,
            &self.config.address,
            destination,
            amount,
            lease,
        )
        .await
    }
}

/// Pays redemptions straight from the custodial account.
pub struct CustodialPayout {
    address: String,
    reserve: Amount,
    ledger: Arc<dyn LedgerGateway>,
    lanes: Arc<SignerLanes>,
}

impl CustodialPayout {
    pub fn new(
        address: impl Into<String>,
        ledger: Arc<dyn LedgerGateway>,
        lanes: Arc<SignerLanes>,
    ) -> Self {
        Self {
            address: address.into(),
            reserve: SENDER_RESERVE,
            ledger,
            lanes,
        }
    }

    pub fn with_reserve(mut self, reserve: Amount) -> Self {
        self.reserve = reserve;
        self
    }
}

#[async_trait]
impl PayoutSource for CustodialPayout {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ensure_funds(&self, amount: Amount) -> Result<()> {
        let available = self.ledger.balance(&self.address).await?;
        let needed = amount.saturating_add(self.reserve);
        if available < needed {
            return Err(CashError::InsufficientFunds {
                account: self.address.clone(),
                needed,
                available,
            });
        }
        Ok(())
    }

    async fn pay_out(
        &self,
        destination: &str,
        amount: Amount,
        lease: Option<Lease>,
    ) -> Result<Payout> {
        self.ensure_funds(amount).await?;

        send_payment(
            self.ledger.as_ref(),
            &self.lanes,
            &self.address,
            destination,
            amount,
            lease,
        )
        .await
    }
}
