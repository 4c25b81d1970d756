//! Cash vouchers on a ledger key/value store.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use algocash_sdk::{
//!     Amount, LiquidityPool, MemoryLedger, PoolConfig, SignerLanes, StoreConfig, VoucherStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> algocash_sdk::Result<()> {
//!     let ledger = Arc::new(MemoryLedger::default());
//!     let lanes = Arc::new(SignerLanes::new());
//!     let pool = Arc::new(LiquidityPool::new(
//!         PoolConfig::new("POOL", "CUSTODY"),
//!         ledger.clone(),
//!         lanes.clone(),
//!     ));
//!     let store = VoucherStore::new(StoreConfig::new("CUSTODY"), ledger, pool, lanes);
//!
//!     let receipt = store.mint(Amount::from_units(5)).await?;
//!     println!("{} is worth {}", receipt.code, receipt.amount);
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod amount;
pub mod code;
pub mod entry;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod pool;
pub mod store;

pub use address::{decode_address, encode_address, AddressValidator, ChecksumAddressValidator};
pub use amount::{Amount, DenominationPolicy};
pub use code::{Clock, CodeGenerator, ManualClock, SystemClock, VoucherCode};
pub use entry::{RedemptionIntent, VoucherState};
pub use error::{CashError, LedgerError, Result};
pub use ledger::{
    Confirmation, HttpLedger, LedgerGateway, MemoryLedger, MemoryLedgerConfig, Submission,
    SubmissionId, FLAT_FEE, MIN_BALANCE, SENDER_RESERVE,
};
pub use locks::{KeyedLocks, SignerLanes};
pub use pool::{
    CustodialPayout, LiquidityPool, Payout, PayoutSource, PoolConfig, PoolStatus,
    ReplenishOutcome,
};
pub use store::{
    MintReceipt, NoteStatus, Outstanding, PendingRedemption, Redemption, RedemptionEvent,
    RedemptionRecord, StoreConfig, Verification, VerifyReason, Voucher, VoucherStore,
};
