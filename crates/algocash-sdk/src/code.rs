/// Voucher codes: 12 characters from A-Z0-9, derived from the denomination
/// and the wall clock with a small linear congruential generator.
///
/// The derivation is deterministic for an (amount, millisecond) pair. It is
/// not unpredictable and not unique over time; the store probes the ledger
/// before using a fresh code.
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::amount::Amount;
use crate::error::{CashError, Result};

pub const CODE_LENGTH: usize = 12;
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const LCG_MULTIPLIER: u128 = 9301;
const LCG_INCREMENT: u128 = 49297;
const LCG_MODULUS: u128 = 233_280;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoucherCode(String);

impl VoucherCode {
    /// Accepts user input in any case and surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_uppercase();
        if Self::is_code_shaped(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(CashError::UnknownCode(input.to_string()))
        }
    }

    /// True for keys that can hold a voucher: exact length, alphabet only.
    pub fn is_code_shaped(key: &str) -> bool {
        key.len() == CODE_LENGTH && key.bytes().all(|b| CODE_ALPHABET.contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoucherCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VoucherCode {
    type Error = CashError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VoucherCode> for String {
    fn from(code: VoucherCode) -> Self {
        code.0
    }
}

pub fn derive_code(amount: Amount, millis: u64) -> VoucherCode {
    let mut seed = amount.micro() as u128 + millis as u128;
    let mut code = String::with_capacity(CODE_LENGTH);
    for _ in 0..CODE_LENGTH {
        seed = (seed * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
        let index = (seed * CODE_ALPHABET.len() as u128 / LCG_MODULUS) as usize;
        code.push(CODE_ALPHABET[index] as char);
    }
    VoucherCode(code)
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis() as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually driven clock for deterministic tests and replays.
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct CodeGenerator {
    clock: Arc<dyn Clock>,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CodeGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn generate(&self, amount: Amount) -> VoucherCode {
        self.generate_salted(amount, 0)
    }

    /// `salt` shifts the time input, giving a different code within the same millisecond.
    pub fn generate_salted(&self, amount: Amount, salt: u64) -> VoucherCode {
        derive_code(amount, self.clock.now_millis().wrapping_add(salt))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
