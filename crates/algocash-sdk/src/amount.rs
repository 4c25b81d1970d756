/// Amounts in the ledger's base currency, carried as integer micro-units so
/// that a minted value reads back exactly.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CashError, Result};

pub const MICRO_PER_UNIT: u64 = 1_000_000;
const DECIMALS: usize = 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_micro(micro: u64) -> Self {
        Self(micro)
    }

    pub const fn from_units(units: u64) -> Self {
        Self(units * MICRO_PER_UNIT)
    }

    /// Rounds to the nearest micro-unit. Rejects negative and non-finite input.
    pub fn from_units_f64(units: f64) -> Result<Self> {
        let micro = (units * MICRO_PER_UNIT as f64).round();
        if !micro.is_finite() || micro < 0.0 || micro > u64::MAX as f64 {
            return Err(CashError::InvalidAmount(format!(
                "{} is not a valid amount",
                units
            )));
        }
        Ok(Self(micro as u64))
    }

    pub fn micro(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_units_f64(self) -> f64 {
        self.0 as f64 / MICRO_PER_UNIT as f64
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MICRO_PER_UNIT;
        let frac = self.0 % MICRO_PER_UNIT;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let digits = format!("{:06}", frac);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = CashError;

    /// Exact decimal parse: "5", "0.5", "10.000001".
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CashError::InvalidAmount(format!("'{}' is not a valid amount", s));
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > DECIMALS {
            return Err(CashError::InvalidAmount(format!(
                "'{}' has more than {} decimal places",
                s, DECIMALS
            )));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_micro: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(MICRO_PER_UNIT)
            .and_then(|w| w.checked_add(frac_micro))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

// Whole amounts go out as JSON integers, fractional ones as floats: `5`, `0.5`.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0 % MICRO_PER_UNIT == 0 {
            serializer.serialize_u64(self.0 / MICRO_PER_UNIT)
        } else {
            serializer.serialize_f64(self.as_units_f64())
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Whole(u64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match AmountRepr::deserialize(deserializer)? {
            AmountRepr::Whole(units) => units
                .checked_mul(MICRO_PER_UNIT)
                .map(Amount)
                .ok_or_else(|| serde::de::Error::custom("amount overflows")),
            AmountRepr::Float(units) => {
                Amount::from_units_f64(units).map_err(serde::de::Error::custom)
            }
            AmountRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Which denominations a deployment allows to be minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenominationPolicy {
    Discrete(Vec<Amount>),
    /// Inclusive on both ends
    Range { min: Amount, max: Amount },
}

impl Default for DenominationPolicy {
    fn default() -> Self {
        DenominationPolicy::Discrete(vec![
            Amount::from_units(1),
            Amount::from_units(2),
            Amount::from_units(5),
            Amount::from_units(10),
        ])
    }
}

impl DenominationPolicy {
    pub fn check(&self, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(CashError::InvalidAmount("amount must be positive".into()));
        }
        let allowed = match self {
            DenominationPolicy::Discrete(set) => set.contains(&amount),
            DenominationPolicy::Range { min, max } => *min <= amount && amount <= *max,
        };
        if allowed {
            Ok(())
        } else {
            Err(CashError::InvalidAmount(format!(
                "{} is outside the allowed denominations ({})",
                amount, self
            )))
        }
    }

    /// Parses `"1,2,5,10"` or `"0.1..0.9"`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((min, max)) = s.split_once("..") {
            let min: Amount = min.parse()?;
            let max: Amount = max.parse()?;
            if min.is_zero() || min > max {
                return Err(CashError::InvalidAmount(format!(
                    "invalid denomination range '{}'",
                    s
                )));
            }
            return Ok(DenominationPolicy::Range { min, max });
        }

        let mut set = s
            .split(',')
            .map(|part| part.parse::<Amount>())
            .collect::<Result<Vec<_>>>()?;
        if set.is_empty() || set.iter().any(|a| a.is_zero()) {
            return Err(CashError::InvalidAmount(format!(
                "invalid denomination set '{}'",
                s
            )));
        }
        set.sort();
        set.dedup();
        Ok(DenominationPolicy::Discrete(set))
    }
}

impl fmt::Display for DenominationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenominationPolicy::Discrete(set) => {
                let parts: Vec<String> = set.iter().map(|a| a.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            DenominationPolicy::Range { min, max } => write!(f, "{}..{}", min, max),
        }
    }
}
