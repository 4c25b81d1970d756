/// Ledger encoding of vouchers.
///
/// key   = the voucher code
/// value = `{"amount":5,"timestamp":"2025-01-01T00:00:00.000Z","txId":"..."}` while active,
///         `USED` or `WITHDRAWN_<payout txid>` once spent.
///
/// Raw values are decoded once, here, into [`VoucherState`].
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::amount::Amount;
use crate::code::VoucherCode;
use crate::error::{CashError, Result};

pub const USED_SENTINEL: &str = "USED";
pub const WITHDRAWN_PREFIX: &str = "WITHDRAWN_";
pub const INTENT_KEY_PREFIX: &str = "R_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub amount: Amount,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "txId", default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

impl ActiveRecord {
    pub fn new(amount: Amount, timestamp: DateTime<Utc>) -> Self {
        Self {
            amount,
            timestamp,
            tx_id: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CashError::Serialization(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoucherState {
    Active(ActiveRecord),
    /// Terminal. `payout` is the settling transaction when the entry carries one.
    Used { payout: Option<String> },
}

impl VoucherState {
    pub fn decode(raw: &[u8]) -> std::result::Result<Self, String> {
        let text = std::str::from_utf8(raw).map_err(|_| "value is not UTF-8".to_string())?;
        if text == USED_SENTINEL {
            return Ok(VoucherState::Used { payout: None });
        }
        if let Some(tx) = text.strip_prefix(WITHDRAWN_PREFIX) {
            let payout = (!tx.is_empty()).then(|| tx.to_string());
            return Ok(VoucherState::Used { payout });
        }

        let record: ActiveRecord =
            serde_json::from_str(text).map_err(|e| format!("unrecognized value: {}", e))?;
        if record.amount.is_zero() {
            return Err("active record with zero amount".into());
        }
        Ok(VoucherState::Active(record))
    }

    /// Decode the value stored under `key`, reporting failures as corrupt entries.
    pub fn decode_entry(key: &str, raw: &[u8]) -> Result<Self> {
        Self::decode(raw).map_err(|reason| CashError::CorruptEntry {
            key: key.to_string(),
            reason,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            VoucherState::Active(record) => record.encode(),
            VoucherState::Used { payout: None } => Ok(USED_SENTINEL.as_bytes().to_vec()),
            VoucherState::Used { payout: Some(tx) } => Ok(withdrawn_value(tx)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VoucherState::Used { .. })
    }
}

pub fn withdrawn_value(payout_tx: &str) -> Vec<u8> {
    format!("{}{}", WITHDRAWN_PREFIX, payout_tx).into_bytes()
}

/// Written next to a claimed code so an interrupted redemption can be finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionIntent {
    pub destination: String,
    pub amount: Amount,
    #[serde(rename = "claimedAt", with = "iso_millis")]
    pub claimed_at: DateTime<Utc>,
}

impl RedemptionIntent {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CashError::Serialization(e.to_string()))
    }

    pub fn decode_entry(key: &str, raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| CashError::CorruptEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

pub fn intent_key(code: &VoucherCode) -> String {
    format!("{}{}", INTENT_KEY_PREFIX, code)
}

/// The code an intent key belongs to, if `key` is one.
pub fn code_of_intent_key(key: &str) -> Option<VoucherCode> {
    key.strip_prefix(INTENT_KEY_PREFIX)
        .filter(|rest| VoucherCode::is_code_shaped(rest))
        .and_then(|rest| VoucherCode::parse(rest).ok())
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
mod iso_millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_active_record_wire_format() {
        let record = ActiveRecord::new(Amount::from_units(5), ts());
        let raw = record.encode().unwrap();
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            r#"{"amount":5,"timestamp":"2023-11-14T22:13:20.123Z"}"#
        );
    }

    #[test]
    fn test_decode_active_from_existing_writer() {
        let raw = br#"{"amount":0.5,"timestamp":"2025-03-01T10:00:00.000Z","txId":""}"#;
        match VoucherState::decode(raw).unwrap() {
            VoucherState::Active(record) => {
                assert_eq!(record.amount, Amount::from_micro(500_000));
                assert_eq!(record.tx_id.as_deref(), Some(""));
            }
            other => panic!("expected active, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_sentinels() {
        assert_eq!(
            VoucherState::decode(b"USED").unwrap(),
            VoucherState::Used { payout: None }
        );
        assert_eq!(
            VoucherState::decode(b"WITHDRAWN_TX123").unwrap(),
            VoucherState::Used {
                payout: Some("TX123".into())
            }
        );
        assert_eq!(
            VoucherState::decode(b"WITHDRAWN_").unwrap(),
            VoucherState::Used { payout: None }
        );
    }

    #[test]
    fn test_sentinel_encoding_is_exact() {
        let used = VoucherState::Used { payout: None };
        let withdrawn = VoucherState::Used {
            payout: Some("ABC".into()),
        };
        assert_eq!(used.encode().unwrap(), b"USED".to_vec());
        assert_eq!(withdrawn.encode().unwrap(), b"WITHDRAWN_ABC".to_vec());
        assert!(used.is_terminal() && withdrawn.is_terminal());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(VoucherState::decode(b"used").is_err());
        assert!(VoucherState::decode(&[0xff, 0xfe]).is_err());
        assert!(VoucherState::decode(br#"{"amount":0,"timestamp":"2025-03-01T10:00:00Z"}"#).is_err());

        let err = VoucherState::decode_entry("ABCDEFGHIJKL", b"???").unwrap_err();
        assert!(matches!(err, CashError::CorruptEntry { .. }));
    }

    #[test]
    fn test_intent_keys() {
        let code = VoucherCode::parse("ABCDEFGHIJKL").unwrap();
        let key = intent_key(&code);
        assert_eq!(key, "R_ABCDEFGHIJKL");
        assert!(!VoucherCode::is_code_shaped(&key));
        assert_eq!(code_of_intent_key(&key), Some(code));
        assert_eq!(code_of_intent_key("ABCDEFGHIJKL"), None);
    }

    #[test]
    fn test_intent_encoding() {
        let intent = RedemptionIntent {
            destination: "dest".into(),
            amount: Amount::from_units(2),
            claimed_at: ts(),
        };
        let raw = intent.encode().unwrap();
        let back = RedemptionIntent::decode_entry("R_ABCDEFGHIJKL", &raw).unwrap();
        assert_eq!(back, intent);
        assert!(String::from_utf8(raw).unwrap().contains("\"claimedAt\""));
    }
}
