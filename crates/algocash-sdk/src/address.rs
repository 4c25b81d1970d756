//! Ledger account addresses: base32 (RFC 4648, unpadded) of a 32-byte public
//! key followed by a 4-byte checksum, the last 4 bytes of SHA-512/256(key).

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha512_256};

use crate::error::{CashError, Result};

pub const PUBLIC_KEY_LEN: usize = 32;
const CHECKSUM_LEN: usize = 4;
/// 36 bytes of base32 without padding
pub const ADDRESS_LEN: usize = 58;

/// Decides whether a string is a well-formed ledger address.
pub trait AddressValidator: Send + Sync {
    fn validate(&self, address: &str) -> Result<()>;
}

fn checksum(public_key: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha512_256::digest(public_key);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    out
}

/// Address of `public_key`.
pub fn encode_address(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    let mut bytes = Vec::with_capacity(PUBLIC_KEY_LEN + CHECKSUM_LEN);
    bytes.extend_from_slice(public_key);
    bytes.extend_from_slice(&checksum(public_key));
    BASE32_NOPAD.encode(&bytes)
}

/// Public key an address stands for.
pub fn decode_address(address: &str) -> Result<[u8; PUBLIC_KEY_LEN]> {
    let invalid = |reason: String| CashError::InvalidAddress(format!("{}: {}", address, reason));

    if address.len() != ADDRESS_LEN {
        return Err(invalid(format!(
            "expected {} characters, got {}",
            ADDRESS_LEN,
            address.len()
        )));
    }
    let bytes = BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|e| invalid(e.to_string()))?;
    if bytes.len() != PUBLIC_KEY_LEN + CHECKSUM_LEN {
        return Err(invalid(format!("decoded to {} bytes", bytes.len())));
    }

    let (key, sum) = bytes.split_at(PUBLIC_KEY_LEN);
    if checksum(key) != sum {
        return Err(invalid("checksum mismatch".to_string()));
    }

    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(key);
    Ok(public_key)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumAddressValidator;

impl AddressValidator for ChecksumAddressValidator {
    fn validate(&self, address: &str) -> Result<()> {
        decode_address(address).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_ADDRESS: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ";

    #[test]
    fn test_known_addresses() {
        assert_eq!(encode_address(&[0u8; 32]), ZERO_ADDRESS);
        assert_eq!(
            encode_address(&[7u8; 32]),
            "A4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DVZ36IB4"
        );
        assert_eq!(decode_address(ZERO_ADDRESS).unwrap(), [0u8; 32]);
    }

    #[test]
    fn test_validator_accepts_checksummed_addresses() {
        let validator = ChecksumAddressValidator;
        for seed in [1u8, 42, 255] {
            let address = encode_address(&[seed; 32]);
            assert_eq!(address.len(), ADDRESS_LEN);
            assert!(validator.validate(&address).is_ok());
        }
    }

    #[test]
    fn test_bad_checksum() {
        let mut address = encode_address(&[7u8; 32]).into_bytes();
        // Last character only carries checksum bits
        address[ADDRESS_LEN - 1] = if address[ADDRESS_LEN - 1] == b'A' { b'E' } else { b'A' };
        let address = String::from_utf8(address).unwrap();

        let err = ChecksumAddressValidator.validate(&address).unwrap_err();
        assert!(matches!(err, CashError::InvalidAddress(msg) if msg.contains("checksum")));
    }

    #[test]
    fn test_malformed_addresses() {
        let validator = ChecksumAddressValidator;
        assert!(validator.validate("").is_err());
        assert!(validator.validate("POOL").is_err());
        // base58 keys are not ledger addresses
        assert!(validator
            .validate("4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi")
            .is_err());
        let lowercase = ZERO_ADDRESS.to_ascii_lowercase();
        assert!(validator.validate(&lowercase).is_err());
        let mut wrong_alphabet = ZERO_ADDRESS.to_string();
        wrong_alphabet.replace_range(0..1, "1");
        assert!(validator.validate(&wrong_alphabet).is_err());
    }
}
