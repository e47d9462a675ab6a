//! EIP-191 `personal_sign` hashing, secp256k1 signer recovery and EIP-55
//! address handling.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

use crate::error::VerifyFailure;

/// A 20-byte Ethereum account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Parse a `0x`-prefixed 40-hex address.
    ///
    /// All-lowercase and all-uppercase forms are accepted as-is. Mixed case
    /// must carry a valid EIP-55 checksum.
    pub fn parse(value: &str) -> Option<Self> {
        let hex_part = value.trim().strip_prefix("0x")?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes).ok()?;
        let address = Self(bytes);

        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum() != format!("0x{hex_part}") {
            return None;
        }
        Some(address)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase `0x` form, used for storage keys and comparisons.
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum form.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> if i % 2 == 0 { 4 } else { 0 }) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    fn from_verifying_key(key: &VerifyingKey) -> Result<Self, VerifyFailure> {
        let encoded = key.to_encoded_point(false);
        let pubkey = encoded.as_bytes();
        if pubkey.len() != 65 || pubkey[0] != 0x04 {
            return Err(VerifyFailure::MalformedSignature(
                "unexpected recovered public key format".to_string(),
            ));
        }
        let digest = Keccak256::digest(&pubkey[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

/// Normalize a wallet address to lowercase `0x` hex, if it is valid.
pub fn normalize_wallet_address(value: &str) -> Option<String> {
    Address::parse(value).map(|a| a.to_lower_hex())
}

/// Keccak-256 of the EIP-191 `personal_sign` envelope for `message`.
pub fn eip191_personal_sign_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", bytes.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Recover the address that produced `signature_hex` over `message`.
pub fn recover_signer(message: &str, signature_hex: &str) -> Result<Address, VerifyFailure> {
    let trimmed = signature_hex.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let signature_bytes = hex::decode(hex_part)
        .map_err(|e| VerifyFailure::MalformedSignature(format!("invalid hex: {e}")))?;
    if signature_bytes.len() != 65 {
        return Err(VerifyFailure::MalformedSignature(format!(
            "signature must decode to 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    let sig = EcdsaSignature::try_from(&signature_bytes[..64])
        .map_err(|e| VerifyFailure::MalformedSignature(format!("invalid ECDSA bytes: {e}")))?;
    let recovery_id = normalize_recovery_id(signature_bytes[64])?;
    let prehash = eip191_personal_sign_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| VerifyFailure::MalformedSignature(format!("recovery failed: {e}")))?;
    Address::from_verifying_key(&verifying_key)
}

/// Check that `signature_hex` over `message` was produced by `expected`.
pub fn verify_wallet_signature(
    message: &str,
    signature_hex: &str,
    expected: &Address,
) -> Result<(), VerifyFailure> {
    let recovered = recover_signer(message, signature_hex)?;
    if bool::from(recovered.as_bytes()[..].ct_eq(&expected.as_bytes()[..])) {
        Ok(())
    } else {
        Err(VerifyFailure::SignatureMismatch)
    }
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, VerifyFailure> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => {
            return Err(VerifyFailure::MalformedSignature(
                "recovery id must be 0/1 or 27/28".to_string(),
            ));
        }
    };
    RecoveryId::try_from(id)
        .map_err(|_| VerifyFailure::MalformedSignature("recovery id is invalid".to_string()))
}
