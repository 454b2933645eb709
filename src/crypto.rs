use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const COST_LEN: usize = 8;
const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + COST_LEN;
/// Upper bounds on a stored cost, so a corrupt header cannot demand huge allocations.
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
/// Prefixed to the plaintext so a wrong passphrase is detected on open.
const MAGIC: &[u8] = b"SAFEHER_JOURNAL_V1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed: wrong passphrase or corrupted journal")]
    Decryption,
    #[error("journal file is malformed")]
    InvalidFormat,
}

/// Argon2id cost used when sealing. The cost is stored in the header, so
/// opening always uses whatever the journal was sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl KdfParams {
    fn to_bytes(self) -> [u8; COST_LEN] {
        let mut out = [0u8; COST_LEN];
        out[..4].copy_from_slice(&self.memory_kib.to_le_bytes());
        out[4..].copy_from_slice(&self.iterations.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let word = |range: std::ops::Range<usize>| -> Result<u32, CryptoError> {
            let raw: [u8; 4] = bytes
                .get(range)
                .and_then(|b| b.try_into().ok())
                .ok_or(CryptoError::InvalidFormat)?;
            Ok(u32::from_le_bytes(raw))
        };
        let kdf = Self {
            memory_kib: word(0..4)?,
            iterations: word(4..8)?,
        };
        if kdf.memory_kib == 0
            || kdf.memory_kib > MAX_MEMORY_KIB
            || kdf.iterations == 0
            || kdf.iterations > MAX_ITERATIONS
        {
            return Err(CryptoError::InvalidFormat);
        }
        Ok(kdf)
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
        }
    }
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, 1, Some(KEY_LEN))
        .map_err(|_| CryptoError::KeyDerivation)?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(key)
}

fn cipher_for(passphrase: &str, salt: &[u8], kdf: KdfParams) -> Result<Aes256Gcm, CryptoError> {
    let key = derive_key(passphrase, salt, kdf)?;
    Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::KeyDerivation)
}

/// Seal a serialized journal under `passphrase`.
/// Layout: salt (32) || nonce (12) || memory_kib (u32 LE) || iterations (u32 LE) || ciphertext
pub fn seal(passphrase: &str, plaintext: &[u8], kdf: KdfParams) -> Result<Vec<u8>, CryptoError> {
    let mut header = [0u8; HEADER_LEN];
    rand::thread_rng().fill_bytes(&mut header[..SALT_LEN + NONCE_LEN]);
    header[SALT_LEN + NONCE_LEN..].copy_from_slice(&kdf.to_bytes());
    let (salt, rest) = header.split_at(SALT_LEN);
    let nonce = &rest[..NONCE_LEN];

    let cipher = cipher_for(passphrase, salt, kdf)?;

    let mut payload = Zeroizing::new(Vec::with_capacity(MAGIC.len() + plaintext.len()));
    payload.extend_from_slice(MAGIC);
    payload.extend_from_slice(plaintext);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), payload.as_slice())
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    sealed.extend_from_slice(&header);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open bytes produced by [`seal`], using the cost recorded in the header.
pub fn open(passphrase: &str, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < HEADER_LEN + MAGIC.len() {
        return Err(CryptoError::InvalidFormat);
    }
    let (header, ciphertext) = sealed.split_at(HEADER_LEN);
    let (salt, rest) = header.split_at(SALT_LEN);
    let (nonce, cost) = rest.split_at(NONCE_LEN);
    let kdf = KdfParams::from_bytes(cost)?;

    let cipher = cipher_for(passphrase, salt, kdf)?;
    let decrypted = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)?,
    );

    if !decrypted.starts_with(MAGIC) {
        return Err(CryptoError::Decryption);
    }
    Ok(Zeroizing::new(decrypted[MAGIC.len()..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        memory_kib: 8,
        iterations: 1,
    };

    #[test]
    fn sealed_journal_opens_with_same_passphrase() {
        let journal = br#"{"cycles":[]}"#;
        let sealed = seal("correct horse", journal, FAST).unwrap();

        assert_ne!(&sealed[HEADER_LEN..], journal.as_slice());
        assert_eq!(open("correct horse", &sealed).unwrap().as_slice(), journal);
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let sealed = seal("correct horse", b"cycles", FAST).unwrap();
        assert!(matches!(
            open("battery staple", &sealed),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn stored_cost_is_used_on_open() {
        let cost = KdfParams {
            memory_kib: 16,
            iterations: 2,
        };
        let sealed = seal("correct horse", b"cycles", cost).unwrap();
        assert_eq!(
            KdfParams::from_bytes(&sealed[SALT_LEN + NONCE_LEN..HEADER_LEN]).unwrap(),
            cost
        );
        assert_eq!(open("correct horse", &sealed).unwrap().as_slice(), b"cycles");
    }

    #[test]
    fn corrupt_cost_is_invalid() {
        let mut sealed = seal("correct horse", b"cycles", FAST).unwrap();
        sealed[SALT_LEN + NONCE_LEN..HEADER_LEN].copy_from_slice(&[0xff; COST_LEN]);
        assert!(matches!(
            open("correct horse", &sealed),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn truncated_input_is_invalid() {
        assert!(matches!(
            open("any", &[0u8; 10]),
            Err(CryptoError::InvalidFormat)
        ));
    }
}
