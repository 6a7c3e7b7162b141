//! User-based Security Model primitives for outbound notifications.
//!
//! Implements the sender side of RFC 3414 (key localization,
//! HMAC-MD5-96 / HMAC-SHA-96 authentication, DES-CBC privacy) and
//! RFC 3826 (AES-128-CFB privacy). Nothing here verifies inbound
//! messages; the notification originator only signs and encrypts.

use aes::Aes128;
use aes::cipher::{AsyncStreamCipher, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use des::Des;
use digest::Digest;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Truncated MAC length for HMAC-96 (RFC 3414).
pub const MAC_LEN: usize = 12;

/// Privacy salt length; both DES and AES carry 8 octets of
/// msgPrivacyParameters.
pub const SALT_LEN: usize = 8;

type DesCbcEnc = cbc::Encryptor<Des>;
type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;

/// Authentication protocol identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    /// HMAC-MD5-96 (RFC 3414)
    Md5,
    /// HMAC-SHA-96 (RFC 3414)
    Sha1,
}

impl AuthProtocol {
    /// Digest (and localized key) length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
        }
    }
}

impl std::fmt::Display for AuthProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha1 => write!(f, "SHA"),
        }
    }
}

/// Privacy protocol identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    /// DES-CBC (RFC 3414)
    Des,
    /// AES-128-CFB (RFC 3826)
    Aes128,
}

impl std::fmt::Display for PrivProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Des => write!(f, "DES"),
            Self::Aes128 => write!(f, "AES"),
        }
    }
}

/// Privacy failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Localized key shorter than the cipher requires.
    KeyTooShort,
    /// Cipher rejected key or IV material.
    CipherInit,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyTooShort => write!(f, "localized key too short for cipher"),
            Self::CipherInit => write!(f, "cipher rejected key/IV material"),
        }
    }
}

/// A key localized to one authoritative engine. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    bytes: Vec<u8>,
}

impl LocalizedKey {
    /// Key octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalizedKey({} octets)", self.bytes.len())
    }
}

/// RFC 3414 A.2 password-to-key derivation, localized to `engine_id`.
///
/// An empty password yields an all-zero expansion; callers reject empty
/// passwords at configuration time.
pub fn localize_password(proto: AuthProtocol, password: &[u8], engine_id: &[u8]) -> LocalizedKey {
    let bytes = match proto {
        AuthProtocol::Md5 => localize::<Md5>(password, engine_id),
        AuthProtocol::Sha1 => localize::<Sha1>(password, engine_id),
    };
    LocalizedKey { bytes }
}

fn localize<D: Digest>(password: &[u8], engine_id: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64];
    let mut pos = 0usize;
    for _ in 0..(1024 * 1024 / 64) {
        for b in buf.iter_mut() {
            *b = if password.is_empty() {
                0
            } else {
                let byte = password[pos % password.len()];
                pos += 1;
                byte
            };
        }
        hasher.update(buf);
    }
    let ku = hasher.finalize();

    let mut localizer = D::new();
    localizer.update(&ku);
    localizer.update(engine_id);
    localizer.update(&ku);
    localizer.finalize().to_vec()
}

/// HMAC over the whole message, truncated to 96 bits (RFC 3414 §6/§7).
///
/// HMAC accepts keys of any length, so construction cannot fail; a
/// zero MAC is returned in the impossible error case rather than
/// panicking on the send path.
pub fn hmac96(proto: AuthProtocol, key: &LocalizedKey, message: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = [0u8; MAC_LEN];
    match proto {
        AuthProtocol::Md5 => {
            if let Ok(mut hmac) = <Hmac<Md5> as Mac>::new_from_slice(key.as_bytes()) {
                hmac.update(message);
                mac.copy_from_slice(&hmac.finalize().into_bytes()[..MAC_LEN]);
            }
        }
        AuthProtocol::Sha1 => {
            if let Ok(mut hmac) = <Hmac<Sha1> as Mac>::new_from_slice(key.as_bytes()) {
                hmac.update(message);
                mac.copy_from_slice(&hmac.finalize().into_bytes()[..MAC_LEN]);
            }
        }
    }
    mac
}

/// DES-CBC encryption of a scoped PDU (RFC 3414 §8.1.1.1).
///
/// The localized key supplies the DES key (first 8 octets) and the
/// pre-IV (next 8). The salt combines the engine boots counter with a
/// monotonically increasing local integer; it travels in
/// msgPrivacyParameters. Input is zero-padded to the block size.
pub fn encrypt_des(
    key: &LocalizedKey,
    engine_boots: u32,
    salt_counter: u32,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; SALT_LEN]), CryptoError> {
    let material = key.as_bytes();
    if material.len() < 16 {
        return Err(CryptoError::KeyTooShort);
    }
    let (des_key, pre_iv) = (&material[..8], &material[8..16]);

    let mut salt = [0u8; SALT_LEN];
    salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
    salt[4..].copy_from_slice(&salt_counter.to_be_bytes());

    let mut iv = [0u8; 8];
    for (i, b) in iv.iter_mut().enumerate() {
        *b = salt[i] ^ pre_iv[i];
    }

    let mut buf = plaintext.to_vec();
    let padded = buf.len().div_ceil(8) * 8;
    buf.resize(padded, 0);

    let cipher =
        DesCbcEnc::new_from_slices(des_key, &iv).map_err(|_| CryptoError::CipherInit)?;
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, padded)
        .map_err(|_| CryptoError::CipherInit)?;
    Ok((buf, salt))
}

/// AES-128-CFB encryption of a scoped PDU (RFC 3826 §3.1.2.1).
///
/// The IV is engine boots, engine time, and the 64-bit salt; the salt
/// travels in msgPrivacyParameters.
pub fn encrypt_aes128(
    key: &LocalizedKey,
    engine_boots: u32,
    engine_time: u32,
    salt: u64,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; SALT_LEN]), CryptoError> {
    let material = key.as_bytes();
    if material.len() < 16 {
        return Err(CryptoError::KeyTooShort);
    }

    let salt_bytes = salt.to_be_bytes();
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..].copy_from_slice(&salt_bytes);

    let mut buf = plaintext.to_vec();
    let cipher =
        Aes128CfbEnc::new_from_slices(&material[..16], &iv).map_err(|_| CryptoError::CipherInit)?;
    cipher.encrypt(&mut buf);
    Ok((buf, salt_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::encode_hex;

    const ENGINE_ID: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    #[test]
    fn test_md5_key_localization_rfc3414_a31() {
        let key = localize_password(AuthProtocol::Md5, b"maplesyrup", &ENGINE_ID);
        assert_eq!(
            encode_hex(key.as_bytes()),
            "526f5eed9fcce26f8964c2930787d82b"
        );
    }

    #[test]
    fn test_sha_key_localization_rfc3414_a32() {
        let key = localize_password(AuthProtocol::Sha1, b"maplesyrup", &ENGINE_ID);
        assert_eq!(
            encode_hex(key.as_bytes()),
            "6695febc9288e36282235fc7151f128497b38f3f"
        );
    }

    #[test]
    fn test_hmac96_lengths() {
        let key = localize_password(AuthProtocol::Sha1, b"authpass123", &ENGINE_ID);
        let mac = hmac96(AuthProtocol::Sha1, &key, b"message");
        assert_eq!(mac.len(), MAC_LEN);
        // Same input, same MAC; different message, different MAC.
        assert_eq!(mac, hmac96(AuthProtocol::Sha1, &key, b"message"));
        assert_ne!(mac, hmac96(AuthProtocol::Sha1, &key, b"other"));
    }

    #[test]
    fn test_des_encrypt_pads_and_salts() {
        let key = localize_password(AuthProtocol::Md5, b"privpass123", &ENGINE_ID);
        let (ct, salt) = encrypt_des(&key, 3, 99, b"short").unwrap();
        assert_eq!(ct.len(), 8);
        assert_eq!(&salt[..4], &3u32.to_be_bytes());
        assert_eq!(&salt[4..], &99u32.to_be_bytes());
        // Ciphertext must differ from zero-padded plaintext.
        assert_ne!(&ct[..5], b"short");
    }

    #[test]
    fn test_aes_encrypt_preserves_length() {
        let key = localize_password(AuthProtocol::Sha1, b"privpass123", &ENGINE_ID);
        let plaintext = b"a scoped pdu of odd length!";
        let (ct, salt) = encrypt_aes128(&key, 1, 1000, 42, plaintext).unwrap();
        assert_eq!(ct.len(), plaintext.len());
        assert_eq!(salt, 42u64.to_be_bytes());
        assert_ne!(&ct[..], &plaintext[..]);
    }

    #[test]
    fn test_distinct_salts_distinct_ciphertexts() {
        let key = localize_password(AuthProtocol::Sha1, b"privpass123", &ENGINE_ID);
        let (a, _) = encrypt_aes128(&key, 1, 1000, 1, b"same plaintext").unwrap();
        let (b, _) = encrypt_aes128(&key, 1, 1000, 2, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }
}
