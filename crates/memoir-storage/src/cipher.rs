//! Block ciphers in CFB mode.

use std::{fmt, str::FromStr};

use aes::{Aes128, Aes192, Aes256};
use blowfish::Blowfish;
use cfb_mode::cipher::{
    AsyncStreamCipher, BlockCipher, BlockEncryptMut, InvalidLength, KeyInit, KeyIvInit,
};
use des::{TdesEde2, TdesEde3};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key_provider::KeyMaterial;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("unsupported cipher algorithm: {name}")]
    UnsupportedAlgorithm { name: String },
    #[error("invalid key size for {algorithm}: {bits} bits")]
    InvalidKeySize { algorithm: Algorithm, bits: usize },
    #[error("invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIv { expected: usize, actual: usize },
}

/// Cipher used for the store file. Selected at open time, never swapped afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    #[default]
    Aes,
    Blowfish,
    TripleDes,
}

impl Algorithm {
    pub fn block_size(self) -> usize {
        match self {
            Algorithm::Aes => 16,
            Algorithm::Blowfish | Algorithm::TripleDes => 8,
        }
    }

    pub fn supports_key_size(self, bits: usize) -> bool {
        match self {
            Algorithm::Aes => matches!(bits, 128 | 192 | 256),
            Algorithm::Blowfish => bits % 8 == 0 && (32..=448).contains(&bits),
            Algorithm::TripleDes => matches!(bits, 128 | 192),
        }
    }

    pub fn check_key_size(self, bits: usize) -> Result<(), CipherError> {
        if self.supports_key_size(bits) {
            Ok(())
        } else {
            Err(CipherError::InvalidKeySize {
                algorithm: self,
                bits,
            })
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes => "aes",
            Algorithm::Blowfish => "blowfish",
            Algorithm::TripleDes => "3des",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CipherError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "aes" => Ok(Algorithm::Aes),
            "blowfish" => Ok(Algorithm::Blowfish),
            "3des" | "tdes" | "triple-des" => Ok(Algorithm::TripleDes),
            _ => Err(CipherError::UnsupportedAlgorithm {
                name: name.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = CipherError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.name().to_string()
    }
}

/// Ciphertext together with the IV it was produced under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// A key bound to an algorithm, encrypting and decrypting in CFB mode.
#[derive(Debug, Clone)]
pub struct CipherStream {
    algorithm: Algorithm,
    key: KeyMaterial,
}

impl CipherStream {
    /// Validates the actual key length against the algorithm.
    pub fn new(algorithm: Algorithm, key: KeyMaterial) -> Result<Self, CipherError> {
        algorithm.check_key_size(key.bits())?;
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Encrypt under a fresh random IV of one block.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CipherError> {
        let mut iv = vec![0u8; self.algorithm.block_size()];
        OsRng.fill_bytes(&mut iv);
        let mut buf = plaintext.to_vec();
        self.apply(Direction::Encrypt, &iv, &mut buf)?;
        Ok(Sealed {
            iv,
            ciphertext: buf,
        })
    }

    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut buf = ciphertext.to_vec();
        self.apply(Direction::Decrypt, iv, &mut buf)?;
        Ok(buf)
    }

    fn apply(&self, direction: Direction, iv: &[u8], buf: &mut [u8]) -> Result<(), CipherError> {
        let expected = self.algorithm.block_size();
        if iv.len() != expected {
            return Err(CipherError::InvalidIv {
                expected,
                actual: iv.len(),
            });
        }
        let key = self.key.as_bytes();
        let result = match (self.algorithm, key.len()) {
            (Algorithm::Aes, 16) => cfb::<Aes128>(direction, key, iv, buf),
            (Algorithm::Aes, 24) => cfb::<Aes192>(direction, key, iv, buf),
            (Algorithm::Aes, 32) => cfb::<Aes256>(direction, key, iv, buf),
            (Algorithm::Blowfish, _) => cfb::<Blowfish>(direction, key, iv, buf),
            (Algorithm::TripleDes, 16) => cfb::<TdesEde2>(direction, key, iv, buf),
            (Algorithm::TripleDes, 24) => cfb::<TdesEde3>(direction, key, iv, buf),
            _ => Err(InvalidLength),
        };
        result.map_err(|_| CipherError::InvalidKeySize {
            algorithm: self.algorithm,
            bits: self.key.bits(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn cfb<C>(direction: Direction, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), InvalidLength>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    match direction {
        Direction::Encrypt => cfb_mode::Encryptor::<C>::new_from_slices(key, iv)?.encrypt(buf),
        Direction::Decrypt => cfb_mode::Decryptor::<C>::new_from_slices(key, iv)?.decrypt(buf),
    }
    Ok(())
}
