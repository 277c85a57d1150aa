//! Random password strings for filling the `password` column.

use std::fmt;

use rand::{rngs::OsRng, seq::SliceRandom};
use thiserror::Error;
use zeroize::Zeroizing;

const LETTERS_AND_DIGITS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Character set a password is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// ASCII letters and digits.
    #[default]
    Alphanumeric,
    /// Alphanumeric plus ASCII punctuation.
    Secure,
}

impl Charset {
    pub fn alphabet(self) -> Vec<char> {
        let mut chars: Vec<char> = LETTERS_AND_DIGITS.chars().collect();
        if self == Charset::Secure {
            chars.extend(PUNCTUATION.chars());
        }
        chars
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password length must be between 1 and {max}, got {requested}")]
    InvalidLength { requested: usize, max: usize },
}

/// A generated password. The buffer is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// Draw `length` distinct characters from `charset` using the OS CSPRNG.
    pub fn generate(length: usize, charset: Charset) -> Result<Self, PasswordError> {
        let alphabet = charset.alphabet();
        if length == 0 || length > alphabet.len() {
            return Err(PasswordError::InvalidLength {
                requested: length,
                max: alphabet.len(),
            });
        }
        let password: String = alphabet
            .choose_multiple(&mut OsRng, length)
            .copied()
            .collect();
        Ok(Self(Zeroizing::new(password)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(Zeroizing::new(value))
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}
