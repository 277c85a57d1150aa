//! Encryption at rest for the credential store: key files, CFB block ciphers
//! and the encrypted, atomically replaced store file.

pub mod cipher;
pub mod encrypted_store;
pub mod key_provider;

pub use cipher::{Algorithm, CipherError, CipherStream};
pub use encrypted_store::{EncryptedStore, StoreError, StoreGuard};
pub use key_provider::{InMemoryKeyProvider, KeyError, KeyFile, KeyMaterial, KeyProvider};
