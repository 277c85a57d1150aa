use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

/// Raw symmetric key bytes, held for the lifetime of a store handle.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Actual key length in bits, which may be short of what was requested.
    pub fn bits(&self) -> usize {
        self.bytes.len() * 8
    }
}

impl fmt::Debug for KeyMaterial {
    // Never print key bytes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no such key file: '{path}'")]
    NotFound { path: String },
    #[error("key file exists: '{path}'")]
    AlreadyExists { path: String },
    #[error("key file i/o error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Source of the store key (a key file in production; memory in tests).
pub trait KeyProvider {
    /// Key size the caller asked for, in bits.
    fn key_size_bits(&self) -> usize;

    fn key(&self) -> Result<KeyMaterial, KeyError>;
}

/// Key file on disk: raw random bytes, of which the first `key_size / 8` are the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    path: PathBuf,
    key_size_bits: usize,
}

impl KeyFile {
    pub const DEFAULT_KEY_SIZE: usize = 256;
    pub const DEFAULT_FILE_SIZE: usize = 1024;

    pub fn new(path: impl Into<PathBuf>, key_size_bits: usize) -> Self {
        Self {
            path: path.into(),
            key_size_bits,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `key_size / 8` bytes. A shorter file yields a shorter key; the
    /// cipher rejects it by length.
    pub fn read(&self) -> Result<KeyMaterial, KeyError> {
        let file = File::open(&self.path).map_err(|source| {
            let path = self.path.display().to_string();
            if source.kind() == io::ErrorKind::NotFound {
                KeyError::NotFound { path }
            } else {
                KeyError::Io { path, source }
            }
        })?;
        let wanted = (self.key_size_bits / 8) as u64;
        let mut bytes = Zeroizing::new(Vec::with_capacity(wanted as usize));
        file.take(wanted)
            .read_to_end(&mut bytes)
            .map_err(|source| KeyError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        if (bytes.len() as u64) < wanted {
            debug!(
                read = bytes.len(),
                wanted, "key file shorter than requested key size"
            );
        }
        Ok(KeyMaterial { bytes })
    }

    /// Create a new key file of `file_size_bits / 8` random bytes, readable and
    /// writable by the owner only. Never overwrites an existing file.
    ///
    /// # Panics
    /// If `file_size_bits < key_size_bits`.
    #[instrument(
        skip_all,
        fields(
            path = %path.as_ref().display(),
            key_size_bits = key_size_bits,
            file_size_bits = file_size_bits
        )
    )]
    pub fn generate(
        path: impl AsRef<Path>,
        key_size_bits: usize,
        file_size_bits: usize,
    ) -> Result<Self, KeyError> {
        assert!(
            file_size_bits >= key_size_bits,
            "key file size ({file_size_bits} bits) must be at least the key size ({key_size_bits} bits)"
        );
        let path = path.as_ref();
        let display = path.display().to_string();

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path).map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                KeyError::AlreadyExists {
                    path: display.clone(),
                }
            } else {
                KeyError::Io {
                    path: display.clone(),
                    source: err,
                }
            }
        })?;

        let mut bytes = Zeroizing::new(vec![0u8; file_size_bits / 8]);
        OsRng.fill_bytes(&mut bytes);
        write_or_remove(path, file, &bytes, |file, bytes| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .map_err(|source| KeyError::Io {
            path: display,
            source,
        })?;

        debug!("generated key file");
        Ok(Self::new(path, key_size_bits))
    }
}

/// Fill a freshly created file; on failure the partial file is removed so a
/// later `generate` can start over.
fn write_or_remove<F>(path: &Path, mut file: File, bytes: &[u8], write: F) -> io::Result<()>
where
    F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
{
    let result = write(&mut file, bytes);
    drop(file);
    if result.is_err() {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "could not remove partial key file");
        }
    }
    result
}

impl KeyProvider for KeyFile {
    fn key_size_bits(&self) -> usize {
        self.key_size_bits
    }

    fn key(&self) -> Result<KeyMaterial, KeyError> {
        self.read()
    }
}

/// Fixed in-memory key for tests and ephemeral stores.
#[derive(Debug, Clone)]
pub struct InMemoryKeyProvider {
    material: KeyMaterial,
}

impl InMemoryKeyProvider {
    pub fn new(material: KeyMaterial) -> Self {
        Self { material }
    }

    /// Fresh random key of `key_size_bits`.
    pub fn random(key_size_bits: usize) -> Self {
        let mut bytes = vec![0u8; key_size_bits / 8];
        OsRng.fill_bytes(&mut bytes);
        Self::new(KeyMaterial::new(bytes))
    }
}

impl KeyProvider for InMemoryKeyProvider {
    fn key_size_bits(&self) -> usize {
        self.material.bits()
    }

    fn key(&self) -> Result<KeyMaterial, KeyError> {
        Ok(self.material.clone())
    }
}
