use std::{
    fs,
    io::{self, Write},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use memoir_core::{Filter, Matches, NewRecord, RecordError, RecordSet};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    cipher::{Algorithm, CipherError, CipherStream, Sealed},
    key_provider::{KeyError, KeyFile, KeyProvider},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Record(#[from] RecordError),
    /// The handle was closed or discarded.
    #[error("store is closed")]
    Closed,
    #[error("store i/o error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Encrypted credential store file, decrypted into memory while open.
///
/// File layout: one cipher block of IV followed by the CFB ciphertext of the
/// table dump. Changes live in memory until [`EncryptedStore::close`] writes
/// them back with a durable replace.
#[derive(Debug)]
pub struct EncryptedStore {
    path: PathBuf,
    cipher: CipherStream,
    records: RecordSet,
    closed: bool,
}

impl EncryptedStore {
    /// Open `store_path` with the key held in `key_path`.
    pub fn open(
        store_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        key_size_bits: usize,
        algorithm: Algorithm,
    ) -> Result<Self, StoreError> {
        Self::open_with(store_path, &KeyFile::new(key_path, key_size_bits), algorithm)
    }

    /// Open `store_path`, taking the key from `provider`. A missing store file
    /// yields an empty table.
    #[instrument(skip_all, fields(algorithm = %algorithm))]
    pub fn open_with<P>(
        store_path: impl Into<PathBuf>,
        provider: &P,
        algorithm: Algorithm,
    ) -> Result<Self, StoreError>
    where
        P: KeyProvider + ?Sized,
    {
        algorithm.check_key_size(provider.key_size_bits())?;
        let cipher = CipherStream::new(algorithm, provider.key()?)?;

        let path = store_path.into();
        recover_backup(&path)?;
        let records = match fs::read(&path) {
            Ok(bytes) => decrypt_records(&cipher, &bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no store file yet, starting empty");
                RecordSet::new_empty()
            }
            Err(err) => return Err(StoreError::io(&path)(err)),
        };
        debug!(path = %path.display(), rows = records.len(), "store opened");

        Ok(Self {
            path,
            cipher,
            records,
            closed: false,
        })
    }

    /// Open a store, run `f` against it, then persist on `Ok` or discard on `Err`.
    pub fn scoped<P, T, E, F>(
        store_path: impl Into<PathBuf>,
        provider: &P,
        algorithm: Algorithm,
        f: F,
    ) -> Result<T, E>
    where
        P: KeyProvider + ?Sized,
        F: FnOnce(&mut EncryptedStore) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = Self::open_with(store_path, provider, algorithm)?.guard();
        match f(&mut *guard) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(err) => {
                guard.abort();
                Err(err)
            }
        }
    }

    pub fn guard(self) -> StoreGuard {
        StoreGuard { store: self }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn algorithm(&self) -> Algorithm {
        self.cipher.algorithm()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get<'a, 'f>(&'a self, filter: &'f Filter) -> Result<Matches<'a, 'f>, StoreError> {
        self.ensure_open()?;
        Ok(self.records.get(filter))
    }

    pub fn put(&mut self, record: NewRecord) -> Result<i64, StoreError> {
        self.ensure_open()?;
        Ok(self.records.put(record)?)
    }

    pub fn delete(&mut self, id: i64) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.records.delete(id);
        Ok(())
    }

    /// Encrypt and durably replace the store file. A no-op once closed; on
    /// failure the handle stays open so the caller can retry.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        let plaintext = Zeroizing::new(self.records.serialize());
        let sealed = self.cipher.encrypt(&plaintext)?;
        replace_durably(&self.path, &sealed)?;
        self.closed = true;
        info!(rows = self.records.len(), "store persisted");
        Ok(())
    }

    /// Close without writing; in-memory changes are dropped.
    pub fn discard(&mut self) {
        if !self.closed {
            debug!(path = %self.path.display(), "discarding unsaved store changes");
            self.closed = true;
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Scoped store handle. [`StoreGuard::commit`] persists; [`StoreGuard::abort`]
/// or dropping the guard uncommitted discards every change.
#[derive(Debug)]
pub struct StoreGuard {
    store: EncryptedStore,
}

impl StoreGuard {
    /// Persist the store. On error the guard stays usable and commit may be retried.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.store.close()
    }

    pub fn abort(mut self) {
        self.store.discard();
    }
}

impl Deref for StoreGuard {
    type Target = EncryptedStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl DerefMut for StoreGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if !self.store.is_closed() {
            warn!(
                path = %self.store.path.display(),
                "store guard dropped without commit; changes discarded"
            );
            self.store.discard();
        }
    }
}

fn decrypt_records(cipher: &CipherStream, bytes: &[u8]) -> Result<RecordSet, StoreError> {
    let block = cipher.algorithm().block_size();
    if bytes.len() < block {
        return Err(RecordError::CorruptData {
            reason: format!("store file is {} bytes, shorter than its IV", bytes.len()),
        }
        .into());
    }
    let (iv, ciphertext) = bytes.split_at(block);
    let plaintext = Zeroizing::new(cipher.decrypt(iv, ciphertext)?);
    Ok(RecordSet::restore(&plaintext)?)
}

/// Sibling path holding the previous store file while a close is in flight.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// A crash between moving the old file aside and renaming the new one into
/// place leaves only the backup; put it back.
fn recover_backup(path: &Path) -> Result<(), StoreError> {
    let backup = backup_path(path);
    if !path.exists() && backup.exists() {
        warn!(
            path = %path.display(),
            backup = %backup.display(),
            "store file missing, restoring from backup"
        );
        fs::rename(&backup, path).map_err(StoreError::io(path))?;
    }
    Ok(())
}

/// Write IV + ciphertext to a temp file in the target directory, fsync it, move
/// the old file aside, rename the temp file over the target, then drop the backup.
fn replace_durably(path: &Path, sealed: &Sealed) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(StoreError::io(&dir))?;
    tmp.write_all(&sealed.iv)
        .and_then(|_| tmp.write_all(&sealed.ciphertext))
        .and_then(|_| tmp.flush())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(StoreError::io(tmp.path()))?;

    let backup = backup_path(path);
    let had_previous = path.exists();
    if had_previous {
        fs::rename(path, &backup).map_err(StoreError::io(path))?;
    }

    if let Err(err) = tmp.persist(path) {
        if had_previous {
            if let Err(restore) = fs::rename(&backup, path) {
                warn!(
                    backup = %backup.display(),
                    error = %restore,
                    "could not move previous store file back into place"
                );
            }
        }
        return Err(StoreError::io(path)(err.error));
    }
    sync_dir(&dir);

    if had_previous {
        if let Err(err) = fs::remove_file(&backup) {
            warn!(backup = %backup.display(), error = %err, "could not remove store backup");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %err, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use memoir_core::Record;

    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    struct Fixture {
        _dir: tempfile::TempDir,
        store_path: PathBuf,
        key_path: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store_path = dir.path().join("store.mem");
        let key_path = dir.path().join("key");
        KeyFile::generate(&key_path, 256, 1024).expect("generate key");
        Fixture {
            _dir: dir,
            store_path,
            key_path,
        }
    }

    fn open(fx: &Fixture, algorithm: Algorithm) -> EncryptedStore {
        EncryptedStore::open(&fx.store_path, &fx.key_path, 256, algorithm).expect("open")
    }

    fn all(store: &EncryptedStore) -> Vec<Record> {
        store
            .get(&Filter::all())
            .expect("get")
            .cloned()
            .collect()
    }

    #[test]
    fn end_to_end_put_close_reopen() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        assert!(all(&store).is_empty());

        store
            .put(NewRecord::new("example.org", "bob", "secret").with_comment("test account"))
            .expect("put");
        let found: Vec<Record> = store
            .get(&Filter::all().username("bob"))
            .expect("get")
            .cloned()
            .collect();
        let expected = Record {
            id: 1,
            domain: Some("example.org".into()),
            username: Some("bob".into()),
            password: Some("secret".into()),
            comment: Some("test account".into()),
        };
        assert_eq!(found, vec![expected.clone()]);
        store.close().expect("close");
        assert!(store.is_closed());

        let reopened = open(&fx, Algorithm::Aes);
        assert_eq!(all(&reopened), vec![expected]);
    }

    #[test]
    fn file_holds_iv_then_ciphertext_without_plaintext() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store
            .put(NewRecord::new("example.org", "bob", "hunter2"))
            .expect("put");
        store.close().expect("close");

        let bytes = fs::read(&fx.store_path).expect("read store");
        assert!(bytes.len() > Algorithm::Aes.block_size());
        let haystack = String::from_utf8_lossy(&bytes);
        assert!(!haystack.contains("hunter2"));
        assert!(!haystack.contains("slots"));
        assert!(!backup_path(&fx.store_path).exists());
    }

    #[test]
    fn round_trips_with_each_algorithm() {
        for algorithm in [Algorithm::Aes, Algorithm::Blowfish] {
            let fx = fixture();
            let mut store = open(&fx, algorithm);
            store
                .put(NewRecord::new("example.org", "bob", "secret").with_comment("test account"))
                .expect("put");
            store
                .put(NewRecord::new("example.org", "alice", "secret"))
                .expect("put");
            store
                .put(NewRecord::new("test.org", "bob", "secret"))
                .expect("put");
            let before = all(&store);
            store.close().expect("close");

            let reopened = open(&fx, algorithm);
            let after = all(&reopened);
            assert_eq!(after, before, "{algorithm}");
            assert_eq!(after.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
            assert_eq!(after[1].comment, None);
        }
    }

    #[test]
    fn second_close_is_a_no_op_and_operations_fail_after_close() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store.close().expect("close");
        let written = fs::read(&fx.store_path).expect("read");
        store.close().expect("second close");
        assert_eq!(fs::read(&fx.store_path).expect("read"), written);

        assert!(matches!(
            store.put(NewRecord::new("a", "b", "c")),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.delete(1), Err(StoreError::Closed)));
        assert!(matches!(store.get(&Filter::all()), Err(StoreError::Closed)));
    }

    #[test]
    fn delete_of_unknown_id_is_silent() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store.put(NewRecord::new("a", "b", "c")).expect("put");
        store.delete(99).expect("delete");
        assert_eq!(all(&store).len(), 1);
        store.delete(1).expect("delete");
        assert!(all(&store).is_empty());
    }

    #[test]
    fn missing_key_file_is_key_not_found() {
        let fx = fixture();
        let missing = fx.key_path.with_extension("nope");
        let err = EncryptedStore::open(&fx.store_path, missing, 256, Algorithm::Aes)
            .expect_err("missing key");
        assert!(matches!(err, StoreError::Key(KeyError::NotFound { .. })));
    }

    #[test]
    fn key_size_is_checked_before_any_io() {
        let fx = fixture();
        let missing = fx.key_path.with_extension("nope");
        let err = EncryptedStore::open(&fx.store_path, missing, 100, Algorithm::Aes)
            .expect_err("bad key size");
        assert!(matches!(
            err,
            StoreError::Cipher(CipherError::InvalidKeySize { bits: 100, .. })
        ));

        let err = EncryptedStore::open(&fx.store_path, &fx.key_path, 512, Algorithm::Blowfish)
            .expect_err("blowfish tops out at 448 bits");
        assert!(matches!(err, StoreError::Cipher(CipherError::InvalidKeySize { .. })));
    }

    #[test]
    fn short_key_file_is_rejected_by_length() {
        let fx = fixture();
        let short_key = fx.key_path.with_extension("short");
        fs::write(&short_key, [1u8; 20]).expect("write");
        let err = EncryptedStore::open(&fx.store_path, &short_key, 256, Algorithm::Aes)
            .expect_err("160-bit AES key");
        assert!(matches!(
            err,
            StoreError::Cipher(CipherError::InvalidKeySize { bits: 160, .. })
        ));
    }

    #[test]
    fn wrong_key_surfaces_as_corrupt_data() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        for i in 0..8 {
            store
                .put(NewRecord::new(format!("site{i}.org"), "bob", "secret"))
                .expect("put");
        }
        store.close().expect("close");

        let other = InMemoryKeyProvider::random(256);
        let err = EncryptedStore::open_with(&fx.store_path, &other, Algorithm::Aes)
            .expect_err("wrong key");
        assert!(matches!(err, StoreError::Record(RecordError::CorruptData { .. })));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let fx = fixture();
        fs::write(&fx.store_path, [0u8; 5]).expect("write");
        let err = EncryptedStore::open(&fx.store_path, &fx.key_path, 256, Algorithm::Aes)
            .expect_err("truncated");
        assert!(matches!(err, StoreError::Record(RecordError::CorruptData { .. })));
    }

    #[test]
    fn dropped_guard_discards_changes() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store.put(NewRecord::new("kept.org", "bob", "pw")).expect("put");
        store.close().expect("close");
        let on_disk = fs::read(&fx.store_path).expect("read");

        {
            let mut guard = open(&fx, Algorithm::Aes).guard();
            guard.put(NewRecord::new("lost.org", "bob", "pw")).expect("put");
            guard.delete(1).expect("delete");
        }
        assert_eq!(fs::read(&fx.store_path).expect("read"), on_disk);

        let reopened = open(&fx, Algorithm::Aes);
        let domains: Vec<_> = all(&reopened).into_iter().filter_map(|r| r.domain).collect();
        assert_eq!(domains, vec!["kept.org".to_string()]);
    }

    #[test]
    fn committed_guard_persists() {
        let fx = fixture();
        let mut guard = open(&fx, Algorithm::Aes).guard();
        guard.put(NewRecord::new("a.org", "bob", "pw")).expect("put");
        guard.commit().expect("commit");
        assert!(guard.is_closed());
        drop(guard);

        assert_eq!(all(&open(&fx, Algorithm::Aes)).len(), 1);
    }

    #[test]
    fn scoped_persists_on_ok_and_discards_on_err() {
        let fx = fixture();
        let provider = KeyFile::new(&fx.key_path, 256);

        let id = EncryptedStore::scoped(&fx.store_path, &provider, Algorithm::Aes, |store| {
            store.put(NewRecord::new("a.org", "bob", "pw"))
        })
        .expect("scoped put");
        assert_eq!(id, 1);

        let result: Result<(), StoreError> =
            EncryptedStore::scoped(&fx.store_path, &provider, Algorithm::Aes, |store| {
                store.put(NewRecord::new("b.org", "bob", "pw"))?;
                Err(StoreError::Closed)
            });
        assert!(result.is_err());

        let records = all(&open(&fx, Algorithm::Aes));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].domain.as_deref(), Some("a.org"));
    }

    #[test]
    fn failed_close_leaves_store_open() {
        let fx = fixture();
        let subdir = fx.key_path.with_extension("d");
        let mut store =
            EncryptedStore::open(subdir.join("store.mem"), &fx.key_path, 256, Algorithm::Aes)
                .expect("open");
        store.put(NewRecord::new("a", "b", "c")).expect("put");

        // The store directory cannot be created once a regular file holds its name.
        fs::write(&subdir, b"not a directory").expect("write");
        let err = store.close().expect_err("parent is a regular file");
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!store.is_closed());
        assert_eq!(all(&store).len(), 1);
    }

    #[test]
    fn ids_keep_counting_across_sessions() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store.put(NewRecord::new("a", "b", "c")).expect("put");
        store.put(NewRecord::new("d", "e", "f")).expect("put");
        store.delete(2).expect("delete");
        store.close().expect("close");

        let mut store = open(&fx, Algorithm::Aes);
        assert_eq!(store.put(NewRecord::new("g", "h", "i")).expect("put"), 3);
    }

    #[test]
    fn open_recovers_from_interrupted_replace() {
        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store.put(NewRecord::new("a.org", "bob", "pw")).expect("put");
        store.close().expect("close");

        // Simulate a crash after the old file was moved aside.
        fs::rename(&fx.store_path, backup_path(&fx.store_path)).expect("move aside");

        let reopened = open(&fx, Algorithm::Aes);
        assert_eq!(all(&reopened).len(), 1);
        assert!(fx.store_path.exists());
        assert!(!backup_path(&fx.store_path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let mut store = open(&fx, Algorithm::Aes);
        store.close().expect("close");
        let mode = fs::metadata(&fx.store_path)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0);
    }
}
