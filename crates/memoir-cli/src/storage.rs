use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use dirs::data_dir;
use memoir_storage::{Algorithm, EncryptedStore, KeyFile};
use tracing::debug;

use crate::{cli::StoreArgs, config::Config};

pub const STORE_ENV: &str = "MEMOIR_STORE";
pub const KEY_ENV: &str = "MEMOIR_KEY";

/// Where the store and its key live, and how the store is encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub store_path: PathBuf,
    pub key_path: PathBuf,
    pub key_size: usize,
    pub algorithm: Algorithm,
}

impl StoreSettings {
    pub fn key_file(&self) -> KeyFile {
        KeyFile::new(&self.key_path, self.key_size)
    }

    /// Run `f` in a store session: persisted on `Ok`, discarded on `Err`.
    pub fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut EncryptedStore) -> Result<T>,
    {
        debug!(store = %self.store_path.display(), algorithm = %self.algorithm, "opening store");
        EncryptedStore::scoped(&self.store_path, &self.key_file(), self.algorithm, f)
    }

    pub fn to_config(&self) -> Config {
        Config {
            store_path: Some(self.store_path.clone()),
            key_path: Some(self.key_path.clone()),
            key_size: Some(self.key_size),
            algorithm: Some(self.algorithm),
        }
    }
}

/// Resolve the default data directory for Memoir.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| eyre!("no data dir available"))?;
    Ok(base.join("memoir"))
}

/// Flags win over environment, environment over config, config over defaults.
pub fn resolve(config: &Config, args: &StoreArgs) -> Result<StoreSettings> {
    resolve_with(config, args, |name| std::env::var_os(name).map(PathBuf::from))
}

fn resolve_with(
    config: &Config,
    args: &StoreArgs,
    env: impl Fn(&str) -> Option<PathBuf>,
) -> Result<StoreSettings> {
    let store_path = match args
        .store
        .clone()
        .or_else(|| env(STORE_ENV))
        .or_else(|| config.store_path.clone())
    {
        Some(path) => path,
        None => default_data_dir()?.join("store.mem"),
    };
    let key_path = match args
        .key
        .clone()
        .or_else(|| env(KEY_ENV))
        .or_else(|| config.key_path.clone())
    {
        Some(path) => path,
        None => default_data_dir()?.join("key"),
    };
    let settings = StoreSettings {
        store_path,
        key_path,
        key_size: args
            .key_size
            .or(config.key_size)
            .unwrap_or(KeyFile::DEFAULT_KEY_SIZE),
        algorithm: args.algorithm.or(config.algorithm).unwrap_or_default(),
    };
    Ok(settings)
}

/// Generate the key file named by `settings`.
pub fn init_key(settings: &StoreSettings, file_size: usize) -> Result<()> {
    settings.algorithm.check_key_size(settings.key_size)?;
    if file_size < settings.key_size {
        return Err(eyre!(
            "key file size ({file_size} bits) must be at least the key size ({} bits)",
            settings.key_size
        ));
    }
    if let Some(parent) = settings.key_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    KeyFile::generate(&settings.key_path, settings.key_size, file_size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn flags_override_env_and_config() {
        let config = Config {
            store_path: Some("/config/store".into()),
            key_path: Some("/config/key".into()),
            key_size: Some(128),
            algorithm: Some(Algorithm::Blowfish),
        };
        let args = StoreArgs {
            store: Some("/flag/store".into()),
            key: None,
            key_size: Some(192),
            algorithm: None,
        };
        let env = |name: &str| (name == KEY_ENV).then(|| PathBuf::from("/env/key"));

        let settings = resolve_with(&config, &args, env).expect("resolve");
        assert_eq!(settings.store_path, PathBuf::from("/flag/store"));
        assert_eq!(settings.key_path, PathBuf::from("/env/key"));
        assert_eq!(settings.key_size, 192);
        assert_eq!(settings.algorithm, Algorithm::Blowfish);
    }

    #[test]
    fn config_is_used_when_no_overrides() {
        let config = Config {
            store_path: Some("/config/store".into()),
            key_path: Some("/config/key".into()),
            key_size: None,
            algorithm: None,
        };
        let settings = resolve_with(&config, &StoreArgs::default(), no_env).expect("resolve");
        assert_eq!(settings.store_path, PathBuf::from("/config/store"));
        assert_eq!(settings.key_path, PathBuf::from("/config/key"));
        assert_eq!(settings.key_size, 256);
        assert_eq!(settings.algorithm, Algorithm::Aes);
        assert_eq!(settings.to_config().key_size, Some(256));
    }

    #[test]
    fn init_key_refuses_to_overwrite_and_validates_sizes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StoreSettings {
            store_path: dir.path().join("store.mem"),
            key_path: dir.path().join("keys").join("key"),
            key_size: 256,
            algorithm: Algorithm::Aes,
        };
        init_key(&settings, 1024).expect("first init");
        assert_eq!(std::fs::read(&settings.key_path).expect("read").len(), 128);
        assert!(init_key(&settings, 1024).is_err());

        let small = StoreSettings {
            key_path: dir.path().join("small"),
            ..settings.clone()
        };
        assert!(init_key(&small, 128).is_err());
        assert!(!small.key_path.exists());

        let odd = StoreSettings {
            key_path: dir.path().join("odd"),
            key_size: 100,
            ..settings
        };
        assert!(init_key(&odd, 1024).is_err());
    }
}
