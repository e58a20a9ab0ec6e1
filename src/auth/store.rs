//! Persistence of one token record per vendor

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{TokenRecord, Vendor};
use crate::error::StoreError;

/// Key-value store shared by every caller of a [`super::TokenManager`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Overwrite the vendor's record and return what was stored.
    async fn save(&self, vendor: Vendor, record: TokenRecord) -> Result<TokenRecord, StoreError>;

    /// Last saved record, or the zero record if there is none or it
    /// cannot be read.
    async fn load(&self, vendor: Vendor) -> TokenRecord;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Vendor, TokenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn save(&self, vendor: Vendor, record: TokenRecord) -> Result<TokenRecord, StoreError> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.insert(vendor, record.clone());
        Ok(record)
    }

    async fn load(&self, vendor: Vendor) -> TokenRecord {
        let records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.get(&vendor).cloned().unwrap_or_default()
    }
}

/// On-disk layout: one table per vendor key.
type TokenFile = BTreeMap<String, TokenRecord>;

/// TOML file store. Contains live credentials, so it is written 0600.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<TokenFile, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TokenFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, file: &TokenFile) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let content = toml::to_string_pretty(file)?;
        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await?;
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileStore {
    async fn save(&self, vendor: Vendor, record: TokenRecord) -> Result<TokenRecord, StoreError> {
        let _guard = self.write_lock.lock().await;

        // An unreadable file is replaced rather than blocking every future write.
        let mut file = match self.read_file().await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Replacing unreadable token store {}: {}", self.path.display(), e);
                TokenFile::default()
            }
        };
        file.insert(vendor.as_str().to_string(), record.clone());
        self.write_file(&file).await?;

        tracing::debug!("Stored {} token in {}", vendor, self.path.display());
        Ok(record)
    }

    async fn load(&self, vendor: Vendor) -> TokenRecord {
        match self.read_file().await {
            Ok(mut file) => file.remove(vendor.as_str()).unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to read token store {}: {}", self.path.display(), e);
                TokenRecord::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStatus;

    fn sample() -> TokenRecord {
        TokenRecord {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            issued_at: 1_700_000_000,
            access_token_ttl: 300,
            refresh_token_ttl: Some(7200),
            status: TokenStatus::Storing,
        }
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("gse-tokens-{}", uuid::Uuid::new_v4()))
            .join("tokens.toml")
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryStore::new();
        let saved = store.save(Vendor::FannieMae, sample()).await.unwrap();
        assert_eq!(saved, sample());
        assert_eq!(store.load(Vendor::FannieMae).await, sample());
    }

    #[tokio::test]
    async fn test_memory_missing_is_zero_record() {
        let store = MemoryStore::new();
        store.save(Vendor::FannieMae, sample()).await.unwrap();
        assert_eq!(store.load(Vendor::FreddieMac).await, TokenRecord::default());
    }

    #[tokio::test]
    async fn test_memory_save_overwrites() {
        let store = MemoryStore::new();
        store.save(Vendor::FreddieMac, sample()).await.unwrap();
        let replacement = TokenRecord {
            access_token: "second".into(),
            refresh_token_ttl: None,
            ..sample()
        };
        store
            .save(Vendor::FreddieMac, replacement.clone())
            .await
            .unwrap();
        assert_eq!(store.load(Vendor::FreddieMac).await, replacement);
    }

    #[tokio::test]
    async fn test_file_round_trip_keeps_vendors_apart() {
        let path = temp_path();
        let store = FileStore::new(&path);

        let freddie = TokenRecord {
            access_token: "freddie".into(),
            refresh_token_ttl: None,
            status: TokenStatus::Updating,
            ..sample()
        };
        store.save(Vendor::FannieMae, sample()).await.unwrap();
        store.save(Vendor::FreddieMac, freddie.clone()).await.unwrap();

        // A second handle sees the same file contents.
        let reopened = FileStore::new(&path);
        assert_eq!(reopened.load(Vendor::FannieMae).await, sample());
        assert_eq!(reopened.load(Vendor::FreddieMac).await, freddie);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_missing_is_zero_record() {
        let store = FileStore::new(temp_path());
        assert_eq!(store.load(Vendor::FannieMae).await, TokenRecord::default());
    }

    #[tokio::test]
    async fn test_file_corrupt_is_zero_record_and_recoverable() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "this is = = not toml").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.load(Vendor::FannieMae).await, TokenRecord::default());

        store.save(Vendor::FannieMae, sample()).await.unwrap();
        assert_eq!(store.load(Vendor::FannieMae).await, sample());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_decode_error_hides_file_contents() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[fannie_mae]\naccess_token = \"SECRET-ACCESS\"\nissued_at = \"SECRET-REFRESH\"\n",
        )
        .unwrap();

        let err = FileStore::new(&path).read_file().await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(!err.to_string().contains("SECRET"), "{}", err);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path();
        let store = FileStore::new(&path);
        store.save(Vendor::FannieMae, sample()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_save_error_surfaces() {
        // A directory where the file should be makes the rename fail.
        let path = temp_path();
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();

        let store = FileStore::new(&path);
        let result = tokio_test::block_on(store.save(Vendor::FannieMae, sample()));
        assert!(result.is_err());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
