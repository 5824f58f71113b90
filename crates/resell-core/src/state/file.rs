// # File Store
//
// File-based implementation of ResellStore with crash recovery.
//
// ## Purpose
//
// Provides persistent storage across daemon restarts and crashes for
// single-node deployments. Every mutation is written through before the
// call returns, so a reconciliation record that was reported as saved is
// on disk.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "domains": { "example.com": { ... } },
//   "customers": { ... },
//   "pricing": { "com": { ... } },
//   "reconciliations": [ ... ],
//   "transactions": [ ... ],
//   "transfers": { ... },
//   "carts": { ... },
//   "push_requests": { ... }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use super::{Tables, tld_key};
use crate::Error;
use crate::model::{
    BalanceTransaction, Cart, Customer, Domain, DomainKey, PushRequest, ReconciliationRecord,
    TldPricing, TransferRecord,
};
use crate::traits::store::{ResellStore, ResellStoreFactory};

/// Store file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-based store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use resell_core::state::FileStore;
/// use resell_core::traits::ResellStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/resell/store.json").await?;
///     let domains = store.list_domains().await?;
///     println!("{} domains", domains.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
    /// Serializes writers so two saves never race on the temp file
    write_lock: Mutex<()>,
}

/// Internal state for file-based store
#[derive(Debug)]
struct FileState {
    tables: Tables,
    dirty: bool,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    #[serde(flatten)]
    tables: Tables,
}

impl FileStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Try to load existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty tables
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tables = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                tables,
                dirty: false,
            })),
            write_lock: Mutex::new(()),
        })
    }

    /// Load tables from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If JSON parse error, try loading backup
    /// 3. If backup also fails, start with empty tables
    async fn load_with_recovery(path: &Path) -> Result<Tables, Error> {
        match Self::load(path).await {
            Ok(tables) => {
                tracing::debug!(
                    domains = tables.domains.len(),
                    reconciliations = tables.reconciliations.len(),
                    "Loaded store from file"
                );
                Ok(tables)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(Tables::default());
                }

                match Self::load(&backup_path).await {
                    Ok(tables) => {
                        tracing::info!(
                            domains = tables.domains.len(),
                            "Recovered store from backup"
                        );
                        if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(tables)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(Tables::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load tables from file
    async fn load(path: &Path) -> Result<Tables, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(Tables::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read store file {}: {}", path.display(), e))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.tables)
    }

    /// Apply a mutation and write it through
    async fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, Error> {
        let out = {
            let mut guard = self.state.write().await;
            let out = f(&mut guard.tables);
            guard.dirty = true;
            out
        };

        self.write_state().await?;
        Ok(out)
    }

    /// Write tables to file atomically
    async fn write_state(&self) -> Result<(), Error> {
        let _writer = self.write_lock.lock().await;

        let json = {
            let guard = self.state.read().await;
            let file = StoreFileFormat {
                version: STORE_FILE_VERSION.to_string(),
                tables: guard.tables.clone(),
            };
            serde_json::to_string_pretty(&file)
                .map_err(|e| Error::store(format!("Failed to serialize store: {}", e)))?
        };

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        self.state.write().await.dirty = false;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Restore store file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored store file from backup");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ResellStore for FileStore {
    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>, Error> {
        let guard = self.state.read().await;
        Ok(guard.tables.domains.get(&key.to_string()).cloned())
    }

    async fn save_domain(&self, domain: &Domain) -> Result<(), Error> {
        self.mutate(|t| {
            t.domains.insert(domain.key.to_string(), domain.clone());
        })
        .await
    }

    async fn list_domains(&self) -> Result<Vec<Domain>, Error> {
        let guard = self.state.read().await;
        Ok(guard.tables.domains.values().cloned().collect())
    }

    async fn get_customer(&self, id: &str) -> Result<Option<Customer>, Error> {
        let guard = self.state.read().await;
        Ok(guard.tables.customers.get(id).cloned())
    }

    async fn save_customer(&self, customer: &Customer) -> Result<(), Error> {
        self.mutate(|t| {
            t.customers.insert(customer.id.clone(), customer.clone());
        })
        .await
    }

    async fn get_pricing(&self, tld: &str) -> Result<Option<TldPricing>, Error> {
        let guard = self.state.read().await;
        Ok(guard.tables.pricing.get(&tld_key(tld)).cloned())
    }

    async fn save_pricing(&self, pricing: &TldPricing) -> Result<(), Error> {
        self.mutate(|t| {
            t.pricing.insert(tld_key(&pricing.tld), pricing.clone());
        })
        .await
    }

    async fn insert_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), Error> {
        self.mutate(|t| t.upsert_reconciliation(record)).await
    }

    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, Error> {
        Ok(self.state.read().await.tables.reconciliations.clone())
    }

    async fn insert_transaction(&self, transaction: &BalanceTransaction) -> Result<(), Error> {
        self.mutate(|t| t.upsert_transaction(transaction)).await
    }

    async fn list_transactions(&self) -> Result<Vec<BalanceTransaction>, Error> {
        Ok(self.state.read().await.tables.transactions.clone())
    }

    async fn save_transfer(&self, transfer: &TransferRecord) -> Result<(), Error> {
        self.mutate(|t| {
            t.transfers
                .insert(transfer.domain.to_string(), transfer.clone());
        })
        .await
    }

    async fn list_transfers(&self) -> Result<Vec<TransferRecord>, Error> {
        Ok(self.state.read().await.tables.transfers.values().cloned().collect())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<(), Error> {
        self.mutate(|t| {
            t.carts.insert(cart.id.clone(), cart.clone());
        })
        .await
    }

    async fn purge_carts(&self, older_than: DateTime<Utc>) -> Result<usize, Error> {
        self.mutate(|t| t.purge_carts(older_than)).await
    }

    async fn save_push_request(&self, request: &PushRequest) -> Result<(), Error> {
        self.mutate(|t| {
            t.push_requests.insert(request.id.clone(), request.clone());
        })
        .await
    }

    async fn list_push_requests(&self) -> Result<Vec<PushRequest>, Error> {
        Ok(self
            .state
            .read()
            .await
            .tables
            .push_requests
            .values()
            .cloned()
            .collect())
    }

    async fn expire_push_requests(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        self.mutate(|t| t.expire_push_requests(now)).await
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty {
            self.write_state().await
        } else {
            Ok(())
        }
    }
}

/// Factory for [`FileStore`]
///
/// Expects the serialized `StoreConfig::File { path }`.
pub struct FileStoreFactory;

#[async_trait]
impl ResellStoreFactory for FileStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn ResellStore>, Error> {
        let path = config
            .get("path")
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config("File store requires a non-empty 'path'"))?;

        Ok(Arc::new(FileStore::new(path).await?))
    }
}
