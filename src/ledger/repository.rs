use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::models::AirdropPlan;
use crate::error::{AppError, AppResult};

/// Durable storage for the airdrop ledger - THE source of truth for settlement progress
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn exists(&self) -> AppResult<bool>;

    async fn load(&self) -> AppResult<AirdropPlan>;

    /// Must be durable when it returns
    async fn save(&self, plan: &AirdropPlan) -> AppResult<()>;

    /// Safety copy of the current ledger, taken before execution starts
    async fn backup(&self) -> AppResult<PathBuf>;
}

/// Ledger kept in a single JSON file, replaced atomically on every save
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".bak")
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Persist the rename itself; a directory entry is only durable once its directory is synced
    #[cfg(unix)]
    async fn sync_parent(&self) -> AppResult<()> {
        tokio::fs::File::open(self.parent_dir()).await?.sync_all().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for JsonLedgerStore {
    async fn exists(&self) -> AppResult<bool> {
        Ok(tokio::fs::try_exists(&self.path).await?)
    }

    async fn load(&self) -> AppResult<AirdropPlan> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            AppError::InvalidInput(format!("cannot read ledger {}: {}", self.path.display(), e))
        })?;
        let plan: AirdropPlan = serde_json::from_slice(&raw)?;
        debug!("Loaded {} from {}", plan, self.path.display());
        Ok(plan)
    }

    async fn save(&self, plan: &AirdropPlan) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(plan)?;
        let tmp = self.sibling(".tmp");

        // write + fsync the temp file, then rename over the ledger
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        self.sync_parent().await?;

        debug!("💾 Saved {} to {}", plan, self.path.display());
        Ok(())
    }

    async fn backup(&self) -> AppResult<PathBuf> {
        let backup = self.backup_path();
        tokio::fs::copy(&self.path, &backup).await?;
        info!("Backed up ledger to {}", backup.display());
        Ok(backup)
    }
}
