use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::calendar::WorkingHours;
use crate::compactor;
use crate::engine::{BookingError, Engine};
use crate::limits::*;
use crate::notify::NotifyHub;

/// A validated salon identifier. Every data access takes one; there is no
/// ambient "current tenant".
///
/// Only `[A-Za-z0-9_-]` is accepted, and ids are folded to lowercase, so
/// `Glam` and `glam` are the same salon even on case-insensitive filesystems.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, BookingError> {
        if raw.is_empty() {
            return Err(BookingError::Validation("empty tenant id".into()));
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(BookingError::LimitExceeded("tenant id too long"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BookingError::Validation(format!(
                "invalid tenant id: {raw:?}"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + compactor.
pub struct TenantManager {
    engines: DashMap<TenantId, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    hours: WorkingHours,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, hours: WorkingHours) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            hours,
        }
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.hours
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }

    fn wal_path(&self, tenant: &TenantId) -> PathBuf {
        self.data_dir.join(format!("{tenant}.wal"))
    }

    /// Engine of a tenant that already has a WAL on disk. Unknown tenants
    /// yield `None` and leave nothing behind.
    pub fn get(&self, tenant: &TenantId) -> Result<Option<Arc<Engine>>, BookingError> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(Some(engine.value().clone()));
        }
        if !self.wal_path(tenant).exists() {
            return Ok(None);
        }
        self.get_or_create(tenant).map(Some)
    }

    /// Get or lazily open the engine for `tenant`. Opening replays its WAL.
    pub fn get_or_create(&self, tenant: &TenantId) -> Result<Arc<Engine>, BookingError> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(BookingError::LimitExceeded("too many tenants"));
        }

        // The entry guard is held while the WAL is replayed, so two callers
        // racing on a new tenant never open the same file twice.
        let engine = match self.engines.entry(tenant.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.wal_path(tenant);
                let notify = Arc::new(NotifyHub::new());
                let engine = Engine::new(tenant.clone(), wal_path, notify, self.hours)
                    .map_err(|e| BookingError::Storage(format!("open tenant {tenant}: {e}")))?;
                let engine = Arc::new(engine);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        tracing::info!(tenant = %tenant, "tenant engine opened");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
