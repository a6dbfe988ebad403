//! Catalog and customer collaborators.
//!
//! The scheduler only reads services and staff, and only finds or creates
//! customers. Both sides are traits so a database-backed catalog can replace
//! the in-memory one shipped here.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar;
use crate::engine::BookingError;
use crate::limits::MAX_SERVICES_PER_BOOKING;
use crate::model::Ms;
use crate::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub duration_minutes: u32,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffRecord {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub specialties: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Price and duration of one service, frozen at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub service_id: Ulid,
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: u32,
}

impl From<&ServiceRecord> for ServiceSnapshot {
    fn from(s: &ServiceRecord) -> Self {
        Self {
            service_id: s.id,
            name: s.name.clone(),
            price: s.price,
            duration_minutes: s.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub total_visits: u32,
    pub total_spent: Decimal,
    pub last_visit_at: Option<Ms>,
    pub deleted: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Active services of `tenant` among `ids`. Unknown or inactive ids are
    /// simply absent from the result.
    async fn active_services(
        &self,
        tenant: &TenantId,
        ids: &[Ulid],
    ) -> Result<Vec<ServiceRecord>, BookingError>;

    async fn staff(
        &self,
        tenant: &TenantId,
        staff_id: Ulid,
    ) -> Result<Option<StaffRecord>, BookingError>;

    async fn list_services(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<ServiceRecord>, BookingError>;

    async fn list_staff(&self, tenant: &TenantId) -> Result<Vec<StaffRecord>, BookingError>;
}

#[async_trait]
pub trait CustomerProvider: Send + Sync {
    async fn find_by_phone(
        &self,
        tenant: &TenantId,
        phone: &str,
    ) -> Result<Option<CustomerRecord>, BookingError>;

    async fn create(
        &self,
        tenant: &TenantId,
        data: NewCustomer,
    ) -> Result<CustomerRecord, BookingError>;

    async fn get(
        &self,
        tenant: &TenantId,
        customer_id: Ulid,
    ) -> Result<Option<CustomerRecord>, BookingError>;
}

/// Resolve requested service ids into snapshots, in request order.
///
/// All or nothing: an empty list, a duplicate, or any id that is not an
/// active service of `tenant` fails the whole resolution.
pub async fn resolve_services(
    catalog: &dyn CatalogProvider,
    tenant: &TenantId,
    ids: &[Ulid],
) -> Result<Vec<ServiceSnapshot>, BookingError> {
    if ids.is_empty() {
        return Err(BookingError::Validation(
            "at least one service is required".into(),
        ));
    }
    if ids.len() > MAX_SERVICES_PER_BOOKING {
        return Err(BookingError::LimitExceeded("too many services in booking"));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    let duplicates: Vec<Ulid> = ids.iter().copied().filter(|id| !seen.insert(*id)).collect();
    if !duplicates.is_empty() {
        return Err(BookingError::InvalidServices(duplicates));
    }

    let found = catalog.active_services(tenant, ids).await?;
    let mut snapshots = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    for id in ids {
        match found.iter().find(|s| s.id == *id && s.active) {
            Some(record) => snapshots.push(ServiceSnapshot::from(record)),
            None => missing.push(*id),
        }
    }
    if !missing.is_empty() {
        return Err(BookingError::InvalidServices(missing));
    }
    Ok(snapshots)
}

// ── In-memory implementations ───────────────────────────────────

#[derive(Default)]
pub struct InMemoryCatalog {
    services: DashMap<(TenantId, Ulid), ServiceRecord>,
    staff: DashMap<(TenantId, Ulid), StaffRecord>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_service(&self, tenant: &TenantId, service: ServiceRecord) {
        self.services.insert((tenant.clone(), service.id), service);
    }

    pub fn upsert_staff(&self, tenant: &TenantId, staff: StaffRecord) {
        self.staff.insert((tenant.clone(), staff.id), staff);
    }

    /// Soft-deactivate; existing bookings keep their snapshots.
    pub fn deactivate_service(&self, tenant: &TenantId, id: Ulid) -> bool {
        match self.services.get_mut(&(tenant.clone(), id)) {
            Some(mut s) => {
                s.active = false;
                true
            }
            None => false,
        }
    }

    pub fn deactivate_staff(&self, tenant: &TenantId, id: Ulid) -> bool {
        match self.staff.get_mut(&(tenant.clone(), id)) {
            Some(mut s) => {
                s.active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn active_services(
        &self,
        tenant: &TenantId,
        ids: &[Ulid],
    ) -> Result<Vec<ServiceRecord>, BookingError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.services.get(&(tenant.clone(), *id)))
            .filter(|s| s.active)
            .map(|s| s.value().clone())
            .collect())
    }

    async fn staff(
        &self,
        tenant: &TenantId,
        staff_id: Ulid,
    ) -> Result<Option<StaffRecord>, BookingError> {
        Ok(self
            .staff
            .get(&(tenant.clone(), staff_id))
            .map(|s| s.value().clone()))
    }

    async fn list_services(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<ServiceRecord>, BookingError> {
        let mut out: Vec<ServiceRecord> = self
            .services
            .iter()
            .filter(|e| &e.key().0 == tenant && e.active)
            .filter(|e| category.is_none_or(|c| e.category == c))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(a.display_order.cmp(&b.display_order))
                .then(a.name.cmp(&b.name))
        });
        Ok(out)
    }

    async fn list_staff(&self, tenant: &TenantId) -> Result<Vec<StaffRecord>, BookingError> {
        let mut out: Vec<StaffRecord> = self
            .staff
            .iter()
            .filter(|e| &e.key().0 == tenant && e.active)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.first_name.cmp(&b.first_name).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[derive(Default)]
pub struct InMemoryCustomers {
    customers: DashMap<(TenantId, Ulid), CustomerRecord>,
    by_phone: DashMap<(TenantId, String), Ulid>,
}

impl InMemoryCustomers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft delete: the row stays so booking history keeps its foreign key,
    /// but personal fields are redacted and the phone is released.
    ///
    /// `create` takes the phone index before the customer map, so the
    /// customer guard is released before the phone index is touched here.
    pub fn delete(&self, tenant: &TenantId, customer_id: Ulid) -> Result<(), BookingError> {
        let old_phone = {
            let mut entry = self
                .customers
                .get_mut(&(tenant.clone(), customer_id))
                .filter(|c| !c.deleted)
                .ok_or_else(|| BookingError::not_found("customer", customer_id))?;
            let id_prefix: String = customer_id.to_string().chars().take(8).collect();
            entry.first_name = "Deleted".into();
            entry.last_name = "Customer".into();
            entry.email = None;
            entry.notes = None;
            entry.deleted = true;
            std::mem::replace(&mut entry.phone, format!("deleted-{id_prefix}"))
        };
        self.by_phone
            .remove_if(&(tenant.clone(), old_phone), |_, id| *id == customer_id);
        tracing::info!(tenant = %tenant, customer = %customer_id, "customer redacted");
        Ok(())
    }
}

#[async_trait]
impl CustomerProvider for InMemoryCustomers {
    async fn find_by_phone(
        &self,
        tenant: &TenantId,
        phone: &str,
    ) -> Result<Option<CustomerRecord>, BookingError> {
        let Some(id) = self
            .by_phone
            .get(&(tenant.clone(), phone.to_string()))
            .map(|e| *e.value())
        else {
            return Ok(None);
        };
        Ok(self
            .customers
            .get(&(tenant.clone(), id))
            .filter(|c| !c.deleted)
            .map(|c| c.value().clone()))
    }

    async fn create(
        &self,
        tenant: &TenantId,
        data: NewCustomer,
    ) -> Result<CustomerRecord, BookingError> {
        let phone = data.phone.trim().to_string();
        if phone.is_empty() {
            return Err(BookingError::Validation("customer phone is required".into()));
        }
        match self.by_phone.entry((tenant.clone(), phone.clone())) {
            Entry::Occupied(_) => Err(BookingError::Validation(
                "customer with this phone number already exists".into(),
            )),
            Entry::Vacant(slot) => {
                let record = CustomerRecord {
                    id: Ulid::new(),
                    first_name: data.first_name,
                    last_name: data.last_name,
                    phone,
                    email: data.email,
                    notes: data.notes,
                    total_visits: 0,
                    total_spent: Decimal::ZERO,
                    last_visit_at: None,
                    deleted: false,
                    created_at: calendar::to_ms(chrono::Utc::now()),
                };
                self.customers
                    .insert((tenant.clone(), record.id), record.clone());
                slot.insert(record.id);
                tracing::info!(tenant = %tenant, customer = %record.id, "customer created");
                Ok(record)
            }
        }
    }

    async fn get(
        &self,
        tenant: &TenantId,
        customer_id: Ulid,
    ) -> Result<Option<CustomerRecord>, BookingError> {
        Ok(self
            .customers
            .get(&(tenant.clone(), customer_id))
            .map(|c| c.value().clone()))
    }
}

// ── Seed file ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSeed {
    pub tenants: Vec<TenantSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantSeed {
    pub tenant: TenantId,
    #[serde(default)]
    pub staff: Vec<StaffRecord>,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub customers: Vec<NewCustomer>,
}

impl CatalogSeed {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Load every tenant's staff, services and customers.
    pub async fn apply(
        self,
        catalog: &InMemoryCatalog,
        customers: &InMemoryCustomers,
    ) -> Result<(), BookingError> {
        for seed in self.tenants {
            for staff in seed.staff {
                catalog.upsert_staff(&seed.tenant, staff);
            }
            for service in seed.services {
                if service.duration_minutes == 0 {
                    return Err(BookingError::Validation(format!(
                        "service {} has zero duration",
                        service.id
                    )));
                }
                if service.price.is_sign_negative() {
                    return Err(BookingError::Validation(format!(
                        "service {} has a negative price",
                        service.id
                    )));
                }
                catalog.upsert_service(&seed.tenant, service);
            }
            for customer in seed.customers {
                customers.create(&seed.tenant, customer).await?;
            }
        }
        Ok(())
    }
}
