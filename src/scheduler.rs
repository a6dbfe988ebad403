//! Tenant-scoped entry point for every booking operation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::calendar;
use crate::catalog::{
    CatalogProvider, CustomerProvider, NewCustomer, ServiceRecord, StaffRecord, resolve_services,
};
use crate::engine::{BookingError, DaySlots, Engine};
use crate::lifecycle::{self, Totals};
use crate::limits::*;
use crate::model::*;
use crate::tenant::{TenantId, TenantManager};

pub const DEFAULT_SLOT_DURATION_MINUTES: u32 = 60;

pub struct Scheduler {
    tenants: Arc<TenantManager>,
    catalog: Arc<dyn CatalogProvider>,
    customers: Arc<dyn CustomerProvider>,
}

/// Log failures that are not plain input mistakes, then hand them back.
fn logged<T>(
    result: Result<T, BookingError>,
    tenant: &TenantId,
    op: &'static str,
    booking: Option<Ulid>,
) -> Result<T, BookingError> {
    if let Err(e) = &result
        && !e.is_validation()
    {
        match booking {
            Some(id) => tracing::warn!(tenant = %tenant, booking = %id, op, code = e.code(), "{e}"),
            None => tracing::warn!(tenant = %tenant, op, code = e.code(), "{e}"),
        }
    }
    result
}

fn check_page(page: PageRequest) -> Result<PageRequest, BookingError> {
    if page.page == 0 {
        return Err(BookingError::Validation("page must be at least 1".into()));
    }
    if page.limit == 0 || page.limit > MAX_PAGE_LIMIT {
        return Err(BookingError::Validation(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }
    Ok(page)
}

impl Scheduler {
    pub fn new(
        tenants: Arc<TenantManager>,
        catalog: Arc<dyn CatalogProvider>,
        customers: Arc<dyn CustomerProvider>,
    ) -> Self {
        Self {
            tenants,
            catalog,
            customers,
        }
    }

    pub fn tenants(&self) -> &Arc<TenantManager> {
        &self.tenants
    }

    /// Engine of `tenant`, opened on first write.
    fn engine(&self, tenant: &TenantId) -> Result<Arc<Engine>, BookingError> {
        self.tenants.get_or_create(tenant)
    }

    /// Engine of `tenant` if it has ever been written to. Reads never create one.
    fn existing_engine(&self, tenant: &TenantId) -> Result<Option<Arc<Engine>>, BookingError> {
        self.tenants.get(tenant)
    }

    /// Booking `id` lives in an engine that exists already.
    fn engine_for_booking(&self, tenant: &TenantId, id: Ulid) -> Result<Arc<Engine>, BookingError> {
        self.existing_engine(tenant)?
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    /// Staff member `staff_id` of `tenant`, active.
    async fn active_staff(&self, tenant: &TenantId, staff_id: Ulid) -> Result<StaffRecord, BookingError> {
        match self.catalog.staff(tenant, staff_id).await? {
            Some(staff) if staff.active => Ok(staff),
            _ => Err(BookingError::InvalidStaff(staff_id)),
        }
    }

    /// Views of `rows` with customer and staff summaries attached. Each
    /// person is looked up once per call.
    async fn describe(
        &self,
        tenant: &TenantId,
        rows: Vec<Booking>,
    ) -> Result<Vec<BookingView>, BookingError> {
        let mut customers: HashMap<Ulid, Option<CustomerSummary>> = HashMap::new();
        let mut staff: HashMap<Ulid, Option<StaffSummary>> = HashMap::new();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            if !customers.contains_key(&row.customer_id) {
                let found = self.customers.get(tenant, row.customer_id).await?;
                customers.insert(row.customer_id, found.as_ref().map(CustomerSummary::from));
            }
            if !staff.contains_key(&row.staff_id) {
                let found = self.catalog.staff(tenant, row.staff_id).await?;
                staff.insert(row.staff_id, found.as_ref().map(StaffSummary::from));
            }
            let mut view = BookingView::from(row);
            view.customer = customers.get(&row.customer_id).cloned().flatten();
            view.staff = staff.get(&row.staff_id).cloned().flatten();
            out.push(view);
        }
        Ok(out)
    }

    async fn describe_one(&self, tenant: &TenantId, row: Booking) -> Result<BookingView, BookingError> {
        let id = row.id;
        self.describe(tenant, vec![row])
            .await?
            .pop()
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    async fn describe_page(
        &self,
        tenant: &TenantId,
        page: Page<Booking>,
    ) -> Result<Page<BookingView>, BookingError> {
        Ok(Page {
            data: self.describe(tenant, page.data).await?,
            meta: page.meta,
        })
    }

    // ── Create ───────────────────────────────────────────────

    pub async fn create_booking(
        &self,
        tenant: &TenantId,
        actor: Option<Ulid>,
        req: CreateBookingRequest,
    ) -> Result<BookingView, BookingError> {
        let result = self.create_inner(tenant, actor, req).await;
        logged(result, tenant, "create_booking", None)
    }

    async fn create_inner(
        &self,
        tenant: &TenantId,
        actor: Option<Ulid>,
        req: CreateBookingRequest,
    ) -> Result<BookingView, BookingError> {
        lifecycle::check_notes(req.notes.as_deref())?;
        match self.customers.get(tenant, req.customer_id).await? {
            Some(c) if !c.deleted => {}
            _ => return Err(BookingError::not_found("customer", req.customer_id)),
        }
        self.active_staff(tenant, req.staff_id).await?;
        let services = resolve_services(self.catalog.as_ref(), tenant, &req.service_ids).await?;
        let totals = Totals::price(&services, req.discount)?;

        let start = calendar::to_ms(req.start_time);
        let new = NewBooking {
            customer_id: req.customer_id,
            staff_id: req.staff_id,
            span: Span::from_minutes(start, totals.total_duration_minutes),
            total_duration_minutes: totals.total_duration_minutes,
            subtotal: totals.subtotal,
            discount: totals.discount,
            total_amount: totals.total_amount,
            notes: req.notes,
            created_by: actor,
            services: services.iter().map(BookingServiceLine::from).collect(),
        };
        let booking = self.engine(tenant)?.insert_booking(new).await?;
        self.describe_one(tenant, booking).await
    }

    /// Booking placed by the customer themself: they are looked up by phone
    /// and created on first visit, and the booking has no acting user.
    pub async fn create_public_booking(
        &self,
        tenant: &TenantId,
        req: PublicBookingRequest,
    ) -> Result<BookingView, BookingError> {
        let result = self.create_public_inner(tenant, req).await;
        logged(result, tenant, "create_public_booking", None)
    }

    async fn create_public_inner(
        &self,
        tenant: &TenantId,
        req: PublicBookingRequest,
    ) -> Result<BookingView, BookingError> {
        let phone = req.customer_phone.trim();
        if phone.is_empty() {
            return Err(BookingError::Validation("customer phone is required".into()));
        }
        let customer = match self.customers.find_by_phone(tenant, phone).await? {
            Some(existing) => existing,
            None => {
                let created = self
                    .customers
                    .create(
                        tenant,
                        NewCustomer {
                            first_name: req.customer_first_name,
                            last_name: req.customer_last_name,
                            phone: phone.to_string(),
                            email: req.customer_email,
                            notes: None,
                        },
                    )
                    .await;
                match created {
                    Ok(customer) => customer,
                    // Lost a race with another booking for the same phone.
                    Err(e) => match self.customers.find_by_phone(tenant, phone).await? {
                        Some(existing) => existing,
                        None => return Err(e),
                    },
                }
            }
        };

        self.create_inner(
            tenant,
            None,
            CreateBookingRequest {
                customer_id: customer.id,
                staff_id: req.staff_id,
                start_time: req.start_time,
                service_ids: req.service_ids,
                notes: req.notes,
                discount: None,
            },
        )
        .await
    }


    // ── Read ─────────────────────────────────────────────────

    pub async fn get_booking(&self, tenant: &TenantId, id: Ulid) -> Result<BookingView, BookingError> {
        let result = async {
            let booking = self.engine_for_booking(tenant, id)?.get_booking(id)?;
            self.describe_one(tenant, booking).await
        }
        .await;
        logged(result, tenant, "get_booking", Some(id))
    }

    pub async fn list_bookings(
        &self,
        tenant: &TenantId,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<Page<BookingView>, BookingError> {
        let result = async {
            let page = check_page(page)?;
            let rows = match self.existing_engine(tenant)? {
                Some(engine) => engine.list_bookings(&filter, page),
                None => Page::slice(Vec::new(), page),
            };
            self.describe_page(tenant, rows).await
        }
        .await;
        logged(result, tenant, "list_bookings", None)
    }

    pub async fn bookings_by_staff(
        &self,
        tenant: &TenantId,
        staff_id: Ulid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BookingView>, BookingError> {
        let result = async {
            if to < from {
                return Err(BookingError::Validation("range ends before it starts".into()));
            }
            let rows = match self.existing_engine(tenant)? {
                Some(engine) => {
                    engine.bookings_by_staff(staff_id, calendar::to_ms(from), calendar::to_ms(to))
                }
                None => Vec::new(),
            };
            self.describe(tenant, rows).await
        }
        .await;
        logged(result, tenant, "bookings_by_staff", None)
    }

    pub async fn bookings_by_customer(
        &self,
        tenant: &TenantId,
        customer_id: Ulid,
        page: PageRequest,
    ) -> Result<Page<BookingView>, BookingError> {
        let result = async {
            let page = check_page(page)?;
            let rows = match self.existing_engine(tenant)? {
                Some(engine) => engine.bookings_by_customer(customer_id, page),
                None => Page::slice(Vec::new(), page),
            };
            self.describe_page(tenant, rows).await
        }
        .await;
        logged(result, tenant, "bookings_by_customer", None)
    }

    pub async fn list_services(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<ServiceRecord>, BookingError> {
        let result = self.catalog.list_services(tenant, category).await;
        logged(result, tenant, "list_services", None)
    }

    pub async fn list_staff(&self, tenant: &TenantId) -> Result<Vec<StaffRecord>, BookingError> {
        let result = self.catalog.list_staff(tenant).await;
        logged(result, tenant, "list_staff", None)
    }

    // ── Update / cancel ──────────────────────────────────────

    pub async fn update_booking(
        &self,
        tenant: &TenantId,
        id: Ulid,
        req: UpdateBookingRequest,
    ) -> Result<BookingView, BookingError> {
        let result = async {
            if let Some(staff_id) = req.staff_id {
                self.active_staff(tenant, staff_id).await?;
            }
            let booking = self
                .engine_for_booking(tenant, id)?
                .update_booking(id, &req)
                .await?;
            self.describe_one(tenant, booking).await
        }
        .await;
        logged(result, tenant, "update_booking", Some(id))
    }

    pub async fn cancel_booking(
        &self,
        tenant: &TenantId,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<CancelAck, BookingError> {
        let result = async {
            let booking = self
                .engine_for_booking(tenant, id)?
                .cancel_booking(id, reason)
                .await?;
            Ok::<_, BookingError>(CancelAck {
                success: true,
                message: format!("Booking {} cancelled", booking.booking_number),
                booking_number: booking.booking_number,
            })
        }
        .await;
        logged(result, tenant, "cancel_booking", Some(id))
    }

    // ── Availability ─────────────────────────────────────────

    /// Advisory slot grid; nothing is reserved.
    pub async fn check_availability(
        &self,
        tenant: &TenantId,
        staff_id: Ulid,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    ) -> Result<DaySlots, BookingError> {
        let result = async {
            let duration = duration_minutes.unwrap_or(DEFAULT_SLOT_DURATION_MINUTES);
            if duration == 0 || duration > MAX_BOOKING_DURATION_MINUTES {
                return Err(BookingError::Validation(format!(
                    "duration must be between 1 and {MAX_BOOKING_DURATION_MINUTES} minutes"
                )));
            }
            self.active_staff(tenant, staff_id).await?;
            Ok::<_, BookingError>(match self.existing_engine(tenant)? {
                Some(engine) => engine.day_slots(staff_id, date, duration).await,
                None => DaySlots::new(
                    staff_id,
                    date,
                    duration,
                    self.tenants.working_hours(),
                    Vec::new(),
                ),
            })
        }
        .await;
        logged(result, tenant, "check_availability", None)
    }

    pub async fn has_conflict(
        &self,
        tenant: &TenantId,
        staff_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Ulid>,
    ) -> Result<bool, BookingError> {
        let result = async {
            if end <= start {
                return Err(BookingError::Validation("end must be after start".into()));
            }
            let span = Span::new(calendar::to_ms(start), calendar::to_ms(end));
            Ok::<_, BookingError>(match self.existing_engine(tenant)? {
                Some(engine) => engine.has_conflict(staff_id, span, exclude).await,
                None => false,
            })
        }
        .await;
        logged(result, tenant, "has_conflict", None)
    }
}
