use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::from_ms;
use crate::catalog::{CustomerRecord, ServiceSnapshot, StaffRecord};
use crate::tenant::TenantId;

/// Unix milliseconds. Every instant inside the engine uses this.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span of `minutes` starting at `start`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + minutes as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// A booking ending exactly when another starts does not overlap it.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Staff schedule ──────────────────────────────────────────────

/// The slice of a booking the conflict detector needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub booking_id: Ulid,
    pub booking_number: String,
    pub span: Span,
}

/// Non-cancelled bookings of one staff member, sorted by `span.start`.
/// One per (tenant, staff) pair; its write lock serializes check-then-write.
#[derive(Debug, Clone)]
pub struct StaffSchedule {
    pub staff_id: Ulid,
    pub reservations: Vec<Reservation>,
}

impl StaffSchedule {
    pub fn new(staff_id: Ulid) -> Self {
        Self {
            staff_id,
            reservations: Vec::new(),
        }
    }

    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, booking_id: Ulid) -> Option<Reservation> {
        let pos = self
            .reservations
            .iter()
            .position(|r| r.booking_id == booking_id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose span overlaps `query`. Everything starting at or
    /// after `query.end` is skipped with a binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

// ── Bookings ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    /// No time, staff, service, or status mutation is allowed once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Whether a booking in this status still occupies its staff member's time.
    pub fn blocks_schedule(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog data frozen into a booking at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingServiceLine {
    pub service_id: Ulid,
    pub service_name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub duration_minutes: u32,
}

impl From<&ServiceSnapshot> for BookingServiceLine {
    fn from(s: &ServiceSnapshot) -> Self {
        Self {
            service_id: s.service_id,
            service_name: s.name.clone(),
            price: s.price,
            duration_minutes: s.duration_minutes,
        }
    }
}

/// A persisted booking row together with its service lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub tenant_id: TenantId,
    pub booking_number: String,
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub span: Span,
    pub total_duration_minutes: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub discount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub cancel_reason: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub services: Vec<BookingServiceLine>,
}

impl Booking {
    pub fn reservation(&self) -> Reservation {
        Reservation {
            booking_id: self.id,
            booking_number: self.booking_number.clone(),
            span: self.span,
        }
    }
}

/// Everything the store needs to insert a booking; id, number and
/// timestamps are assigned under the staff lock.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub span: Span,
    pub total_duration_minutes: u32,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub created_by: Option<Ulid>,
    pub services: Vec<BookingServiceLine>,
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    /// Full row after a reschedule, status, discount or notes change.
    BookingUpdated {
        booking: Booking,
        previous_staff_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        staff_id: Ulid,
        reason: Option<String>,
        at: Ms,
    },
}

impl Event {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking } | Event::BookingUpdated { booking, .. } => {
                booking.id
            }
            Event::BookingCancelled { id, .. } => *id,
        }
    }

    /// Staff members whose schedule the event touches.
    pub fn staff_ids(&self) -> Vec<Ulid> {
        match self {
            Event::BookingCreated { booking } => vec![booking.staff_id],
            Event::BookingUpdated {
                booking,
                previous_staff_id,
            } if *previous_staff_id != booking.staff_id => {
                vec![*previous_staff_id, booking.staff_id]
            }
            Event::BookingUpdated { booking, .. } => vec![booking.staff_id],
            Event::BookingCancelled { staff_id, .. } => vec![*staff_id],
        }
    }
}

// ── Requests ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub start_time: DateTime<Utc>,
    pub service_ids: Vec<Ulid>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub discount: Option<Decimal>,
}

/// Booking made by an end customer; the customer is found or created by phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicBookingRequest {
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_phone: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub staff_id: Ulid,
    pub start_time: DateTime<Utc>,
    pub service_ids: Vec<Ulid>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBookingRequest {
    #[serde(default)]
    pub staff_id: Option<Ulid>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub discount: Option<Decimal>,
}

impl UpdateBookingRequest {
    pub fn moves_booking(&self) -> bool {
        self.staff_id.is_some() || self.start_time.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingFilter {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub staff_id: Option<Ulid>,
    #[serde(default)]
    pub customer_id: Option<Ulid>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: crate::limits::DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.limit as usize
    }
}

// ── Views ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingView {
    pub id: Ulid,
    pub booking_number: String,
    pub tenant_id: TenantId,
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration: u32,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub cancel_reason: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub services: Vec<BookingServiceLine>,
    /// Filled in by the scheduler from the customer directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff: Option<StaffSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

impl From<&CustomerRecord> for CustomerSummary {
    fn from(c: &CustomerRecord) -> Self {
        Self {
            id: c.id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            phone: c.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSummary {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
}

impl From<&StaffRecord> for StaffSummary {
    fn from(s: &StaffRecord) -> Self {
        Self {
            id: s.id,
            first_name: s.first_name.clone(),
            last_name: s.last_name.clone(),
            nickname: s.nickname.clone(),
        }
    }
}

impl From<&Booking> for BookingView {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            booking_number: b.booking_number.clone(),
            tenant_id: b.tenant_id.clone(),
            customer_id: b.customer_id,
            staff_id: b.staff_id,
            start_time: from_ms(b.span.start),
            end_time: from_ms(b.span.end),
            total_duration: b.total_duration_minutes,
            subtotal: b.subtotal,
            discount: b.discount,
            total_amount: b.total_amount,
            status: b.status,
            cancel_reason: b.cancel_reason.clone(),
            notes: b.notes.clone(),
            created_by: b.created_by,
            created_at: from_ms(b.created_at),
            updated_at: from_ms(b.updated_at),
            services: b.services.clone(),
            customer: None,
            staff: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    /// Slice one page out of an already filtered and ordered result set.
    pub fn slice(all: Vec<T>, req: PageRequest) -> Self {
        let total = all.len();
        let data = all
            .into_iter()
            .skip(req.offset())
            .take(req.limit as usize)
            .collect();
        Self {
            data,
            meta: PageMeta {
                total,
                page: req.page,
                limit: req.limit,
                total_pages: total.div_ceil(req.limit.max(1) as usize),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub success: bool,
    pub booking_number: String,
    pub message: String,
}

/// One candidate slot of the availability grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: Ms,
    pub end: Ms,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub start_time: String,
    pub end_time: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityView {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub slots: Vec<SlotView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms) -> Reservation {
        Reservation {
            booking_id: Ulid::new(),
            booking_number: "BK20240315-TEST".into(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_from_minutes() {
        let s = Span::from_minutes(0, 45);
        assert_eq!(s.end, 45 * MINUTE_MS);
    }

    #[test]
    fn schedule_keeps_start_order() {
        let mut sched = StaffSchedule::new(Ulid::new());
        sched.insert(reservation(300, 400));
        sched.insert(reservation(100, 200));
        sched.insert(reservation(200, 300));
        let starts: Vec<Ms> = sched.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn schedule_remove_middle() {
        let mut sched = StaffSchedule::new(Ulid::new());
        let rs: Vec<Reservation> = (0..3).map(|i| reservation(i * 100, i * 100 + 50)).collect();
        for r in &rs {
            sched.insert(r.clone());
        }
        let removed = sched.remove(rs[1].booking_id).unwrap();
        assert_eq!(removed.span, rs[1].span);
        assert_eq!(sched.len(), 2);
        assert!(sched.remove(Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_skips_adjacent_and_future() {
        let mut sched = StaffSchedule::new(Ulid::new());
        sched.insert(reservation(100, 200));
        sched.insert(reservation(450, 600));
        sched.insert(reservation(1000, 1100));

        let hits: Vec<_> = sched.overlapping(&Span::new(200, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_long_reservation_spanning_query() {
        let mut sched = StaffSchedule::new(Ulid::new());
        sched.insert(reservation(0, 10_000));
        assert_eq!(sched.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::NoShow.is_terminal());
        assert!(!BookingStatus::Cancelled.blocks_schedule());
        assert!(BookingStatus::NoShow.blocks_schedule());
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&BookingStatus::NoShow).unwrap();
        assert_eq!(json, "\"NO_SHOW\"");
        let parsed: BookingStatus = serde_json::from_str("\"CONFIRMED\"").unwrap();
        assert_eq!(parsed, BookingStatus::Confirmed);
    }

    #[test]
    fn page_slicing() {
        let page = Page::slice((1..=45).collect::<Vec<i32>>(), PageRequest { page: 3, limit: 20 });
        assert_eq!(page.data, vec![41, 42, 43, 44, 45]);
        assert_eq!(page.meta.total, 45);
        assert_eq!(page.meta.total_pages, 3);

        let past_end = Page::slice(vec![1, 2, 3], PageRequest { page: 5, limit: 2 });
        assert!(past_end.data.is_empty());
        assert_eq!(past_end.meta.total_pages, 2);
    }
}
