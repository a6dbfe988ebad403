use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar;
use crate::model::*;

use super::conflict::find_conflict;
use super::{BookingError, DaySlots, Engine};

impl Engine {
    pub fn get_booking(&self, id: Ulid) -> Result<Booking, BookingError> {
        self.store
            .booking(&id)
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    /// Filtered bookings ordered by start, then id. Each date bound applies
    /// on its own: `from` keeps starts at or after it, `to` keeps starts at or
    /// before it.
    pub fn list_bookings(&self, filter: &BookingFilter, page: PageRequest) -> Page<Booking> {
        let from = filter.from.map(calendar::to_ms);
        let to = filter.to.map(calendar::to_ms);
        let mut rows = self.store.collect(|b| {
            from.is_none_or(|f| b.span.start >= f)
                && to.is_none_or(|t| b.span.start <= t)
                && filter.staff_id.is_none_or(|s| b.staff_id == s)
                && filter.customer_id.is_none_or(|c| b.customer_id == c)
                && filter.status.is_none_or(|s| b.status == s)
        });
        rows.sort_by_key(|b| (b.span.start, b.id));
        Page::slice(rows, page)
    }

    /// Every booking of `staff_id` starting within `[from, to]`, cancelled
    /// ones included, oldest first.
    pub fn bookings_by_staff(&self, staff_id: Ulid, from: Ms, to: Ms) -> Vec<Booking> {
        let mut rows = self
            .store
            .collect(|b| b.staff_id == staff_id && b.span.start >= from && b.span.start <= to);
        rows.sort_by_key(|b| (b.span.start, b.id));
        rows
    }

    /// A customer's booking history, newest first.
    pub fn bookings_by_customer(&self, customer_id: Ulid, page: PageRequest) -> Page<Booking> {
        let mut rows = self.store.collect(|b| b.customer_id == customer_id);
        rows.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));
        Page::slice(rows, page)
    }

    /// Booking number of the first non-cancelled booking of `staff_id`
    /// overlapping `span`, skipping `exclude`.
    pub async fn find_conflict(
        &self,
        staff_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Option<String> {
        let schedule = self.store.existing_schedule(&staff_id)?;
        let guard = schedule.read().await;
        find_conflict(&guard, &span, exclude).map(|r| r.booking_number.clone())
    }

    pub async fn has_conflict(&self, staff_id: Ulid, span: Span, exclude: Option<Ulid>) -> bool {
        self.find_conflict(staff_id, span, exclude).await.is_some()
    }

    /// Slot grid of `staff_id` on `date`, snapshotted under a read lock.
    pub async fn day_slots(&self, staff_id: Ulid, date: NaiveDate, duration_minutes: u32) -> DaySlots {
        let window = self.hours.window_for(date);
        let busy: Vec<Span> = match self.store.existing_schedule(&staff_id) {
            Some(schedule) => {
                let guard = schedule.read().await;
                guard.overlapping(&window).map(|r| r.span).collect()
            }
            None => Vec::new(),
        };
        DaySlots::new(staff_id, date, duration_minutes, self.hours, busy)
    }
}
