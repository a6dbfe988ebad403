use tokio::sync::oneshot;
use ulid::Ulid;

use crate::lifecycle;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::{BookingError, Engine, WalCommand};

impl Engine {
    /// Insert a new PENDING booking.
    ///
    /// The conflict check, WAL append and schedule insert all happen under
    /// the staff member's write lock, so two racing creates for overlapping
    /// time can never both succeed.
    pub async fn insert_booking(&self, new: NewBooking) -> Result<Booking, BookingError> {
        validate_span(&new.span)?;
        if self.store.booking_count() >= MAX_BOOKINGS_PER_TENANT {
            return Err(BookingError::LimitExceeded("too many bookings"));
        }

        let _gate = self.compaction_gate.read().await;
        let mut locks = self.lock_staff(vec![new.staff_id]).await;
        let schedule = locks
            .get_mut(new.staff_id)
            .ok_or_else(|| BookingError::Storage("staff schedule lock missing".into()))?;
        check_no_conflict(schedule, &new.span, None)?;

        let now = now_ms();
        let id = Ulid::new();
        let booking_number = self.claim_booking_number(id, now)?;
        let booking = Booking {
            id,
            tenant_id: self.tenant().clone(),
            booking_number,
            customer_id: new.customer_id,
            staff_id: new.staff_id,
            span: new.span,
            total_duration_minutes: new.total_duration_minutes,
            subtotal: new.subtotal,
            discount: new.discount,
            total_amount: new.total_amount,
            status: BookingStatus::Pending,
            cancel_reason: None,
            notes: new.notes,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            services: new.services,
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_and_apply(&event).await {
            self.store.release_number(&booking.booking_number);
            return Err(e);
        }
        schedule.insert(booking.reservation());

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            tenant = %self.tenant(),
            booking = %booking.id,
            number = %booking.booking_number,
            staff = %booking.staff_id,
            "booking created"
        );
        Ok(booking)
    }

    /// Numbers are random, so a collision with an existing booking of the
    /// tenant is retried with a fresh suffix a bounded number of times.
    fn claim_booking_number(&self, id: Ulid, now: Ms) -> Result<String, BookingError> {
        for _ in 0..BOOKING_NUMBER_ATTEMPTS {
            let number = lifecycle::random_booking_number(now);
            if self.store.reserve_number(&number, id) {
                return Ok(number);
            }
            tracing::debug!(tenant = %self.tenant(), %number, "booking number taken, retrying");
        }
        Err(BookingError::Storage(
            "could not allocate a unique booking number".into(),
        ))
    }

    /// Apply `req` to booking `id`. When the booking moves (time or staff),
    /// the target schedule is re-checked excluding the booking itself, and
    /// both the old and the new staff schedule stay locked until the change
    /// is durable.
    pub async fn update_booking(
        &self,
        id: Ulid,
        req: &UpdateBookingRequest,
    ) -> Result<Booking, BookingError> {
        let _gate = self.compaction_gate.read().await;
        let (mut locks, current) = self.lock_booking(id, req.staff_id).await?;
        let next = lifecycle::apply_update(&current, req, now_ms())?;

        let moved = next.span != current.span || next.staff_id != current.staff_id;
        if moved {
            validate_span(&next.span)?;
        }
        if moved && next.status.blocks_schedule() {
            let target = locks
                .get_mut(next.staff_id)
                .ok_or_else(|| BookingError::Storage("staff schedule lock missing".into()))?;
            check_no_conflict(target, &next.span, Some(id))?;
        }

        let event = Event::BookingUpdated {
            booking: next.clone(),
            previous_staff_id: current.staff_id,
        };
        self.persist_and_apply(&event).await?;

        if let Some(old) = locks.get_mut(current.staff_id) {
            old.remove(id);
        }
        if next.status.blocks_schedule()
            && let Some(target) = locks.get_mut(next.staff_id)
        {
            target.insert(next.reservation());
        }

        if next.status == BookingStatus::Cancelled {
            metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        }
        tracing::info!(
            tenant = %self.tenant(),
            booking = %id,
            staff = %next.staff_id,
            status = %next.status,
            moved,
            "booking updated"
        );
        Ok(next)
    }

    /// Cancel booking `id` and release its interval.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        lifecycle::check_cancel_reason(reason.as_deref())?;
        let _gate = self.compaction_gate.read().await;
        let (mut locks, current) = self.lock_booking(id, None).await?;
        lifecycle::check_cancellable(&current)?;

        let event = Event::BookingCancelled {
            id,
            staff_id: current.staff_id,
            reason,
            at: now_ms(),
        };
        self.persist_and_apply(&event).await?;
        if let Some(schedule) = locks.get_mut(current.staff_id) {
            schedule.remove(id);
        }

        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!(
            tenant = %self.tenant(),
            booking = %id,
            number = %current.booking_number,
            "booking cancelled"
        );
        self.store
            .booking(&id)
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    /// Rewrite the WAL as one `BookingCreated` per booking, in id order.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        let _gate = self.compaction_gate.write().await;
        let mut rows = self.store.collect(|_| true);
        rows.sort_by_key(|b| b.id);
        let events: Vec<Event> = rows
            .into_iter()
            .map(|booking| Event::BookingCreated { booking })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_command(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| BookingError::Storage(e.to_string()))?;
        tracing::info!(tenant = %self.tenant(), bookings = count, "wal compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_command(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}
