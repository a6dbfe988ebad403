//! Booking rules that need no storage: pricing, numbering, status moves.

use rust_decimal::Decimal;

use crate::calendar::{self, compact_date};
use crate::catalog::ServiceSnapshot;
use crate::engine::BookingError;
use crate::limits::*;
use crate::model::*;

const NUMBER_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBER_SUFFIX_LEN: usize = 4;

/// Whether a booking may move from `from` to `to`.
///
/// ```text
/// PENDING   -> CONFIRMED | COMPLETED | CANCELLED | NO_SHOW
/// CONFIRMED -> COMPLETED | CANCELLED | NO_SHOW
/// ```
/// Everything else is terminal. Staying in the same status is not a move.
pub fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), BookingError> {
    use BookingStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending, Confirmed | Completed | Cancelled | NoShow)
            | (Confirmed, Completed | Cancelled | NoShow)
    );
    if allowed {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}

/// Duration and money of a booking, derived from its service snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub total_duration_minutes: u32,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

impl Totals {
    pub fn price(services: &[ServiceSnapshot], discount: Option<Decimal>) -> Result<Self, BookingError> {
        let total_duration_minutes: u32 = services.iter().map(|s| s.duration_minutes).sum();
        if total_duration_minutes == 0 {
            return Err(BookingError::Validation("booking has no duration".into()));
        }
        if total_duration_minutes > MAX_BOOKING_DURATION_MINUTES {
            return Err(BookingError::LimitExceeded("booking too long"));
        }
        let subtotal: Decimal = services.iter().map(|s| s.price).sum();
        let discount = discount.unwrap_or(Decimal::ZERO);
        check_discount(discount, subtotal)?;
        Ok(Self {
            total_duration_minutes,
            subtotal,
            discount,
            total_amount: subtotal - discount,
        })
    }
}

fn check_discount(discount: Decimal, subtotal: Decimal) -> Result<(), BookingError> {
    if discount < Decimal::ZERO {
        return Err(BookingError::Validation("discount must not be negative".into()));
    }
    if discount > subtotal {
        return Err(BookingError::Validation("discount exceeds subtotal".into()));
    }
    Ok(())
}

pub fn check_notes(notes: Option<&str>) -> Result<(), BookingError> {
    match notes {
        Some(n) if n.len() > MAX_NOTES_LEN => Err(BookingError::LimitExceeded("notes too long")),
        _ => Ok(()),
    }
}

pub fn check_cancel_reason(reason: Option<&str>) -> Result<(), BookingError> {
    match reason {
        Some(r) if r.len() > MAX_CANCEL_REASON_LEN => {
            Err(BookingError::LimitExceeded("cancel reason too long"))
        }
        _ => Ok(()),
    }
}

/// `BK<yyyymmdd>-<4 chars of [0-9A-Z]>`, the date being `now` in UTC.
/// `entropy` supplies the suffix; callers pass fresh randomness per attempt.
pub fn booking_number(now: Ms, entropy: u128) -> String {
    let mut suffix = String::with_capacity(NUMBER_SUFFIX_LEN);
    let mut rest = entropy;
    for _ in 0..NUMBER_SUFFIX_LEN {
        suffix.push(NUMBER_ALPHABET[(rest % 36) as usize] as char);
        rest /= 36;
    }
    format!("BK{}-{suffix}", compact_date(now))
}

pub fn random_booking_number(now: Ms) -> String {
    booking_number(now, ulid::Ulid::new().random())
}

/// The row `current` becomes after `req`, before any conflict check.
///
/// A move keeps the stored duration; services are not re-resolved. A
/// discount change recomputes the total from the stored subtotal.
pub fn apply_update(
    current: &Booking,
    req: &UpdateBookingRequest,
    now: Ms,
) -> Result<Booking, BookingError> {
    if current.status.is_terminal() {
        return Err(BookingError::Locked(current.status));
    }
    let mut next = current.clone();

    if req.moves_booking() {
        let start = req
            .start_time
            .map(calendar::to_ms)
            .unwrap_or(current.span.start);
        next.staff_id = req.staff_id.unwrap_or(current.staff_id);
        next.span = Span::from_minutes(start, current.total_duration_minutes);
    }
    if let Some(status) = req.status
        && status != current.status
    {
        check_transition(current.status, status)?;
        next.status = status;
    }
    if let Some(discount) = req.discount {
        check_discount(discount, current.subtotal)?;
        next.discount = discount;
        next.total_amount = current.subtotal - discount;
    }
    if let Some(notes) = &req.notes {
        check_notes(Some(notes))?;
        next.notes = Some(notes.clone());
    }
    next.updated_at = now;
    Ok(next)
}

/// Guard for cancellation: only PENDING and CONFIRMED bookings qualify.
pub fn check_cancellable(current: &Booking) -> Result<(), BookingError> {
    match current.status {
        BookingStatus::Cancelled => Err(BookingError::AlreadyCancelled),
        status @ (BookingStatus::Completed | BookingStatus::NoShow) => {
            Err(BookingError::CannotCancel(status))
        }
        BookingStatus::Pending | BookingStatus::Confirmed => Ok(()),
    }
}
