use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::BookingError;

pub(crate) fn now_ms() -> Ms {
    crate::calendar::to_ms(chrono::Utc::now())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), BookingError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::Validation("start time out of range".into()));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MINUTES as Ms * MINUTE_MS {
        return Err(BookingError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// First reservation overlapping `span`, ignoring `exclude`.
///
/// The schedule only holds non-cancelled bookings, so cancelled ones never
/// collide.
pub(crate) fn find_conflict<'a>(
    schedule: &'a StaffSchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    schedule
        .overlapping(span)
        .find(|r| Some(r.booking_id) != exclude)
}

/// Caller must hold the schedule's write lock until the booking is applied.
pub(crate) fn check_no_conflict(
    schedule: &StaffSchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    match find_conflict(schedule, span, exclude) {
        Some(hit) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(BookingError::Conflict {
                booking_number: hit.booking_number.clone(),
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched_with(spans: &[(Ms, Ms)]) -> (StaffSchedule, Vec<Ulid>) {
        let mut s = StaffSchedule::new(Ulid::new());
        let mut ids = Vec::new();
        for (i, (start, end)) in spans.iter().enumerate() {
            let id = Ulid::new();
            ids.push(id);
            s.insert(Reservation {
                booking_id: id,
                booking_number: format!("BK20240315-000{i}"),
                span: Span::new(*start, *end),
            });
        }
        (s, ids)
    }

    #[test]
    fn touching_boundaries_do_not_conflict() {
        let (s, _) = sched_with(&[(100, 200)]);
        assert!(check_no_conflict(&s, &Span::new(200, 300), None).is_ok());
        assert!(check_no_conflict(&s, &Span::new(0, 100), None).is_ok());
    }

    #[test]
    fn overlap_names_colliding_booking() {
        let (s, _) = sched_with(&[(100, 200), (300, 400)]);
        match check_no_conflict(&s, &Span::new(350, 450), None) {
            Err(BookingError::Conflict { booking_number }) => {
                assert_eq!(booking_number, "BK20240315-0001")
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn exclude_skips_self() {
        let (s, ids) = sched_with(&[(100, 200)]);
        assert!(check_no_conflict(&s, &Span::new(150, 250), Some(ids[0])).is_ok());
        assert!(check_no_conflict(&s, &Span::new(150, 250), Some(Ulid::new())).is_err());
    }

    #[test]
    fn span_limits() {
        let start = 1_710_496_800_000;
        assert!(validate_span(&Span::from_minutes(start, 45)).is_ok());
        assert!(validate_span(&Span::from_minutes(start, MAX_BOOKING_DURATION_MINUTES + 1)).is_err());
        assert!(validate_span(&Span::from_minutes(0, 45)).is_err());
    }
}
