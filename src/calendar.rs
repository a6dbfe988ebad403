//! Conversions between wall-clock dates and engine instants.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

use crate::engine::BookingError;
use crate::model::{MINUTE_MS, Ms, Span};

pub fn to_ms(t: DateTime<Utc>) -> Ms {
    t.timestamp_millis()
}

pub fn from_ms(ms: Ms) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `YYYYMMDD` of the UTC date containing `ms`.
pub fn compact_date(ms: Ms) -> String {
    from_ms(ms).format("%Y%m%d").to_string()
}

/// The fixed daily window slots are generated from, in the salon's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub slot_step_minutes: u32,
    pub utc_offset: FixedOffset,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
            slot_step_minutes: 30,
            utc_offset: Utc.fix(),
        }
    }
}

impl WorkingHours {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.close <= self.open {
            return Err(BookingError::Validation(
                "working window must close after it opens".into(),
            ));
        }
        if self.slot_step_minutes == 0 {
            return Err(BookingError::Validation("slot step must be positive".into()));
        }
        Ok(())
    }

    /// `[open, close)` on `date`, as UTC instants.
    pub fn window_for(&self, date: NaiveDate) -> Span {
        let open = self.local_instant(date, self.open);
        let close = self.local_instant(date, self.close);
        Span::new(open, close)
    }

    pub fn slot_step_ms(&self) -> Ms {
        self.slot_step_minutes as Ms * MINUTE_MS
    }

    /// `HH:MM` of `ms` in the salon's local time.
    pub fn local_hhmm(&self, ms: Ms) -> String {
        from_ms(ms)
            .with_timezone(&self.utc_offset)
            .format("%H:%M")
            .to_string()
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        let local = date.and_time(time);
        let utc = Utc.from_utc_datetime(&local);
        utc.timestamp_millis() - self.utc_offset.local_minus_utc() as Ms * 1000
    }
}
