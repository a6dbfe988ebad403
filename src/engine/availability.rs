use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::WorkingHours;
use crate::model::*;

/// Merge sorted spans, coalescing overlapping and touching ones.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Candidate slots of one staff member on one day.
///
/// Holds a snapshot of the busy intervals taken under the schedule's read
/// lock; iterating never touches the engine again, so `iter()` can be called
/// any number of times and always yields the same slots.
#[derive(Debug, Clone)]
pub struct DaySlots {
    staff_id: Ulid,
    date: NaiveDate,
    duration_minutes: u32,
    hours: WorkingHours,
    window: Span,
    /// Sorted, disjoint.
    busy: Vec<Span>,
}

impl DaySlots {
    /// `busy` must be sorted by start, as `StaffSchedule::overlapping` yields it.
    pub fn new(
        staff_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
        hours: WorkingHours,
        busy: impl IntoIterator<Item = Span>,
    ) -> Self {
        let busy: Vec<Span> = busy.into_iter().collect();
        Self {
            staff_id,
            date,
            duration_minutes,
            hours,
            window: hours.window_for(date),
            busy: merge_overlapping(&busy),
        }
    }

    pub fn staff_id(&self) -> Ulid {
        self.staff_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn iter(&self) -> Slots<'_> {
        Slots {
            day: self,
            next_start: self.window.start,
            busy_idx: 0,
        }
    }

    pub fn available(&self) -> impl Iterator<Item = TimeSlot> + '_ {
        self.iter().filter(|s| s.available)
    }

    /// Wall-clock rendering in the salon's local time.
    pub fn to_view(&self) -> AvailabilityView {
        AvailabilityView {
            staff_id: self.staff_id,
            date: self.date,
            duration_minutes: self.duration_minutes,
            slots: self
                .iter()
                .map(|s| SlotView {
                    start_time: self.hours.local_hhmm(s.start),
                    end_time: self.hours.local_hhmm(s.end),
                    available: s.available,
                })
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DaySlots {
    type Item = TimeSlot;
    type IntoIter = Slots<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy walk over the slot grid. Starts advance by the slot step; the walk
/// ends at the first slot that would run past closing time.
pub struct Slots<'a> {
    day: &'a DaySlots,
    next_start: Ms,
    busy_idx: usize,
}

impl Iterator for Slots<'_> {
    type Item = TimeSlot;

    fn next(&mut self) -> Option<TimeSlot> {
        let day = self.day;
        let start = self.next_start;
        if start >= day.window.end {
            return None;
        }
        let end = start + day.duration_minutes as Ms * MINUTE_MS;
        if end > day.window.end {
            return None;
        }
        self.next_start = start + day.hours.slot_step_ms();

        // Busy spans that ended by `start` cannot touch this or any later slot.
        while day
            .busy
            .get(self.busy_idx)
            .is_some_and(|b| b.end <= start)
        {
            self.busy_idx += 1;
        }
        let available = day.busy.get(self.busy_idx).is_none_or(|b| b.start >= end);
        Some(TimeSlot {
            start,
            end,
            available,
        })
    }
}
