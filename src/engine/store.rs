use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSchedule = Arc<RwLock<StaffSchedule>>;

/// In-memory state of one tenant.
///
/// `bookings` holds every row, cancelled ones included. `schedules` holds only
/// the intervals that still block time, grouped per staff member. A booking
/// row is only ever replaced while its staff schedule is write-locked.
pub struct BookingStore {
    bookings: DashMap<Ulid, Booking>,
    schedules: DashMap<Ulid, SharedSchedule>,
    /// booking_number → booking id, for tenant-wide uniqueness.
    numbers: DashMap<String, Ulid>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            schedules: DashMap::new(),
            numbers: DashMap::new(),
        }
    }

    // ── Rows ─────────────────────────────────────────────────

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn staff_of(&self, id: &Ulid) -> Option<Ulid> {
        self.bookings.get(id).map(|e| e.staff_id)
    }

    /// Clone every row matching `pred`. Order is unspecified.
    pub fn collect(&self, pred: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    // ── Schedules ────────────────────────────────────────────

    pub fn schedule(&self, staff_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(staff_id)
            .or_insert_with(|| Arc::new(RwLock::new(StaffSchedule::new(staff_id))))
            .clone()
    }

    /// Existing schedule only; readers never create one.
    pub fn existing_schedule(&self, staff_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(staff_id).map(|e| e.value().clone())
    }

    /// Rebuild every staff schedule from the rows. Only called during replay,
    /// before the engine is shared, so the locks are uncontended.
    pub fn rebuild_schedules(&self) {
        self.schedules.clear();
        let mut per_staff: std::collections::HashMap<Ulid, StaffSchedule> =
            std::collections::HashMap::new();
        for entry in self.bookings.iter() {
            let b = entry.value();
            if b.status.blocks_schedule() {
                per_staff
                    .entry(b.staff_id)
                    .or_insert_with(|| StaffSchedule::new(b.staff_id))
                    .insert(b.reservation());
            }
        }
        for (staff_id, schedule) in per_staff {
            self.schedules
                .insert(staff_id, Arc::new(RwLock::new(schedule)));
        }
    }

    // ── Booking numbers ──────────────────────────────────────

    /// Claim `number` for `booking_id`. False if another booking holds it.
    pub fn reserve_number(&self, number: &str, booking_id: Ulid) -> bool {
        match self.numbers.entry(number.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(booking_id);
                true
            }
        }
    }

    pub fn release_number(&self, number: &str) {
        self.numbers.remove(number);
    }

    pub fn booking_by_number(&self, number: &str) -> Option<Ulid> {
        self.numbers.get(number).map(|e| *e.value())
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to the rows. Schedules are maintained by the caller,
    /// which holds the relevant write locks.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.numbers
                    .insert(booking.booking_number.clone(), booking.id);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingUpdated { booking, .. } => {
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingCancelled { id, reason, at, .. } => {
                if let Some(mut row) = self.bookings.get_mut(id) {
                    row.status = BookingStatus::Cancelled;
                    row.cancel_reason = reason.clone();
                    row.updated_at = *at;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantId;
    use rust_decimal::Decimal;

    fn row(staff_id: Ulid, start: Ms, number: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            tenant_id: TenantId::parse("s").unwrap(),
            booking_number: number.into(),
            customer_id: Ulid::new(),
            staff_id,
            span: Span::from_minutes(start, 30),
            total_duration_minutes: 30,
            subtotal: Decimal::from(300),
            discount: Decimal::ZERO,
            total_amount: Decimal::from(300),
            status: BookingStatus::Pending,
            cancel_reason: None,
            notes: None,
            created_by: None,
            created_at: 0,
            updated_at: 0,
            services: Vec::new(),
        }
    }

    #[test]
    fn rebuild_skips_cancelled() {
        let store = BookingStore::new();
        let staff = Ulid::new();
        let live = row(staff, 1_000_000, "BK20240315-AAAA");
        let gone = row(staff, 5_000_000, "BK20240315-BBBB");
        store.apply_event(&Event::BookingCreated { booking: live.clone() });
        store.apply_event(&Event::BookingCreated { booking: gone.clone() });
        store.apply_event(&Event::BookingCancelled {
            id: gone.id,
            staff_id: staff,
            reason: Some("no longer needed".into()),
            at: 42,
        });
        store.rebuild_schedules();

        let sched = store.existing_schedule(&staff).unwrap();
        let sched = sched.try_read().unwrap();
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.reservations[0].booking_id, live.id);

        let cancelled = store.booking(&gone.id).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.updated_at, 42);
    }

    #[test]
    fn numbers_are_unique() {
        let store = BookingStore::new();
        let a = Ulid::new();
        assert!(store.reserve_number("BK20240315-ZZ01", a));
        assert!(!store.reserve_number("BK20240315-ZZ01", Ulid::new()));
        assert_eq!(store.booking_by_number("BK20240315-ZZ01"), Some(a));
        store.release_number("BK20240315-ZZ01");
        assert!(store.reserve_number("BK20240315-ZZ01", Ulid::new()));
    }

    #[test]
    fn update_replaces_row() {
        let store = BookingStore::new();
        let staff = Ulid::new();
        let b = row(staff, 1_000_000, "BK20240315-CCCC");
        store.apply_event(&Event::BookingCreated { booking: b.clone() });

        let mut moved = b.clone();
        moved.staff_id = Ulid::new();
        store.apply_event(&Event::BookingUpdated {
            booking: moved.clone(),
            previous_staff_id: staff,
        });
        assert_eq!(store.staff_of(&b.id), Some(moved.staff_id));
        assert_eq!(store.booking_count(), 1);
    }
}
