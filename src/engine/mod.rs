mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{DaySlots, Slots, merge_overlapping};
pub use error::BookingError;
pub use store::{BookingStore, SharedSchedule};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::calendar::WorkingHours;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::tenant::TenantId;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the tenant's WAL. Appends that queue up while a flush is running are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so no half-written batch lingers in
    // the buffer; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("wal flush failed: {e}");
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Booking state of one tenant: rows, per-staff schedules and the WAL.
pub struct Engine {
    tenant: TenantId,
    pub(super) store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) hours: WorkingHours,
    /// Mutations hold this shared; compaction holds it exclusively so its
    /// snapshot never misses an event that is logged but not yet applied.
    pub(super) compaction_gate: RwLock<()>,
}

/// Write guards on one or two staff schedules, taken in ascending staff id
/// order so two reschedules moving bookings in opposite directions cannot
/// deadlock.
pub(super) struct StaffLocks {
    guards: Vec<(Ulid, OwnedRwLockWriteGuard<StaffSchedule>)>,
}

impl StaffLocks {
    pub(super) fn get_mut(&mut self, staff_id: Ulid) -> Option<&mut StaffSchedule> {
        self.guards
            .iter_mut()
            .find(|(id, _)| *id == staff_id)
            .map(|(_, g)| &mut **g)
    }
}

impl Engine {
    pub fn new(
        tenant: TenantId,
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        hours: WorkingHours,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let store = BookingStore::new();
        let mut foreign = 0usize;
        for event in &events {
            if let Event::BookingCreated { booking } | Event::BookingUpdated { booking, .. } = event
                && booking.tenant_id != tenant
            {
                foreign += 1;
                continue;
            }
            store.apply_event(event);
        }
        if foreign > 0 {
            tracing::warn!(tenant = %tenant, foreign, "wal replay skipped rows of another tenant");
        }
        store.rebuild_schedules();
        tracing::debug!(
            tenant = %tenant,
            events = events.len(),
            bookings = store.booking_count(),
            "wal replayed"
        );

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tenant,
            store,
            wal_tx,
            notify,
            hours,
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.hours
    }

    pub fn booking_count(&self) -> usize {
        self.store.booking_count()
    }

    async fn wal_command<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, BookingError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))
    }

    async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.wal_command(cmd, rx)
            .await?
            .map_err(|e| BookingError::Storage(e.to_string()))
    }

    /// Durably log `event`, then apply it to the rows and tell subscribers.
    /// Schedule maintenance stays with the caller, which holds the locks.
    pub(super) async fn persist_and_apply(&self, event: &Event) -> Result<(), BookingError> {
        self.wal_append(event).await?;
        self.store.apply_event(event);
        for staff_id in event.staff_ids() {
            self.notify.send(staff_id, event);
        }
        Ok(())
    }

    /// Write-lock the schedules of `staff_ids`, deduplicated and in id order.
    pub(super) async fn lock_staff(&self, mut staff_ids: Vec<Ulid>) -> StaffLocks {
        staff_ids.sort();
        staff_ids.dedup();
        let mut guards = Vec::with_capacity(staff_ids.len());
        for staff_id in staff_ids {
            let guard = self.store.schedule(staff_id).write_owned().await;
            guards.push((staff_id, guard));
        }
        StaffLocks { guards }
    }

    /// Lock the schedule currently owning booking `id`, plus `target_staff`
    /// when the booking is about to move there. Returns the row as seen under
    /// the lock.
    pub(super) async fn lock_booking(
        &self,
        id: Ulid,
        target_staff: Option<Ulid>,
    ) -> Result<(StaffLocks, Booking), BookingError> {
        loop {
            let staff_id = self
                .store
                .staff_of(&id)
                .ok_or_else(|| BookingError::not_found("booking", id))?;
            let mut wanted = vec![staff_id];
            wanted.extend(target_staff);
            let locks = self.lock_staff(wanted).await;

            // A concurrent reschedule may have moved the booking while we
            // waited; if so, start over with its new owner.
            match self.store.booking(&id) {
                Some(row) if row.staff_id == staff_id => return Ok((locks, row)),
                Some(_) => continue,
                None => return Err(BookingError::not_found("booking", id)),
            }
        }
    }
}
