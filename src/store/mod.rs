mod backend;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::StoreError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLocationState = Arc<RwLock<LocationState>>;

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

/// Owns the WAL. Appends that arrive while a batch is being collected share
/// one fsync; every sender in the batch gets the same result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a half-buffered batch never
    // leaks into the next one.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// One business's scheduling data: locations, roster, and appointments,
/// durable through a group-commit WAL.
///
/// Every appointment write takes the location's write lock, checks the
/// assignee exclusion, logs, and applies before releasing it, so the
/// check-and-insert is atomic with respect to other bookers.
pub struct Store {
    business_id: BusinessId,
    pub(super) locations: DashMap<LocationId, SharedLocationState>,
    pub(super) staff: DashMap<StaffId, StaffMember>,
    /// Reverse lookup: appointment id → location id.
    pub(super) appointment_to_location: DashMap<AppointmentId, LocationId>,
    /// Committed booking attempts: idempotency key → appointment id.
    pub(super) idempotency: DashMap<Ulid, AppointmentId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by every mutation from WAL append through apply; compaction
    /// takes it exclusively so its snapshot matches the log.
    pub(super) write_gate: RwLock<()>,
}

/// Apply a location-scoped event (caller holds the lock).
fn apply_to_location(
    ls: &mut LocationState,
    event: &Event,
    appointment_map: &DashMap<AppointmentId, LocationId>,
    idempotency: &DashMap<Ulid, AppointmentId>,
) {
    match event {
        Event::MembershipGranted { membership } => {
            match ls
                .memberships
                .iter_mut()
                .find(|m| m.staff_id == membership.staff_id && m.role == membership.role)
            {
                Some(existing) => existing.self_only = membership.self_only,
                None => ls.memberships.push(membership.clone()),
            }
        }
        Event::MembershipRevoked { staff_id, role, .. } => {
            ls.memberships
                .retain(|m| !(m.staff_id == *staff_id && m.role == *role));
        }
        Event::AppointmentCreated { appointment } | Event::AppointmentBooked { appointment } => {
            appointment_map.insert(appointment.id, ls.id);
            idempotency.insert(appointment.idempotency_key, appointment.id);
            ls.insert_appointment(appointment.clone());
        }
        Event::ParticipantsAttached {
            appointment_id,
            staff_ids,
            ..
        } => {
            if let Some(appt) = ls.appointment_mut(*appointment_id) {
                let business_id = appt.business_id;
                appt.participants
                    .extend(staff_ids.iter().map(|&staff_id| AppointmentParticipant {
                        appointment_id: *appointment_id,
                        staff_id,
                        business_id,
                    }));
            }
        }
        Event::AppointmentDeleted { id, .. } => {
            if let Some(appt) = ls.remove_appointment(*id) {
                idempotency.remove(&appt.idempotency_key);
            }
            appointment_map.remove(id);
        }
        // Handled at the map level.
        Event::LocationCreated { .. } | Event::StaffUpserted { .. } => {}
    }
}

impl Store {
    /// Replay `wal_path` and start the WAL writer. Must run inside a tokio
    /// runtime.
    pub fn new(business_id: BusinessId, wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            business_id,
            locations: DashMap::new(),
            staff: DashMap::new(),
            appointment_to_location: DashMap::new(),
            idempotency: DashMap::new(),
            wal_tx,
            write_gate: RwLock::new(()),
        };

        // Sole owner of every lock during replay, so try_write never fails.
        for event in &events {
            match event {
                Event::LocationCreated { id, name } => {
                    let ls = LocationState::new(*id, name.clone());
                    store.locations.insert(*id, Arc::new(RwLock::new(ls)));
                }
                Event::StaffUpserted { member } => {
                    store.staff.insert(member.id, member.clone());
                }
                other => {
                    if let Some(location_id) = other.location_id()
                        && let Some(entry) = store.locations.get(&location_id)
                        && let Ok(mut guard) = entry.value().try_write()
                    {
                        apply_to_location(
                            &mut guard,
                            other,
                            &store.appointment_to_location,
                            &store.idempotency,
                        );
                    }
                }
            }
        }

        Ok(store)
    }

    pub fn business_id(&self) -> BusinessId {
        self.business_id
    }

    pub fn get_location(&self, id: &LocationId) -> Option<SharedLocationState> {
        self.locations.get(id).map(|e| e.value().clone())
    }

    pub fn get_location_for_appointment(&self, appointment_id: &AppointmentId) -> Option<LocationId> {
        self.appointment_to_location
            .get(appointment_id)
            .map(|e| *e.value())
    }

    /// Send an event to the WAL writer and wait for its fsync.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ls: &mut LocationState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_location(ls, event, &self.appointment_to_location, &self.idempotency);
        Ok(())
    }

    /// Lookup appointment → location, then take that location's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<(LocationId, OwnedRwLockWriteGuard<LocationState>), StoreError> {
        let location_id = self
            .get_location_for_appointment(appointment_id)
            .ok_or(StoreError::NotFound(*appointment_id))?;
        let ls = self
            .get_location(&location_id)
            .ok_or(StoreError::NotFound(location_id))?;
        Ok((location_id, ls.write_owned().await))
    }
}
