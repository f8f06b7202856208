use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use super::*;
use crate::backend::SchedulingBackend;
use crate::limits::*;
use crate::schedule::BookingScope;

const M: Ms = MINUTE_MS;
const H: Ms = 60 * M;
const DAY0: Ms = 1_767_225_600_000; // 2026-01-01T00:00:00Z

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Fixture {
    store: Store,
    location: LocationId,
    s1: StaffMember,
    s2: StaffMember,
    setter: StaffMember,
}

impl Fixture {
    fn fields(&self, assignee: StaffId, start: Ms, end: Ms) -> NewAppointment {
        NewAppointment {
            business_id: self.store.business_id(),
            location_id: self.location,
            customer_id: Some(Ulid::new()),
            name: "Consult".into(),
            span: Span::new(start, end),
            kind: AppointmentKind::Meeting,
            assignee,
            idempotency_key: Ulid::new(),
        }
    }

    async fn day(&self) -> Vec<Appointment> {
        self.store
            .list_appointments(self.location, Span::new(DAY0, DAY0 + 24 * H))
            .await
            .unwrap()
    }
}

async fn setup(name: &str) -> Fixture {
    let store = Store::new(Ulid::new(), test_wal_path(name)).unwrap();
    let location = Ulid::new();
    store.create_location(location, Some("Main St".into())).await.unwrap();

    let s1 = StaffMember::new(Ulid::new(), "S1", RoleFlags::closer());
    let s2 = StaffMember::new(Ulid::new(), "S2", RoleFlags::closer());
    let setter = StaffMember::new(Ulid::new(), "Setter", RoleFlags::setter());
    for (member, role) in [(&s1, Role::Closer), (&s2, Role::Closer), (&setter, Role::Setter)] {
        store.upsert_staff(member.clone()).await.unwrap();
        store
            .grant_membership(Membership {
                location_id: location,
                staff_id: member.id,
                role,
                self_only: false,
            })
            .await
            .unwrap();
    }

    Fixture {
        store,
        location,
        s1,
        s2,
        setter,
    }
}

// ── Locations and roster ─────────────────────────────────

#[tokio::test]
async fn duplicate_location_rejected() {
    let f = setup("dup_location.wal").await;
    assert!(matches!(
        f.store.create_location(f.location, None).await,
        Err(StoreError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn roster_in_grant_order() {
    let f = setup("roster_order.wal").await;
    assert_eq!(
        f.store.list_eligible_staff(f.location, Role::Closer).await,
        vec![f.s1.clone(), f.s2.clone()]
    );
    assert_eq!(
        f.store.list_eligible_staff(f.location, Role::Setter).await,
        vec![f.setter.clone()]
    );
    assert!(f.store.list_eligible_staff(f.location, Role::Installer).await.is_empty());
    assert!(f.store.list_eligible_staff(Ulid::new(), Role::Closer).await.is_empty());
}

#[tokio::test]
async fn grant_requires_known_staff_and_location() {
    let f = setup("grant_unknown.wal").await;
    let stranger = Membership {
        location_id: f.location,
        staff_id: Ulid::new(),
        role: Role::Closer,
        self_only: false,
    };
    assert!(matches!(f.store.grant_membership(stranger).await, Err(StoreError::NotFound(_))));

    let nowhere = Membership {
        location_id: Ulid::new(),
        staff_id: f.s1.id,
        role: Role::Closer,
        self_only: false,
    };
    assert!(matches!(f.store.grant_membership(nowhere).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn booking_scope_follows_membership() {
    let f = setup("scope.wal").await;
    assert_eq!(f.store.booking_scope(f.location, f.s1.id, Role::Closer).await, BookingScope::Open);

    f.store
        .grant_membership(Membership {
            location_id: f.location,
            staff_id: f.s1.id,
            role: Role::Closer,
            self_only: true,
        })
        .await
        .unwrap();
    assert_eq!(f.store.booking_scope(f.location, f.s1.id, Role::Closer).await, BookingScope::SelfOnly);
    // Regranting updates in place; roster order is unchanged.
    assert_eq!(
        f.store.list_eligible_staff(f.location, Role::Closer).await,
        vec![f.s1.clone(), f.s2.clone()]
    );
    assert_eq!(f.store.booking_scope(f.location, f.s2.id, Role::Closer).await, BookingScope::Open);
}

#[tokio::test]
async fn revoke_membership() {
    let f = setup("revoke.wal").await;
    f.store.revoke_membership(f.location, f.s1.id, Role::Closer).await.unwrap();
    assert_eq!(
        f.store.list_eligible_staff(f.location, Role::Closer).await,
        vec![f.s2.clone()]
    );
    assert!(f.store.membership(f.location, f.s1.id, Role::Closer).await.is_none());
    assert!(matches!(
        f.store.revoke_membership(f.location, f.s1.id, Role::Closer).await,
        Err(StoreError::NotFound(_))
    ));
}

// ── Appointments ─────────────────────────────────────────

#[tokio::test]
async fn atomic_booking_lists_once_with_participants() {
    let f = setup("atomic.wal").await;
    let fields = f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H);
    let id = f.store.book_appointment_atomic(&fields, &[f.s1.id, f.setter.id]).await.unwrap();

    let day = f.day().await;
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].id, id);
    assert_eq!(day[0].span, fields.span);
    assert_eq!(day[0].participant_ids().collect::<Vec<_>>(), vec![f.s1.id, f.setter.id]);
    assert_eq!(f.store.get_location_for_appointment(&id), Some(f.location));
    assert_eq!(f.store.appointment(&id).await.map(|a| a.assignee), Some(f.s1.id));
}

#[tokio::test]
async fn assignee_exclusion_is_half_open() {
    let f = setup("exclusion.wal").await;
    let first = f
        .store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H), &[f.s1.id])
        .await
        .unwrap();

    let overlapping = f.fields(f.s1.id, DAY0 + 10 * H + 30 * M, DAY0 + 11 * H + 30 * M);
    match f.store.book_appointment_atomic(&overlapping, &[f.s1.id]).await {
        Err(StoreError::Conflict { staff_id, appointment_id }) => {
            assert_eq!(staff_id, f.s1.id);
            assert_eq!(appointment_id, first);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(matches!(
        f.store.create_appointment(&overlapping).await,
        Err(StoreError::Conflict { .. })
    ));

    // Back-to-back and other staff are fine.
    f.store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 11 * H, DAY0 + 12 * H), &[f.s1.id])
        .await
        .unwrap();
    f.store
        .book_appointment_atomic(&f.fields(f.s2.id, DAY0 + 10 * H, DAY0 + 11 * H), &[f.s2.id])
        .await
        .unwrap();
    assert_eq!(f.day().await.len(), 3);
}

#[tokio::test]
async fn exclusion_is_per_location() {
    let f = setup("per_location.wal").await;
    let other = Ulid::new();
    f.store.create_location(other, None).await.unwrap();

    f.store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H), &[f.s1.id])
        .await
        .unwrap();
    let elsewhere = NewAppointment {
        location_id: other,
        ..f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H)
    };
    f.store.book_appointment_atomic(&elsewhere, &[f.s1.id]).await.unwrap();
}

#[tokio::test]
async fn setter_is_not_exclusive() {
    let f = setup("setter.wal").await;
    f.store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H), &[f.s1.id, f.setter.id])
        .await
        .unwrap();
    // The same setter can source a concurrent appointment for another closer.
    f.store
        .book_appointment_atomic(&f.fields(f.s2.id, DAY0 + 10 * H, DAY0 + 11 * H), &[f.s2.id, f.setter.id])
        .await
        .unwrap();
}

#[tokio::test]
async fn repeated_idempotency_key_returns_existing() {
    let f = setup("idempotent.wal").await;
    let fields = f.fields(f.s1.id, DAY0 + 9 * H, DAY0 + 10 * H);
    let a = f.store.book_appointment_atomic(&fields, &[f.s1.id]).await.unwrap();
    let b = f.store.book_appointment_atomic(&fields, &[f.s1.id]).await.unwrap();
    let c = f.store.create_appointment(&fields).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(f.day().await.len(), 1);
}

#[tokio::test]
async fn atomic_replay_finishes_half_written_booking() {
    let f = setup("atomic_finishes.wal").await;
    let fields = f.fields(f.s1.id, DAY0 + 9 * H, DAY0 + 10 * H);
    // First half of a two-step write that never got its participants.
    let id = f.store.create_appointment(&fields).await.unwrap();
    f.store.attach_participants(id, &[f.s1.id]).await.unwrap();

    let replayed = f
        .store
        .book_appointment_atomic(&fields, &[f.s1.id, f.setter.id])
        .await
        .unwrap();
    assert_eq!(replayed, id);
    let day = f.day().await;
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].participant_ids().collect::<Vec<_>>(), vec![f.s1.id, f.setter.id]);

    // Nothing missing the second time round: no new rows.
    f.store
        .book_appointment_atomic(&fields, &[f.s1.id, f.setter.id])
        .await
        .unwrap();
    assert_eq!(f.day().await[0].participants.len(), 2);
}

#[tokio::test]
async fn deleting_frees_idempotency_key() {
    let f = setup("delete_key.wal").await;
    let fields = f.fields(f.s1.id, DAY0 + 9 * H, DAY0 + 10 * H);
    let first = f.store.create_appointment(&fields).await.unwrap();
    f.store.delete_appointment(first).await.unwrap();

    let second = f.store.create_appointment(&fields).await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn two_step_create_then_attach() {
    let f = setup("two_step.wal").await;
    let id = f
        .store
        .create_appointment(&f.fields(f.s1.id, DAY0 + 14 * H, DAY0 + 15 * H))
        .await
        .unwrap();
    assert!(f.day().await[0].participants.is_empty());

    f.store.attach_participants(id, &[f.s1.id, f.setter.id]).await.unwrap();
    let appt = f.store.appointment(&id).await.unwrap();
    assert_eq!(appt.participant_ids().collect::<Vec<_>>(), vec![f.s1.id, f.setter.id]);
    assert!(appt.participants.iter().all(|p| p.appointment_id == id));
}

#[tokio::test]
async fn duplicate_participant_rejected() {
    let f = setup("dup_participant.wal").await;
    let id = f
        .store
        .create_appointment(&f.fields(f.s1.id, DAY0 + 14 * H, DAY0 + 15 * H))
        .await
        .unwrap();
    f.store.attach_participants(id, &[f.s1.id]).await.unwrap();

    assert!(matches!(
        f.store.attach_participants(id, &[f.s1.id]).await,
        Err(StoreError::DuplicateParticipant { .. })
    ));
    assert!(matches!(
        f.store.attach_participants(id, &[f.setter.id, f.setter.id]).await,
        Err(StoreError::DuplicateParticipant { .. })
    ));
    assert!(matches!(
        f.store.attach_participants(id, &[Ulid::new()]).await,
        Err(StoreError::NotFound(_))
    ));
    // Nothing from the rejected calls was applied.
    assert_eq!(f.store.appointment(&id).await.unwrap().participants.len(), 1);

    let fields = f.fields(f.s2.id, DAY0 + 16 * H, DAY0 + 17 * H);
    assert!(matches!(
        f.store.book_appointment_atomic(&fields, &[f.s2.id, f.s2.id]).await,
        Err(StoreError::DuplicateParticipant { .. })
    ));
    assert_eq!(f.day().await.len(), 1);
}

#[tokio::test]
async fn attach_to_unknown_appointment() {
    let f = setup("attach_unknown.wal").await;
    assert!(matches!(
        f.store.attach_participants(Ulid::new(), &[f.s1.id]).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_removes_participants_and_frees_slot() {
    let f = setup("delete.wal").await;
    let fields = f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H);
    let id = f.store.book_appointment_atomic(&fields, &[f.s1.id, f.setter.id]).await.unwrap();
    f.store.delete_appointment(id).await.unwrap();

    assert!(f.day().await.is_empty());
    assert!(f.store.appointment(&id).await.is_none());
    assert!(matches!(f.store.delete_appointment(id).await, Err(StoreError::NotFound(_))));

    let again = NewAppointment {
        idempotency_key: Ulid::new(),
        ..fields
    };
    f.store.book_appointment_atomic(&again, &[f.s1.id]).await.unwrap();
}

#[tokio::test]
async fn validation_errors() {
    let f = setup("validation.wal").await;
    let mut backwards = f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H);
    backwards.span = Span { start: DAY0 + 11 * H, end: DAY0 + 10 * H };
    assert!(matches!(f.store.create_appointment(&backwards).await, Err(StoreError::Invalid(_))));

    let foreign = NewAppointment {
        business_id: Ulid::new(),
        ..f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H)
    };
    assert!(matches!(f.store.create_appointment(&foreign).await, Err(StoreError::Invalid(_))));

    let ancient = f.fields(f.s1.id, 0, H);
    assert!(matches!(f.store.create_appointment(&ancient).await, Err(StoreError::LimitExceeded(_))));

    let nowhere = NewAppointment {
        location_id: Ulid::new(),
        ..f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H)
    };
    assert!(matches!(f.store.create_appointment(&nowhere).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn list_window_rules() {
    let f = setup("window.wal").await;
    f.store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 10 * H, DAY0 + 11 * H), &[f.s1.id])
        .await
        .unwrap();

    let touching = f
        .store
        .list_appointments(f.location, Span::new(DAY0 + 11 * H, DAY0 + 12 * H))
        .await
        .unwrap();
    assert!(touching.is_empty());

    let empty = Span { start: DAY0, end: DAY0 };
    assert!(matches!(
        f.store.list_appointments(f.location, empty).await,
        Err(StoreError::Invalid(_))
    ));
    let wide = Span::new(DAY0, DAY0 + MAX_QUERY_WINDOW_MS + 1);
    assert!(matches!(
        f.store.list_appointments(f.location, wide).await,
        Err(StoreError::LimitExceeded(_))
    ));
    assert!(f
        .store
        .list_appointments(Ulid::new(), Span::new(DAY0, DAY0 + H))
        .await
        .unwrap()
        .is_empty());
}

// ── Priority ranking ─────────────────────────────────────

#[tokio::test]
async fn priority_prefers_lightest_free_closer() {
    let f = setup("priority.wal").await;
    let slot = Span::new(DAY0 + 15 * H, DAY0 + 16 * H);

    // No load anywhere: earliest membership wins.
    assert_eq!(f.store.get_priority_staff(f.location, slot).await, Some(f.s1.clone()));

    f.store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 9 * H, DAY0 + 10 * H), &[f.s1.id])
        .await
        .unwrap();
    assert_eq!(f.store.get_priority_staff(f.location, slot).await, Some(f.s2.clone()));

    // S2 busy during the slot: S1 is the only free closer.
    f.store
        .book_appointment_atomic(&f.fields(f.s2.id, DAY0 + 15 * H, DAY0 + 16 * H), &[f.s2.id])
        .await
        .unwrap();
    assert_eq!(f.store.get_priority_staff(f.location, slot).await, Some(f.s1.clone()));

    f.store
        .book_appointment_atomic(&f.fields(f.s1.id, DAY0 + 15 * H, DAY0 + 16 * H), &[f.s1.id])
        .await
        .unwrap();
    assert_eq!(f.store.get_priority_staff(f.location, slot).await, None);
    assert_eq!(f.store.get_priority_staff(Ulid::new(), slot).await, None);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_bookings_for_same_assignee_one_wins() {
    let f = setup("concurrent.wal").await;
    let store = Arc::new(f.store);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let fields = NewAppointment {
            business_id: store.business_id(),
            location_id: f.location,
            customer_id: None,
            name: "Race".into(),
            span: Span::new(DAY0 + 13 * H, DAY0 + 14 * H),
            kind: AppointmentKind::Meeting,
            assignee: f.s1.id,
            idempotency_key: Ulid::new(),
        };
        let staff = f.s1.id;
        handles.push(tokio::spawn(async move {
            store.book_appointment_atomic(&fields, &[staff]).await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(StoreError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    let listed = store
        .list_appointments(f.location, Span::new(DAY0, DAY0 + 24 * H))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn reopen_replays_state() {
    let path = test_wal_path("reopen.wal");
    let business = Ulid::new();
    let location = Ulid::new();
    let closer = StaffMember::new(Ulid::new(), "Ria", RoleFlags::closer());
    let setter = StaffMember::new(Ulid::new(), "Tom", RoleFlags::setter());
    let fields = NewAppointment {
        business_id: business,
        location_id: location,
        customer_id: None,
        name: "Kitchen".into(),
        span: Span::new(DAY0 + 10 * H, DAY0 + 11 * H),
        kind: AppointmentKind::Meeting,
        assignee: closer.id,
        idempotency_key: Ulid::new(),
    };

    let (kept, deleted) = {
        let store = Store::new(business, path.clone()).unwrap();
        store.create_location(location, None).await.unwrap();
        store.upsert_staff(closer.clone()).await.unwrap();
        store.upsert_staff(setter.clone()).await.unwrap();
        store
            .grant_membership(Membership {
                location_id: location,
                staff_id: closer.id,
                role: Role::Closer,
                self_only: true,
            })
            .await
            .unwrap();
        let kept = store.create_appointment(&fields).await.unwrap();
        store.attach_participants(kept, &[closer.id, setter.id]).await.unwrap();
        let deleted = store
            .book_appointment_atomic(
                &NewAppointment {
                    span: Span::new(DAY0 + 12 * H, DAY0 + 13 * H),
                    idempotency_key: Ulid::new(),
                    ..fields.clone()
                },
                &[closer.id],
            )
            .await
            .unwrap();
        store.delete_appointment(deleted).await.unwrap();
        (kept, deleted)
    };

    let store = Store::new(business, path).unwrap();
    assert_eq!(store.staff_member(&setter.id), Some(setter.clone()));
    assert_eq!(store.booking_scope(location, closer.id, Role::Closer).await, BookingScope::SelfOnly);
    let appt = store.appointment(&kept).await.unwrap();
    assert_eq!(appt.participant_ids().collect::<Vec<_>>(), vec![closer.id, setter.id]);
    assert!(store.appointment(&deleted).await.is_none());
    // The replayed idempotency key still dedups.
    assert_eq!(store.create_appointment(&fields).await.unwrap(), kept);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let f = {
        let store = Store::new(Ulid::new(), path.clone()).unwrap();
        let location = Ulid::new();
        store.create_location(location, None).await.unwrap();
        let s1 = StaffMember::new(Ulid::new(), "S1", RoleFlags::closer());
        store.upsert_staff(s1.clone()).await.unwrap();
        Fixture {
            store,
            location,
            s2: s1.clone(),
            setter: s1.clone(),
            s1,
        }
    };
    let mut ids = Vec::new();
    for hour in 9..13 {
        let fields = f.fields(f.s1.id, DAY0 + hour * H, DAY0 + (hour + 1) * H);
        let id = f.store.create_appointment(&fields).await.unwrap();
        f.store.attach_participants(id, &[f.s1.id]).await.unwrap();
        ids.push(id);
    }
    f.store.delete_appointment(ids.remove(0)).await.unwrap();

    assert_eq!(f.store.wal_appends_since_compact().await, 11);
    f.store.compact_wal().await.unwrap();
    assert_eq!(f.store.wal_appends_since_compact().await, 0);

    let business = f.store.business_id();
    let before = f.day().await;
    drop(f);

    let store = Store::new(business, path).unwrap();
    let after = store
        .list_appointments(before[0].location_id, Span::new(DAY0, DAY0 + 24 * H))
        .await
        .unwrap();
    assert_eq!(after, before);
    assert_eq!(after.iter().map(|a| a.id).collect::<Vec<_>>(), ids);
}

#[tokio::test]
async fn compaction_racing_writers_keeps_every_booking() {
    let path = test_wal_path("compact_race.wal");
    let business = Ulid::new();
    let store = Arc::new(Store::new(business, path.clone()).unwrap());
    let location = Ulid::new();
    store.create_location(location, None).await.unwrap();
    let closers: Vec<StaffMember> = (0..4)
        .map(|i| StaffMember::new(Ulid::new(), format!("C{i}"), RoleFlags::closer()))
        .collect();
    for c in &closers {
        store.upsert_staff(c.clone()).await.unwrap();
    }

    let mut writers = Vec::new();
    for closer in closers.clone() {
        let store = store.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..25 {
                let fields = NewAppointment {
                    business_id: business,
                    location_id: location,
                    customer_id: None,
                    name: "Walkthrough".into(),
                    span: Span::new(DAY0 + i * H, DAY0 + (i + 1) * H),
                    kind: AppointmentKind::Meeting,
                    assignee: closer.id,
                    idempotency_key: Ulid::new(),
                };
                store.book_appointment_atomic(&fields, &[closer.id]).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    let compactor = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                store.compact_wal().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    for w in writers {
        w.await.unwrap();
    }
    compactor.await.unwrap();

    let window = Span::new(DAY0, DAY0 + 2 * 24 * H);
    let before = store.list_appointments(location, window).await.unwrap();
    assert_eq!(before.len(), 100);
    drop(store);

    let reopened = Store::new(business, path).unwrap();
    assert_eq!(reopened.list_appointments(location, window).await.unwrap(), before);
    assert!(closers.iter().all(|c| reopened.staff_member(&c.id).is_some()));
}

// ── Backend trait ────────────────────────────────────────

#[tokio::test]
async fn backend_errors_carry_store_message() {
    let f = setup("backend_errors.wal").await;
    let backend: Arc<dyn SchedulingBackend> = Arc::new(f.store);
    let err = backend.delete_appointment(Ulid::new()).await.unwrap_err();
    assert!(err.message.starts_with("not found"));

    let staff = backend.list_eligible_staff(f.location, Role::Closer).await.unwrap();
    assert_eq!(staff.len(), 2);
}
