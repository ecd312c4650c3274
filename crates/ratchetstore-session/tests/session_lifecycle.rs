use ratchetstore_crypto::{generate_identity_key_pair, CurveType, IdentityKey, KeyPair, MasterSecret};
use ratchetstore_session::{
    ChainKey, LocalKeyRecord, MemoryStorage, RecipientDevice, RecipientId, RefreshPolicy,
    RemoteKeyRecord, Session, SessionRecordV1, SessionRecordV2, SessionState, SessionStatus,
    SessionStore, CURRENT_SESSION_VERSION,
};

const R: RecipientId = RecipientId(1001);
const OTHER: RecipientId = RecipientId(2002);

fn setup(policy: RefreshPolicy) -> (SessionStore, MemoryStorage, MasterSecret) {
    let storage = MemoryStorage::new();
    let store = SessionStore::new(storage.clone(), policy);
    (store, storage, MasterSecret::generate().unwrap())
}

fn write_local(store: &SessionStore, master: &MasterSecret, recipient: RecipientId) {
    LocalKeyRecord::generate(&recipient, 1, CurveType::Djb)
        .save(store, master)
        .unwrap();
}

fn write_remote(store: &SessionStore, master: &MasterSecret, recipient: RecipientId) {
    let mut record = RemoteKeyRecord::new(&recipient);
    record.update_current_remote_key(KeyPair::generate(50, CurveType::Djb).ratchet_public_key());
    record.save(store, master).unwrap();
}

fn write_v1(store: &SessionStore, master: &MasterSecret, recipient: RecipientId, identity: IdentityKey) {
    let mut record = SessionRecordV1::new(&recipient);
    record.set_identity_key(identity);
    record.set_session_version(1);
    record.save(store, master).unwrap();
}

fn write_v2(store: &SessionStore, master: &MasterSecret, device: RecipientDevice) -> SessionRecordV2 {
    let identity_pair = generate_identity_key_pair();
    let mut state = SessionState::new();
    state.set_remote_identity_key(identity_pair.identity_key());
    state.set_root_key(&[9u8; 32]);
    state.set_sender_chain(&KeyPair::generate(0, CurveType::Djb), ChainKey::new(0, &[4u8; 32]));
    let mut record = SessionRecordV2::new(device);
    record.set_state(state);
    record.save(store, master).unwrap();
    record
}

#[test]
fn concrete_v1_scenario() {
    let (store, storage, master) = setup(RefreshPolicy::default());
    let session = Session::new(&store, &master);
    assert!(!session.has_session(&R));

    let identity_pair = generate_identity_key_pair();
    let identity = *identity_pair.identity_key();
    write_local(&store, &master, R);
    write_remote(&store, &master, R);
    write_v1(&store, &master, R, identity);

    assert!(session.has_session(&R));
    assert!(session.has_encrypt_capable_session(&R));
    assert!(session.has_remote_identity_key(&R));
    assert_eq!(session.remote_identity_key(&R), Some(identity));
    assert_eq!(session.session_version(&R), 1);

    session.abort_session_for(&R).unwrap();
    assert!(!LocalKeyRecord::has_record(&store, &R));
    assert!(!RemoteKeyRecord::has_record(&store, &R));
    assert!(!SessionRecordV1::has_session(&store, &R));
    assert!(!session.has_session(&R));
    assert!(storage.is_empty());
}

#[test]
fn v1_requires_complete_triple() {
    let identity_pair = generate_identity_key_pair();
    let identity = *identity_pair.identity_key();

    for missing in 0..3 {
        let (store, _, master) = setup(RefreshPolicy::default());
        write_local(&store, &master, R);
        write_remote(&store, &master, R);
        write_v1(&store, &master, R, identity);

        match missing {
            0 => LocalKeyRecord::delete(&store, &R).unwrap(),
            1 => RemoteKeyRecord::delete(&store, &R).unwrap(),
            _ => SessionRecordV1::delete(&store, &R).unwrap(),
        }

        let session = Session::new(&store, &master);
        assert!(!session.has_session(&R), "missing record {missing}");
        assert!(!session.has_encrypt_capable_session(&R), "missing record {missing}");
        assert!(!session.has_remote_identity_key(&R), "missing record {missing}");
    }
}

#[test]
fn clear_v1_keeps_v2_sessions() {
    let (store, _, master) = setup(RefreshPolicy::default());
    let identity_pair = generate_identity_key_pair();
    write_local(&store, &master, R);
    write_remote(&store, &master, R);
    write_v1(&store, &master, R, *identity_pair.identity_key());
    write_v2(&store, &master, RecipientDevice::default_device(&R));

    let session = Session::new(&store, &master);
    session.clear_v1_session_for(&R).unwrap();

    assert!(!SessionRecordV1::has_session(&store, &R));
    assert!(session.has_session(&R));
    assert_eq!(session.session_version(&R), CURRENT_SESSION_VERSION);
}

#[test]
fn abort_removes_every_device_and_spares_other_recipients() {
    let (store, _, master) = setup(RefreshPolicy::default());
    let identity_pair = generate_identity_key_pair();
    let identity = *identity_pair.identity_key();

    for recipient in [R, OTHER] {
        write_local(&store, &master, recipient);
        write_remote(&store, &master, recipient);
        write_v1(&store, &master, recipient, identity);
        for device_id in [1, 2, 5] {
            write_v2(&store, &master, RecipientDevice::new(recipient, device_id));
        }
    }

    let session = Session::new(&store, &master);
    session.abort_session_for(&R).unwrap();

    assert!(store.keys_for(R).unwrap().is_empty());
    assert!(!session.has_session(&R));
    for device_id in [1, 2, 5] {
        assert_eq!(
            session.status(&RecipientDevice::new(R, device_id)),
            SessionStatus::NoSession
        );
    }

    assert_eq!(store.keys_for(OTHER).unwrap().len(), 6);
    assert!(session.has_session(&OTHER));
    assert_eq!(SessionRecordV2::devices_for(&store, &OTHER).unwrap(), vec![1, 2, 5]);

    // Aborting again finds nothing to delete.
    session.abort_session_for(&R).unwrap();
}

#[test]
fn stale_v2_session_is_present_but_not_encrypt_capable() {
    let policy = RefreshPolicy {
        max_messages: 2,
        max_age_secs: 0,
    };
    let (store, _, master) = setup(policy);
    let device = RecipientDevice::default_device(&R);
    let mut record = write_v2(&store, &master, device);

    let session = Session::new(&store, &master);
    assert_eq!(session.status(&device), SessionStatus::V2Session);
    assert!(session.has_encrypt_capable_session(&R));

    record.session_state_mut().record_message_encrypted();
    record.session_state_mut().record_message_encrypted();
    record.save(&store, &master).unwrap();

    assert!(session.has_session(&R));
    assert!(SessionRecordV2::needs_refresh(&store, &master, &device));
    assert_eq!(session.status(&device), SessionStatus::V2SessionStale);
    assert!(!session.has_encrypt_capable_session(&R));
    assert!(session.has_remote_identity_key(&R));

    // Renegotiation installs a new state and archives the stale one.
    let mut fresh = SessionState::new();
    fresh.set_sender_chain(&KeyPair::generate(1, CurveType::Djb), ChainKey::new(0, &[5u8; 32]));
    record.promote_state(fresh);
    record.save(&store, &master).unwrap();
    assert_eq!(session.status(&device), SessionStatus::V2Session);
}

#[test]
fn complete_v1_stays_encrypt_capable_behind_stale_v2() {
    let (store, _, master) = setup(RefreshPolicy::default());
    let identity_pair = generate_identity_key_pair();
    write_local(&store, &master, R);
    write_remote(&store, &master, R);
    write_v1(&store, &master, R, *identity_pair.identity_key());

    let device = RecipientDevice::default_device(&R);
    let mut record = write_v2(&store, &master, device);
    record.session_state_mut().set_needs_refresh(true);
    record.save(&store, &master).unwrap();

    let session = Session::new(&store, &master);
    assert_eq!(session.status(&device), SessionStatus::V2SessionStale);
    assert_eq!(session.session_version(&R), CURRENT_SESSION_VERSION);
    assert!(session.has_encrypt_capable_session(&R));
    assert!(session.has_encrypt_capable_session_for_device(&device));

    // Without the V1 fallback the stale session blocks encryption.
    session.clear_v1_session_for(&R).unwrap();
    assert!(!session.has_encrypt_capable_session(&R));
    assert!(!session.has_encrypt_capable_session_for_device(&device));
}

#[test]
fn concurrent_acknowledgements_advance_once() {
    let (store, _, master) = setup(RefreshPolicy::default());
    write_local(&store, &master, R);

    let advanced: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let master = &master;
                scope.spawn(move || LocalKeyRecord::acknowledge(&store, master, &R, 2).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum()
    });

    assert_eq!(advanced, 1);
    let record = LocalKeyRecord::load(&store, &master, &R);
    assert_eq!(record.current_key_pair().unwrap().id(), 2);
    assert_eq!(record.next_key_pair().unwrap().id(), 3);
}
