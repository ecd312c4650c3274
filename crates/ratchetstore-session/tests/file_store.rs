use std::fs;

use proptest::prelude::*;
use ratchetstore_crypto::{generate_identity_key_pair, CurveType, KeyPair, MasterSecret, MEDIUM_MAX};
use ratchetstore_session::{
    ChainKey, FileStorage, LocalKeyRecord, RecipientDevice, RecipientId, RecordKey, RefreshPolicy,
    RemoteKeyRecord, Session, SessionRecordV1, SessionRecordV2, SessionState, SessionStore,
    StoreConfig, StoreError,
};

const R: RecipientId = RecipientId(77);

fn file_store(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::new(FileStorage::open(dir.path()).unwrap(), RefreshPolicy::default())
}

fn write_triple(store: &SessionStore, master: &MasterSecret) {
    LocalKeyRecord::generate(&R, 1, CurveType::Djb).save(store, master).unwrap();
    let mut remote = RemoteKeyRecord::new(&R);
    remote.update_current_remote_key(KeyPair::generate(30, CurveType::Djb).ratchet_public_key());
    remote.save(store, master).unwrap();
    let identity_pair = generate_identity_key_pair();
    let mut session = SessionRecordV1::new(&R);
    session.set_identity_key(*identity_pair.identity_key());
    session.set_session_version(1);
    session.save(store, master).unwrap();
}

#[test]
fn records_use_deterministic_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let master = MasterSecret::generate().unwrap();
    write_triple(&store, &master);

    let mut v2 = SessionRecordV2::new(RecipientDevice::new(R, 3));
    let mut state = SessionState::new();
    state.set_sender_chain(&KeyPair::generate(0, CurveType::Djb), ChainKey::new(0, &[1u8; 32]));
    v2.set_state(state);
    v2.save(&store, &master).unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["77-local", "77-remote", "77-session", "77.3-ratchet"]);
}

#[test]
fn survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let master = MasterSecret::generate().unwrap();
    let before = {
        let store = file_store(&dir);
        write_triple(&store, &master);
        LocalKeyRecord::load(&store, &master, &R)
    };

    let store = file_store(&dir);
    let after = LocalKeyRecord::load(&store, &master, &R);
    assert_eq!(
        after.current_key_pair().unwrap().serialize(),
        before.current_key_pair().unwrap().serialize()
    );
    assert!(Session::new(&store, &master).has_session(&R));
}

#[test]
fn shorter_rewrite_leaves_no_trailing_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let master = MasterSecret::generate().unwrap();
    let path = dir.path().join(RecordKey::remote(R).file_name());

    let mut record = RemoteKeyRecord::new(&R);
    record.update_current_remote_key(KeyPair::generate(1, CurveType::Djb).ratchet_public_key());
    record.update_current_remote_key(KeyPair::generate(2, CurveType::Djb).ratchet_public_key());
    record.save(&store, &master).unwrap();
    let long_len = fs::metadata(&path).unwrap().len();

    let mut shorter = RemoteKeyRecord::new(&R);
    shorter.set_current_remote_key(KeyPair::generate(3, CurveType::Djb).ratchet_public_key());
    shorter.save(&store, &master).unwrap();
    let short_len = fs::metadata(&path).unwrap().len();

    assert!(short_len < long_len);
    let loaded = RemoteKeyRecord::try_load(&store, &master, &R).unwrap();
    assert_eq!(loaded.current_remote_key().unwrap().id(), 3);
    assert!(loaded.last_remote_key().is_none());
}

#[test]
fn truncated_payload_reads_as_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let master = MasterSecret::generate().unwrap();
    write_triple(&store, &master);

    let path = dir.path().join(RecordKey::local(R).file_name());
    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() / 2]).unwrap();

    assert!(LocalKeyRecord::load(&store, &master, &R).is_empty());
    assert!(matches!(
        LocalKeyRecord::try_load(&store, &master, &R),
        Err(StoreError::Corrupted(_))
    ));
    // The file exists, so the triple still counts; a sender would find the
    // key material missing when it tried to use it.
    assert!(LocalKeyRecord::has_record(&store, &R));
}

#[test]
fn flipped_byte_fails_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let master = MasterSecret::generate().unwrap();
    write_triple(&store, &master);

    let path = dir.path().join(RecordKey::session_v1(R).file_name());
    let mut data = fs::read(&path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0x01;
    fs::write(&path, &data).unwrap();

    let loaded = SessionRecordV1::load(&store, &master, &R);
    assert!(loaded.identity_key().is_none());
    assert_eq!(loaded.session_version(), 0);
    assert!(SessionRecordV1::try_load(&store, &master, &R).is_err());
}

#[test]
fn wrong_master_secret_sees_no_v2_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let master = MasterSecret::generate().unwrap();
    let device = RecipientDevice::default_device(&R);

    let mut record = SessionRecordV2::new(device);
    let mut state = SessionState::new();
    state.set_sender_chain(&KeyPair::generate(0, CurveType::Djb), ChainKey::new(0, &[2u8; 32]));
    record.set_state(state);
    record.save(&store, &master).unwrap();

    let other = MasterSecret::generate().unwrap();
    let session = Session::new(&store, &other);
    assert!(!session.has_session(&R));
    assert_eq!(session.session_version(&R), 0);
    assert!(Session::new(&store, &master).has_session(&R));
}

#[test]
fn missing_record_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let master = MasterSecret::generate().unwrap();
    assert!(matches!(
        RemoteKeyRecord::try_load(&store, &master, &R),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn open_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        sessions_dir: dir.path().join("nested").join("sessions"),
        refresh: RefreshPolicy::never(),
    };
    let store = SessionStore::open(&config).unwrap();
    let master = MasterSecret::generate().unwrap();
    write_triple(&store, &master);
    assert!(config.sessions_dir.join("77-session").exists());
    assert_eq!(store.refresh_policy(), &RefreshPolicy::never());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn acknowledged_advance_survives_reload(first_id in 0u32..MEDIUM_MAX) {
        let store = SessionStore::in_memory();
        let master = MasterSecret::from_key_bytes([7u8; 32]);
        LocalKeyRecord::generate(&R, first_id, CurveType::Djb).save(&store, &master).unwrap();

        let next_id = (first_id + 1) % MEDIUM_MAX;
        prop_assert!(LocalKeyRecord::acknowledge(&store, &master, &R, next_id).unwrap());

        let loaded = LocalKeyRecord::load(&store, &master, &R);
        prop_assert_eq!(loaded.current_key_pair().unwrap().id(), next_id);
        prop_assert_eq!(loaded.next_key_pair().unwrap().id(), (next_id + 1) % MEDIUM_MAX);
    }
}
