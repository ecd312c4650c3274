//! Encrypted, per-recipient session store.
//!
//! Records are sealed with a [`MasterCipher`](ratchetstore_crypto::MasterCipher)
//! and written through a [`RecordStorage`] under a per-record lock. The
//! [`Session`] facade answers which session generation, if any, can be
//! used to talk to a recipient device.

pub mod blob;
pub mod config;
pub mod error;
pub mod local_key;
pub mod lock;
pub mod recipient;
pub mod remote_key;
pub mod session;
pub mod session_v1;
pub mod session_v2;
pub mod storage;
pub mod store;

pub use config::{RefreshPolicy, StoreConfig};
pub use error::StoreError;
pub use local_key::LocalKeyRecord;
pub use recipient::{CanonicalRecipient, RecipientDevice, RecipientId, DEFAULT_DEVICE_ID};
pub use remote_key::RemoteKeyRecord;
pub use session::{Session, SessionGeneration, SessionStatus};
pub use session_v1::SessionRecordV1;
pub use session_v2::{ChainKey, SessionRecordV2, SessionState, CURRENT_SESSION_VERSION};
pub use storage::{FileStorage, MemoryStorage, RecordKey, RecordKind, RecordStorage};
pub use store::SessionStore;
