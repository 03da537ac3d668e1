use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigLocator;

use super::cookies::WebSessionInvalidator;
use super::scope::{Scope, ScopeSet};
use super::{AuthError, Credential};

/// Storage key used when the host keeps a single credential.
pub const DEFAULT_STORAGE_KEY: &str = "defaultAccessToken";

/// Persistence for the credential addressed by one storage key.
///
/// `get` fails soft: a missing or malformed record reads as "no credential".
/// `clear` always invalidates the web-session side channel, even when nothing was stored.
pub trait CredentialStore: Send + Sync {
    fn storage_key(&self) -> &str;
    fn get(&self) -> Option<Credential>;
    fn set(&self, credential: &Credential) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn storage_key(&self) -> &str {
        (**self).storage_key()
    }

    fn get(&self) -> Option<Credential> {
        (**self).get()
    }

    fn set(&self, credential: &Credential) -> Result<(), AuthError> {
        (**self).set(credential)
    }

    fn clear(&self) -> Result<(), AuthError> {
        (**self).clear()
    }
}

/// Factory allowing higher-level components to open a store per storage key.
pub trait CredentialStoreFactory: Send + Sync {
    fn open(&self, storage_key: &str) -> Arc<dyn CredentialStore>;
}

/// On-disk/in-memory shape of a persisted credential.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialRecord {
    expires_in: Option<i64>,
    token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    scopes: Option<Vec<String>>,
    issued_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    fn from_credential(credential: &Credential) -> Self {
        Self {
            expires_in: Some(credential.expires_in()),
            token: Some(credential.access_token().to_owned()),
            refresh_token: credential.refresh_token().map(ToOwned::to_owned),
            token_type: Some(credential.token_type().to_owned()),
            scopes: Some(
                credential
                    .scopes()
                    .iter()
                    .map(|scope| scope.name().to_owned())
                    .collect(),
            ),
            issued_at: Some(credential.issued_at()),
        }
    }

    /// Rebuild the credential only when expiry, token and scopes are all well-formed.
    fn into_credential(self) -> Option<Credential> {
        let expires_in = self.expires_in?;
        let token = self.token?;
        let scopes = self
            .scopes?
            .iter()
            .map(|name| name.parse::<Scope>().ok())
            .collect::<Option<ScopeSet>>()?;
        Some(Credential::issued(
            token,
            self.refresh_token,
            self.token_type.unwrap_or_default(),
            expires_in,
            scopes,
            self.issued_at.unwrap_or_else(Utc::now),
        ))
    }
}

fn decode_record(key: &str, raw: &str) -> Option<Credential> {
    match serde_json::from_str::<CredentialRecord>(raw) {
        Ok(record) => {
            let credential = record.into_credential();
            if credential.is_none() {
                warn!(storage_key = key, "stored credential is incomplete; ignoring");
            }
            credential
        }
        Err(err) => {
            warn!(storage_key = key, %err, "stored credential is malformed; ignoring");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key locks so operations on one key are serialized while keys stay independent.
#[derive(Debug, Default, Clone)]
struct KeyLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    fn for_key(&self, key: &str) -> Arc<Mutex<()>> {
        lock(&self.inner)
            .entry(key.to_owned())
            .or_default()
            .clone()
    }
}

/// Filesystem-backed credential storage located in the user configuration directory.
pub struct FileCredentialStore {
    locator: ConfigLocator,
    storage_key: String,
    guard: Arc<Mutex<()>>,
    invalidator: Arc<dyn WebSessionInvalidator>,
}

impl FileCredentialStore {
    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn get(&self) -> Option<Credential> {
        let _guard = lock(&self.guard);
        let path = self.locator.credentials_file(&self.storage_key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(storage_key = %self.storage_key, %err, "unable to read stored credential");
                return None;
            }
        };
        decode_record(&self.storage_key, &raw)
    }

    fn set(&self, credential: &Credential) -> Result<(), AuthError> {
        let _guard = lock(&self.guard);
        let path = self.locator.credentials_file(&self.storage_key);
        let payload = serde_json::to_string_pretty(&CredentialRecord::from_credential(credential))?;
        Self::write_file(&path, &payload)?;
        debug!(storage_key = %self.storage_key, "credential stored");
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        self.invalidator.invalidate();
        let _guard = lock(&self.guard);
        let path = self.locator.credentials_file(&self.storage_key);
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Opens [`FileCredentialStore`]s that share one lock table.
#[derive(Clone)]
pub struct FileCredentialStoreFactory {
    locator: ConfigLocator,
    locks: KeyLocks,
    invalidator: Arc<dyn WebSessionInvalidator>,
}

impl FileCredentialStoreFactory {
    pub fn new(locator: ConfigLocator, invalidator: Arc<dyn WebSessionInvalidator>) -> Self {
        Self {
            locator,
            locks: KeyLocks::default(),
            invalidator,
        }
    }

    pub fn store(&self, storage_key: &str) -> FileCredentialStore {
        FileCredentialStore {
            locator: self.locator.clone(),
            storage_key: storage_key.to_owned(),
            guard: self.locks.for_key(storage_key),
            invalidator: self.invalidator.clone(),
        }
    }
}

impl CredentialStoreFactory for FileCredentialStoreFactory {
    fn open(&self, storage_key: &str) -> Arc<dyn CredentialStore> {
        Arc::new(self.store(storage_key))
    }
}

/// Shared in-process storage; every [`MemoryCredentialStore`] is a view onto one key.
#[derive(Clone)]
pub struct MemoryCredentialBackend {
    records: Arc<Mutex<HashMap<String, String>>>,
    invalidator: Arc<dyn WebSessionInvalidator>,
}

impl MemoryCredentialBackend {
    pub fn new(invalidator: Arc<dyn WebSessionInvalidator>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            invalidator,
        }
    }

    pub fn store(&self, storage_key: &str) -> MemoryCredentialStore {
        MemoryCredentialStore {
            backend: self.clone(),
            storage_key: storage_key.to_owned(),
        }
    }

    /// Replace the raw record for a key, bypassing validation.
    pub fn put_raw(&self, storage_key: &str, raw: impl Into<String>) {
        lock(&self.records).insert(storage_key.to_owned(), raw.into());
    }
}

impl CredentialStoreFactory for MemoryCredentialBackend {
    fn open(&self, storage_key: &str) -> Arc<dyn CredentialStore> {
        Arc::new(self.store(storage_key))
    }
}

pub struct MemoryCredentialStore {
    backend: MemoryCredentialBackend,
    storage_key: String,
}

impl CredentialStore for MemoryCredentialStore {
    fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn get(&self) -> Option<Credential> {
        let records = lock(&self.backend.records);
        let raw = records.get(&self.storage_key)?;
        decode_record(&self.storage_key, raw)
    }

    fn set(&self, credential: &Credential) -> Result<(), AuthError> {
        let payload = serde_json::to_string(&CredentialRecord::from_credential(credential))?;
        lock(&self.backend.records).insert(self.storage_key.clone(), payload);
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        self.backend.invalidator.invalidate();
        lock(&self.backend.records).remove(&self.storage_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoopInvalidator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingInvalidator {
        calls: AtomicUsize,
    }

    impl WebSessionInvalidator for CountingInvalidator {
        fn invalidate(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_credential() -> Credential {
        Credential::new(
            "token",
            Some("refresh".into()),
            "bearer",
            2_592_000,
            ScopeSet::from([Scope::Profile, Scope::History]),
        )
    }

    fn file_factory(
        temp_dir: &TempDir,
        invalidator: Arc<dyn WebSessionInvalidator>,
    ) -> FileCredentialStoreFactory {
        let locator = ConfigLocator::from_root(temp_dir.path().to_path_buf()).unwrap();
        FileCredentialStoreFactory::new(locator, invalidator)
    }

    #[test]
    fn round_trip_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_factory(&temp_dir, Arc::new(NoopInvalidator)).store(DEFAULT_STORAGE_KEY);
        let credential = sample_credential();
        store.set(&credential).unwrap();
        let loaded = store.get().unwrap();
        assert_eq!(loaded, credential);
    }

    #[test]
    fn clear_invalidates_web_session_even_when_empty() {
        let temp_dir = TempDir::new().unwrap();
        let invalidator = Arc::new(CountingInvalidator::default());
        let store = file_factory(&temp_dir, invalidator.clone()).store("missing");
        store.clear().unwrap();
        assert_eq!(invalidator.calls.load(Ordering::SeqCst), 1);
        assert!(store.get().is_none());
    }

    #[test]
    fn set_then_clear_reads_absent() {
        let invalidator = Arc::new(CountingInvalidator::default());
        let backend = MemoryCredentialBackend::new(invalidator.clone());
        let store = backend.store(DEFAULT_STORAGE_KEY);
        store.set(&sample_credential()).unwrap();
        store.clear().unwrap();
        assert!(store.get().is_none());
        assert_eq!(invalidator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn storage_keys_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let factory = file_factory(&temp_dir, Arc::new(NoopInvalidator));
        let first = factory.open("account-a");
        let second = factory.open("account-b");
        first.set(&sample_credential()).unwrap();
        assert!(first.get().is_some());
        assert!(second.get().is_none());

        let backend = MemoryCredentialBackend::new(Arc::new(NoopInvalidator));
        backend.store("a").set(&sample_credential()).unwrap();
        assert!(backend.store("b").get().is_none());
    }

    #[test]
    fn incomplete_records_read_as_absent() {
        let backend = MemoryCredentialBackend::new(Arc::new(NoopInvalidator));
        let store = backend.store("key");

        backend.put_raw("key", r#"{"token":"t","scopes":["profile"]}"#);
        assert!(store.get().is_none());

        backend.put_raw("key", r#"{"expires_in":10,"scopes":["profile"]}"#);
        assert!(store.get().is_none());

        backend.put_raw("key", r#"{"expires_in":10,"token":"t"}"#);
        assert!(store.get().is_none());
    }

    #[test]
    fn malformed_records_read_as_absent() {
        let backend = MemoryCredentialBackend::new(Arc::new(NoopInvalidator));
        let store = backend.store("key");

        backend.put_raw("key", r#"{"expires_in":"soon","token":"t","scopes":["profile"]}"#);
        assert!(store.get().is_none());

        backend.put_raw("key", r#"{"expires_in":10,"token":"t","scopes":["teleport"]}"#);
        assert!(store.get().is_none());

        backend.put_raw("key", "not json");
        assert!(store.get().is_none());
    }

    #[test]
    fn complete_record_without_optional_fields_loads() {
        let backend = MemoryCredentialBackend::new(Arc::new(NoopInvalidator));
        backend.put_raw("key", r#"{"expires_in":10,"token":"t","scopes":[]}"#);
        let credential = backend.store("key").get().unwrap();
        assert_eq!(credential.access_token(), "t");
        assert!(credential.refresh_token().is_none());
        assert!(credential.scopes().is_empty());
    }

    #[test]
    fn corrupted_file_reads_as_absent() {
        let temp_dir = TempDir::new().unwrap();
        let factory = file_factory(&temp_dir, Arc::new(NoopInvalidator));
        let locator = ConfigLocator::from_root(temp_dir.path().to_path_buf()).unwrap();
        fs::write(locator.credentials_file("broken"), "{").unwrap();
        assert!(factory.store("broken").get().is_none());
    }
}
