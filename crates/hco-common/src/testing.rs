//! In-memory [`ObjectStore`] for unit tests
//!
//! Behaves like a tiny API server for a single kind: creates conflict when
//! the object exists, updates of missing objects are 404s, and every write
//! bumps `resourceVersion`. Deletion can be made to linger so callers that
//! wait for an object to disappear can be exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kube::api::DeleteParams;
use kube::error::ErrorResponse;
use kube::Resource;
use parking_lot::Mutex;

use crate::store::ObjectStore;
use crate::{Error, Result};

type Key = (String, String);

/// How long a deleted object stays visible to `get`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lingering {
    /// Gone immediately
    #[default]
    Immediate,
    /// Still visible for this many `get` calls after deletion
    Gets(usize),
    /// Never goes away
    Forever,
}

struct State<K> {
    objects: BTreeMap<Key, K>,
    terminating: BTreeMap<Key, usize>,
    deleted: Vec<Key>,
}

/// Single-kind object store held in memory
pub struct InMemoryStore<K> {
    state: Mutex<State<K>>,
    revision: AtomicU64,
    lingering: Lingering,
    get_calls: AtomicU64,
    fail_gets: Mutex<Option<ErrorResponse>>,
    hang_after: Mutex<Option<u64>>,
}

impl<K> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                terminating: BTreeMap::new(),
                deleted: Vec::new(),
            }),
            revision: AtomicU64::new(0),
            lingering: Lingering::Immediate,
            get_calls: AtomicU64::new(0),
            fail_gets: Mutex::new(None),
            hang_after: Mutex::new(None),
        }
    }
}

/// Build the error an API server returns for `code`
pub fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

impl<K> InMemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep deleted objects visible as configured
    pub fn with_lingering(mut self, lingering: Lingering) -> Self {
        self.lingering = lingering;
        self
    }

    /// Make every `get` fail with the given API error
    pub fn fail_gets_with(&self, code: u16, reason: &str) {
        *self.fail_gets.lock() = Some(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("injected {reason}"),
            reason: reason.to_string(),
            code,
        });
    }

    /// Make every `get` after the first `served` calls never complete
    pub fn hang_gets_after(&self, served: u64) {
        *self.hang_after.lock() = Some(served);
    }

    /// Insert an object directly, bypassing create semantics
    pub fn seed(&self, mut obj: K) {
        let key = key_of(&obj);
        obj.meta_mut().resource_version = Some(self.next_revision());
        if obj.meta().uid.is_none() {
            obj.meta_mut().uid = Some(format!("uid-{}-{}", key.0, key.1));
        }
        self.state.lock().objects.insert(key, obj);
    }

    /// Stored copy of an object, ignoring lingering state
    pub fn stored(&self, name: &str, namespace: &str) -> Option<K> {
        self.state
            .lock()
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of objects currently stored
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities deleted so far, in order, as `(namespace, name)`
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().deleted.clone()
    }

    /// Number of `get` calls served
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl<K> ObjectStore<K> for InMemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<K>> {
        let served = self.get_calls.fetch_add(1, Ordering::SeqCst);
        let hang_after = *self.hang_after.lock();
        if hang_after.is_some_and(|n| served >= n) {
            std::future::pending::<()>().await;
        }
        if let Some(resp) = self.fail_gets.lock().clone() {
            return Err(kube::Error::Api(resp).into());
        }

        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock();
        let remaining = state.terminating.get(&key).copied();
        match remaining {
            Some(0) => {
                state.terminating.remove(&key);
                state.objects.remove(&key);
                Ok(None)
            }
            Some(n) => {
                if self.lingering != Lingering::Forever {
                    state.terminating.insert(key.clone(), n - 1);
                }
                Ok(state.objects.get(&key).cloned())
            }
            None => Ok(state.objects.get(&key).cloned()),
        }
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let mut state = self.state.lock();
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                &format!("{} already exists", key.1),
            ));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(self.next_revision());
        stored.meta_mut().uid = Some(format!("uid-{}-{}", key.0, key.1));
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let mut state = self.state.lock();
        let Some(current) = state.objects.get(&key) else {
            return Err(api_error(404, "NotFound", &format!("{} not found", key.1)));
        };
        if obj.meta().resource_version.is_some()
            && obj.meta().resource_version != current.meta().resource_version
        {
            return Err(api_error(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version",
            ));
        }
        let mut stored = obj.clone();
        stored.meta_mut().uid = current.meta().uid.clone();
        stored.meta_mut().resource_version = Some(self.next_revision());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, name: &str, namespace: &str, params: &DeleteParams) -> Result<bool> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock();
        if !state.objects.contains_key(&key) || state.terminating.contains_key(&key) {
            return Ok(false);
        }
        if params.dry_run {
            return Ok(true);
        }
        state.deleted.push(key.clone());
        match self.lingering {
            Lingering::Immediate => {
                state.objects.remove(&key);
            }
            Lingering::Gets(n) => {
                state.terminating.insert(key, n);
            }
            Lingering::Forever => {
                state.terminating.insert(key, 1);
            }
        }
        Ok(true)
    }
}
