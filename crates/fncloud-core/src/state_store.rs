// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State Continuity Store
//!
//! Keeps the attribute map of wrapped instances between independent remote
//! method calls. The first remote call captures the local instance; later
//! calls reuse the stored map and merge back whatever the remote side reports.
//!
//! Capture is shallow and goes through serde: the instance must serialize to
//! a JSON object. Expiry is checked lazily when a snapshot is accessed.
//!
//! A remote method call holds a [`StateLease`] from the moment it reads the
//! snapshot until it merges the result, so calls on one instance run one at a
//! time and each starts from the state the previous one left behind.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invocation::attribute_map;

/// Declaring type plus per-instance token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectId {
    pub class: String,
    pub token: Uuid,
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.class, self.token)
    }
}

/// An instance bound to a per-instance token.
///
/// Local method calls go through `Deref`/`DerefMut` and are never affected by
/// remote state.
#[derive(Debug, Clone)]
pub struct Stateful<T> {
    token: Uuid,
    ttl: Option<Duration>,
    inner: T,
}

impl<T> Stateful<T> {
    pub fn new(inner: T) -> Self {
        Self {
            token: Uuid::new_v4(),
            ttl: None,
            inner,
        }
    }

    /// Expire this instance's remote state `ttl` after its last update.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId {
            class: std::any::type_name::<T>().to_string(),
            token: self.token,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for Stateful<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Stateful<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

/// Stored attribute map of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStateSnapshot {
    pub object: ObjectId,
    pub attributes: Map<String, Value>,
    pub ttl: Option<Duration>,
    pub updated_at: Instant,
    /// Bumped on every merged mutation
    pub version: u64,
}

impl InstanceStateSnapshot {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(self.updated_at) >= ttl)
    }
}

type Slot = Arc<Mutex<Option<InstanceStateSnapshot>>>;

/// Exclusive hold on one instance's snapshot.
///
/// Other callers for the same instance wait until the lease is dropped.
pub struct StateLease {
    object: ObjectId,
    ttl: Option<Duration>,
    baseline: InstanceStateSnapshot,
    guard: OwnedMutexGuard<Option<InstanceStateSnapshot>>,
}

impl StateLease {
    pub fn object(&self) -> &ObjectId {
        &self.object
    }

    /// Snapshot as it was when the lease was taken.
    pub fn snapshot(&self) -> &InstanceStateSnapshot {
        &self.baseline
    }

    /// Merge attributes reported by the remote call. Returns the new version.
    pub fn apply_changes(&mut self, changes: Map<String, Value>) -> u64 {
        merge(&mut self.guard, &self.object, self.ttl, changes)
    }
}

impl std::fmt::Debug for StateLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateLease")
            .field("object", &self.object)
            .field("version", &self.baseline.version)
            .finish()
    }
}

fn merge(
    slot: &mut Option<InstanceStateSnapshot>,
    object: &ObjectId,
    ttl: Option<Duration>,
    changes: Map<String, Value>,
) -> u64 {
    let now = Instant::now();
    match StateStore::live(slot) {
        Some(snapshot) => {
            let changed = changes
                .iter()
                .any(|(key, value)| snapshot.attributes.get(key) != Some(value));
            snapshot.attributes.extend(changes);
            snapshot.updated_at = now;
            if changed {
                snapshot.version += 1;
            }
            debug!(object = %object, version = snapshot.version, changed, "Merged instance state");
            snapshot.version
        }
        None => {
            *slot = Some(InstanceStateSnapshot {
                object: object.clone(),
                attributes: changes,
                ttl,
                updated_at: now,
                version: 0,
            });
            0
        }
    }
}

/// Per-instance snapshot table.
pub struct StateStore {
    default_ttl: Option<Duration>,
    snapshots: RwLock<HashMap<ObjectId, Slot>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StateStore {
    /// `default_ttl` applies to instances without their own TTL.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            default_ttl,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, object: &ObjectId) -> Slot {
        if let Some(slot) = self.snapshots.read().await.get(object) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.snapshots
                .write()
                .await
                .entry(object.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    fn live(slot: &mut Option<InstanceStateSnapshot>) -> Option<&mut InstanceStateSnapshot> {
        if slot.as_ref().is_some_and(|s| s.is_expired(Instant::now())) {
            if let Some(expired) = slot.take() {
                debug!(object = %expired.object, "Instance state expired");
            }
        }
        slot.as_mut()
    }

    /// Capture the local instance, replacing any stored snapshot.
    pub async fn capture<T: Serialize>(&self, instance: &Stateful<T>) -> Result<InstanceStateSnapshot> {
        let object = instance.object_id();
        let attributes = attribute_map(&instance.inner).map_err(Error::NotSerializable)?;

        let slot = self.slot(&object).await;
        let mut guard = slot.lock().await;
        let version = guard.as_ref().map(|s| s.version + 1).unwrap_or(0);
        let snapshot = InstanceStateSnapshot {
            object,
            attributes,
            ttl: instance.ttl.or(self.default_ttl),
            updated_at: Instant::now(),
            version,
        };
        debug!(object = %snapshot.object, version, "Captured instance state");
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Take the instance's lease, capturing the local instance first if it has
    /// no live snapshot.
    pub async fn lock<T: Serialize>(&self, instance: &Stateful<T>) -> Result<StateLease> {
        let object = instance.object_id();
        let ttl = instance.ttl.or(self.default_ttl);
        let mut guard = self.slot(&object).await.lock_owned().await;

        let live = Self::live(&mut guard).map(|snapshot| snapshot.clone());
        let baseline = match live {
            Some(snapshot) => snapshot,
            None => {
                let attributes =
                    attribute_map(&instance.inner).map_err(Error::NotSerializable)?;
                let snapshot = InstanceStateSnapshot {
                    object: object.clone(),
                    attributes,
                    ttl,
                    updated_at: Instant::now(),
                    version: 0,
                };
                debug!(object = %object, "Captured instance state");
                *guard = Some(snapshot.clone());
                snapshot
            }
        };

        Ok(StateLease {
            object,
            ttl,
            baseline,
            guard,
        })
    }

    /// Live snapshot for the instance, capturing it first if there is none.
    pub async fn get_or_capture<T: Serialize>(
        &self,
        instance: &Stateful<T>,
    ) -> Result<InstanceStateSnapshot> {
        self.lock(instance)
            .await
            .map(|lease| lease.snapshot().clone())
    }

    /// Live snapshot, if any.
    pub async fn snapshot(&self, object: &ObjectId) -> Option<InstanceStateSnapshot> {
        let slot = self.snapshots.read().await.get(object).cloned()?;
        let mut guard = slot.lock().await;
        Self::live(&mut guard).map(|s| s.clone())
    }

    /// Rebuild an instance from its live snapshot. `None` when there is none.
    pub async fn restore<T: DeserializeOwned>(&self, object: &ObjectId) -> Result<Option<T>> {
        match self.snapshot(object).await {
            Some(snapshot) => serde_json::from_value(Value::Object(snapshot.attributes))
                .map(Some)
                .map_err(|e| Error::NotSerializable(e.to_string())),
            None => Ok(None),
        }
    }

    /// Merge attributes reported by a remote call. Returns the new version.
    ///
    /// Merging into an absent or expired snapshot starts a new one from the
    /// reported map, keeping the instance's TTL.
    pub async fn apply_changes<T>(&self, instance: &Stateful<T>, changes: Map<String, Value>) -> u64 {
        let object = instance.object_id();
        let slot = self.slot(&object).await;
        let mut guard = slot.lock().await;
        merge(&mut guard, &object, instance.ttl.or(self.default_ttl), changes)
    }

    /// Drop the snapshot. Returns whether one existed.
    pub async fn invalidate(&self, object: &ObjectId) -> bool {
        let removed = self.snapshots.write().await.remove(object);
        match removed {
            Some(slot) => {
                let existed = slot.lock().await.take().is_some();
                debug!(object = %object, existed, "Invalidated instance state");
                existed
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
        #[serde(skip)]
        scratch: Vec<u8>,
    }

    fn counter() -> Stateful<Counter> {
        Stateful::new(Counter {
            count: 0,
            scratch: vec![1, 2, 3],
        })
    }

    #[tokio::test]
    async fn test_get_or_capture_reuses_live_snapshot() {
        let store = StateStore::default();
        let mut instance = counter();

        let first = store.get_or_capture(&instance).await.unwrap();
        assert_eq!(first.attributes["count"], json!(0));
        assert!(!first.attributes.contains_key("scratch"));

        instance.count = 99;
        let second = store.get_or_capture(&instance).await.unwrap();
        assert_eq!(second.attributes["count"], json!(0));
    }

    #[tokio::test]
    async fn test_apply_changes_bumps_version_only_on_change() {
        let store = StateStore::default();
        let instance = counter();
        let object = instance.object_id();
        store.get_or_capture(&instance).await.unwrap();

        let mut changes = Map::new();
        changes.insert("count".to_string(), json!(1));
        assert_eq!(store.apply_changes(&instance, changes.clone()).await, 1);
        assert_eq!(store.apply_changes(&instance, changes).await, 1);

        let restored: Counter = store.restore(&object).await.unwrap().unwrap();
        assert_eq!(restored.count, 1);
        assert!(restored.scratch.is_empty());
    }

    #[tokio::test]
    async fn test_non_object_state_is_rejected() {
        let store = StateStore::default();
        let instance = Stateful::new(7u32);
        assert!(matches!(
            store.get_or_capture(&instance).await,
            Err(Error::NotSerializable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_lazily() {
        let store = StateStore::default();
        let instance = counter().with_ttl(Duration::from_secs(30));
        let object = instance.object_id();
        store.get_or_capture(&instance).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.snapshot(&object).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.snapshot(&object).await.is_none());
        assert!(store.restore::<Counter>(&object).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreated_snapshot_keeps_instance_ttl() {
        let store = StateStore::new(Some(Duration::from_secs(3600)));
        let instance = counter().with_ttl(Duration::from_secs(10));
        let object = instance.object_id();

        let mut changes = Map::new();
        changes.insert("count".to_string(), json!(5));
        assert_eq!(store.apply_changes(&instance, changes).await, 0);
        assert_eq!(
            store.snapshot(&object).await.unwrap().ttl,
            Some(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(store.snapshot(&object).await.is_none());
    }

    #[tokio::test]
    async fn test_lease_serializes_callers_on_one_instance() {
        let store = Arc::new(StateStore::default());
        let instance = counter();
        let object = instance.object_id();

        let mut lease = store.lock(&instance).await.unwrap();
        assert_eq!(lease.snapshot().version, 0);

        let waiter = {
            let store = Arc::clone(&store);
            let instance = instance.clone();
            tokio::spawn(async move {
                let lease = store.lock(&instance).await.unwrap();
                lease.snapshot().attributes["count"].clone()
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let mut changes = Map::new();
        changes.insert("count".to_string(), json!(1));
        assert_eq!(lease.apply_changes(changes), 1);
        drop(lease);

        assert_eq!(waiter.await.unwrap(), json!(1));

        // Other instances are not blocked
        let other = counter();
        let held = store.lock(&instance).await.unwrap();
        assert!(store.lock(&other).await.is_ok());
        drop(held);
        assert_eq!(store.snapshot(&object).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let store = StateStore::default();
        let instance = counter();
        let object = instance.object_id();
        store.get_or_capture(&instance).await.unwrap();

        assert!(store.invalidate(&object).await);
        assert!(!store.invalidate(&object).await);
        assert!(store.snapshot(&object).await.is_none());
    }

    #[test]
    fn test_object_id_uses_type_name() {
        let a = counter();
        let b = counter();
        assert_ne!(a.object_id(), b.object_id());
        assert!(a.object_id().class.ends_with("Counter"));
    }
}
