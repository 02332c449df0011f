use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use lakegate_core::{ObjectKey, OffsetToken, VersionId};

use super::r#trait::{
    FetchedObject, ObjectStore, ObjectStoreError, ObjectVersion, VersionPage,
};

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: VersionId,
    last_modified: DateTime<Utc>,
    body: Vec<u8>,
}

/// In-memory versioned object store.
///
/// Intended for tests/dev. Versions are kept per key in upload order; the
/// newest upload is the current version.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectKey, Vec<StoredVersion>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a new object version with an explicit timestamp, returning its
    /// version metadata.
    pub fn put(
        &self,
        key: ObjectKey,
        body: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) -> ObjectVersion {
        let version_id = VersionId::new(Uuid::now_v7().simple().to_string())
            .unwrap_or_else(|_| unreachable!("uuid encoding is never empty"));

        let version = ObjectVersion {
            key: key.clone(),
            version_id: version_id.clone(),
            last_modified,
        };

        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.entry(key).or_default().push(StoredVersion {
            version_id,
            last_modified,
            body: body.into(),
        });

        version
    }

    /// Total number of versions across all keys.
    pub fn version_count(&self) -> usize {
        self.objects
            .read()
            .map(|o| o.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn list_versions(
        &self,
        prefix: &str,
        after: Option<&OffsetToken>,
        limit: usize,
    ) -> Result<VersionPage, ObjectStoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| ObjectStoreError::Transient("lock poisoned".to_string()))?;

        let mut matching: Vec<ObjectVersion> = objects
            .iter()
            .filter(|(key, _)| key.as_str().starts_with(prefix))
            .flat_map(|(key, versions)| {
                versions.iter().map(|v| ObjectVersion {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    last_modified: v.last_modified,
                })
            })
            .collect();

        matching.sort_by_key(ObjectVersion::offset);

        let mut page: Vec<ObjectVersion> = matching
            .into_iter()
            .filter(|v| match after {
                Some(after) => v.offset() > *after,
                None => true,
            })
            .collect();

        let truncated = page.len() > limit;
        page.truncate(limit);

        let next = if truncated {
            page.last().map(ObjectVersion::offset)
        } else {
            None
        };

        Ok(VersionPage {
            versions: page,
            next,
        })
    }

    fn get_latest(&self, key: &ObjectKey) -> Result<FetchedObject, ObjectStoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| ObjectStoreError::Transient("lock poisoned".to_string()))?;

        let versions = objects.get(key).ok_or_else(|| ObjectStoreError::NotFound {
            key: key.clone(),
            version_id: None,
        })?;

        let latest = versions.last().ok_or_else(|| ObjectStoreError::NotFound {
            key: key.clone(),
            version_id: None,
        })?;

        Ok(FetchedObject {
            version: ObjectVersion {
                key: key.clone(),
                version_id: latest.version_id.clone(),
                last_modified: latest.last_modified,
            },
            body: latest.body.clone(),
        })
    }

    fn get_version(
        &self,
        key: &ObjectKey,
        version_id: &VersionId,
    ) -> Result<FetchedObject, ObjectStoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| ObjectStoreError::Transient("lock poisoned".to_string()))?;

        let stored = objects
            .get(key)
            .and_then(|versions| versions.iter().find(|v| &v.version_id == version_id))
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.clone(),
                version_id: Some(version_id.clone()),
            })?;

        Ok(FetchedObject {
            version: ObjectVersion {
                key: key.clone(),
                version_id: stored.version_id.clone(),
                last_modified: stored.last_modified,
            },
            body: stored.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn key(s: &str) -> ObjectKey {
        ObjectKey::new(s).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn lists_versions_oldest_first_with_prefix_filter() {
        let store = InMemoryObjectStore::new();
        store.put(key("events/b.json"), b"b".to_vec(), at(200));
        store.put(key("events/a.json"), b"a".to_vec(), at(100));
        store.put(key("other/c.json"), b"c".to_vec(), at(50));

        let page = store.list_versions("events/", None, 10).unwrap();
        assert_eq!(page.versions.len(), 2);
        assert_eq!(page.versions[0].key, key("events/a.json"));
        assert_eq!(page.versions[1].key, key("events/b.json"));
        assert!(page.next.is_none());
    }

    #[test]
    fn pagination_resumes_strictly_after_the_cursor() {
        let store = InMemoryObjectStore::new();
        for i in 0..5 {
            store.put(key(&format!("events/{i}.json")), vec![i as u8], at(i));
        }

        let first = store.list_versions("events/", None, 2).unwrap();
        assert_eq!(first.versions.len(), 2);
        let cursor = first.next.expect("more pages");

        let second = store.list_versions("events/", Some(&cursor), 2).unwrap();
        assert_eq!(second.versions.len(), 2);
        assert!(second.versions[0].offset() > cursor);

        let third = store
            .list_versions("events/", second.next.as_ref(), 2)
            .unwrap();
        assert_eq!(third.versions.len(), 1);
        assert!(third.next.is_none());
    }

    #[test]
    fn get_latest_returns_the_newest_upload() {
        let store = InMemoryObjectStore::new();
        store.put(key("events/a.json"), b"old".to_vec(), at(100));
        let newest = store.put(key("events/a.json"), b"new".to_vec(), at(200));

        let fetched = store.get_latest(&key("events/a.json")).unwrap();
        assert_eq!(fetched.body, b"new");
        assert_eq!(fetched.version.version_id, newest.version_id);
    }

    #[test]
    fn get_version_pins_an_old_version() {
        let store = InMemoryObjectStore::new();
        let old = store.put(key("events/a.json"), b"old".to_vec(), at(100));
        store.put(key("events/a.json"), b"new".to_vec(), at(200));

        let fetched = store
            .get_version(&key("events/a.json"), &old.version_id)
            .unwrap();
        assert_eq!(fetched.body, b"old");
    }

    #[test]
    fn missing_objects_are_not_found() {
        let store = InMemoryObjectStore::new();
        assert!(matches!(
            store.get_latest(&key("events/nope.json")),
            Err(ObjectStoreError::NotFound { .. })
        ));
    }
}
