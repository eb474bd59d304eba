use crate::models::{ShortLink, VisitEvent};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicI64, Ordering};

/// One link plus its visit log, guarded by the owning DashMap shard
struct LinkEntry {
    link: ShortLink,
    visits: Vec<VisitEvent>,
}

/// In-process storage backed by DashMap.
///
/// Appends lock only the shard holding the link, so recording on one code
/// never blocks aggregation of another.
pub struct MemoryStorage {
    links: DashMap<String, LinkEntry>,
    admins: DashSet<String>,
    next_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
            admins: DashSet::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create_with_code(
        &self,
        short_code: &str,
        original_url: &str,
        created_by: Option<&str>,
    ) -> StorageResult<ShortLink> {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| StorageError::Other(e.into()))?
            .as_secs() as i64;

        match self.links.entry(short_code.to_string()) {
            Entry::Occupied(_) => Err(StorageError::Conflict),
            Entry::Vacant(slot) => {
                let link = ShortLink {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    short_code: short_code.to_string(),
                    original_url: original_url.to_string(),
                    created_at,
                    created_by: created_by.map(str::to_string),
                };
                slot.insert(LinkEntry {
                    link: link.clone(),
                    visits: Vec::new(),
                });
                Ok(link)
            }
        }
    }

    async fn get(&self, short_code: &str) -> Result<Option<ShortLink>> {
        Ok(self.links.get(short_code).map(|entry| entry.link.clone()))
    }

    async fn append_visit(&self, short_code: &str, visit: &VisitEvent) -> StorageResult<()> {
        let mut entry = self
            .links
            .get_mut(short_code)
            .ok_or(StorageError::NotFound)?;
        entry.visits.push(visit.clone());
        Ok(())
    }

    async fn visits(&self, short_code: &str) -> Result<Vec<VisitEvent>> {
        Ok(self
            .links
            .get(short_code)
            .map(|entry| entry.visits.clone())
            .unwrap_or_default())
    }

    async fn list(&self, created_by: Option<&str>) -> Result<Vec<ShortLink>> {
        let mut urls: Vec<ShortLink> = self
            .links
            .iter()
            .filter(|entry| match created_by {
                Some(uid) => entry.link.is_owned_by(uid),
                None => true,
            })
            .map(|entry| entry.link.clone())
            .collect();

        urls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(urls)
    }

    async fn delete(&self, short_code: &str, owner: &str) -> Result<bool> {
        Ok(self
            .links
            .remove_if(short_code, |_, entry| entry.link.is_owned_by(owner))
            .is_some())
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool> {
        Ok(self.admins.contains(user_id))
    }

    async fn promote_to_admin(&self, user_id: &str) -> Result<()> {
        self.admins.insert(user_id.to_string());
        Ok(())
    }

    async fn demote_from_admin(&self, user_id: &str) -> Result<bool> {
        Ok(self.admins.remove(user_id).is_some())
    }

    async fn list_admins(&self) -> Result<Vec<String>> {
        let mut admins: Vec<String> = self.admins.iter().map(|id| id.key().clone()).collect();
        admins.sort();
        Ok(admins)
    }
}
