//! Cache-aside decorator for the notes repository.
//!
//! Single-entity reads go through the cache; every mutation delegates first
//! and deletes the snapshot only after the delegate succeeds. The mutation
//! path never writes entity content into the cache, so there is no
//! write/invalidate race to lose: the next read simply refetches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::time::timeout;
use tracing::warn;

use crate::application::repos::{CreateNoteParams, NotesRepo, RepoError, UpdateNoteParams};
use crate::domain::entities::NoteRecord;

use super::config::CacheConfig;
use super::keys;
use super::store::{Cache, CacheExt};

const METRIC_CACHE_HIT: &str = "taccuino_cache_hit_total";
const METRIC_CACHE_MISS: &str = "taccuino_cache_miss_total";

/// `NotesRepo` decorator adding read-through caching and
/// invalidate-on-write. Callers are agnostic to the wrapping.
pub struct CachedNotesRepo<R> {
    inner: R,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    op_timeout: Duration,
}

impl<R: NotesRepo> CachedNotesRepo<R> {
    pub fn new(inner: R, cache: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self {
            inner,
            cache,
            ttl: config.entity_ttl(),
            op_timeout: config.op_timeout(),
        }
    }

    /// Drop the snapshot for a note. Deletion, never patching: a partial
    /// update of a cached snapshot could leave a stale hybrid visible.
    async fn invalidate(&self, note_id: i64) {
        let key = keys::note(note_id);
        match timeout(self.op_timeout, self.cache.delete(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(note_id, error = %err, "failed to invalidate note snapshot")
            }
            Err(_) => warn!(note_id, "timed out invalidating note snapshot"),
        }
    }
}

#[async_trait]
impl<R: NotesRepo> NotesRepo for CachedNotesRepo<R> {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
        let note = self.inner.create_note(params).await?;
        self.invalidate(note.id).await;
        Ok(note)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<NoteRecord>, RepoError> {
        let key = keys::note(id);
        match timeout(self.op_timeout, self.cache.get_json::<NoteRecord>(&key)).await {
            Ok(Ok(Some(note))) => {
                counter!(METRIC_CACHE_HIT, "entity" => "note").increment(1);
                return Ok(Some(note));
            }
            Ok(Ok(None)) => {
                counter!(METRIC_CACHE_MISS, "entity" => "note").increment(1);
            }
            Ok(Err(err)) => {
                // Malformed payload or backend fault reads as a miss.
                warn!(note_id = id, error = %err, "cache read failed, falling back to store");
                counter!(METRIC_CACHE_MISS, "entity" => "note").increment(1);
            }
            Err(_) => {
                warn!(note_id = id, "cache read timed out, falling back to store");
                counter!(METRIC_CACHE_MISS, "entity" => "note").increment(1);
            }
        }

        let Some(note) = self.inner.find_by_id(id).await? else {
            return Ok(None);
        };

        // Best-effort population; the read succeeds regardless.
        match timeout(
            self.op_timeout,
            self.cache.set_json(&key, &note, Some(self.ttl)),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(note_id = id, error = %err, "failed to populate note snapshot"),
            Err(_) => warn!(note_id = id, "timed out populating note snapshot"),
        }

        Ok(Some(note))
    }

    async fn list_by_author(
        &self,
        author_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<NoteRecord>, u64), RepoError> {
        // Collections bypass the cache: invalidating query-derived keys
        // under filtering and pagination is not worth the complexity.
        self.inner.list_by_author(author_id, page, limit).await
    }

    async fn search(
        &self,
        author_id: i64,
        query: &str,
        tags: &[String],
    ) -> Result<Vec<NoteRecord>, RepoError> {
        self.inner.search(author_id, query, tags).await
    }

    async fn update_note(&self, params: UpdateNoteParams) -> Result<NoteRecord, RepoError> {
        let id = params.id;
        let note = self.inner.update_note(params).await?;
        self.invalidate(id).await;
        Ok(note)
    }

    async fn delete_note(&self, id: i64) -> Result<(), RepoError> {
        self.inner.delete_note(id).await?;
        self.invalidate(id).await;
        Ok(())
    }

    async fn add_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        self.inner.add_tags(note_id, tags).await?;
        self.invalidate(note_id).await;
        Ok(())
    }

    async fn remove_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        self.inner.remove_tags(note_id, tags).await?;
        self.invalidate(note_id).await;
        Ok(())
    }
}
