//! Repository traits describing persistence adapters.
//!
//! The cache layer never talks to the database directly; it consumes these
//! contracts and stays agnostic to the backing store.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::NoteRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateNoteParams {
    pub author_id: i64,
    pub title: String,
    pub body_markdown: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateNoteParams {
    pub id: i64,
    pub title: String,
    pub body_markdown: String,
}

/// Durable store for notes and their tag associations.
///
/// Single-entity lookups are the only reads the cache-aside decorator
/// intercepts; list and search results are always served fresh.
#[async_trait]
pub trait NotesRepo: Send + Sync {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<NoteRecord>, RepoError>;

    /// Paginated listing; returns the page of notes plus the total count.
    async fn list_by_author(
        &self,
        author_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<NoteRecord>, u64), RepoError>;

    async fn search(
        &self,
        author_id: i64,
        query: &str,
        tags: &[String],
    ) -> Result<Vec<NoteRecord>, RepoError>;

    async fn update_note(&self, params: UpdateNoteParams) -> Result<NoteRecord, RepoError>;

    async fn delete_note(&self, id: i64) -> Result<(), RepoError>;

    async fn add_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError>;

    async fn remove_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError>;
}

#[async_trait]
impl<T: NotesRepo + ?Sized> NotesRepo for Arc<T> {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
        (**self).create_note(params).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<NoteRecord>, RepoError> {
        (**self).find_by_id(id).await
    }

    async fn list_by_author(
        &self,
        author_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<NoteRecord>, u64), RepoError> {
        (**self).list_by_author(author_id, page, limit).await
    }

    async fn search(
        &self,
        author_id: i64,
        query: &str,
        tags: &[String],
    ) -> Result<Vec<NoteRecord>, RepoError> {
        (**self).search(author_id, query, tags).await
    }

    async fn update_note(&self, params: UpdateNoteParams) -> Result<NoteRecord, RepoError> {
        (**self).update_note(params).await
    }

    async fn delete_note(&self, id: i64) -> Result<(), RepoError> {
        (**self).delete_note(id).await
    }

    async fn add_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        (**self).add_tags(note_id, tags).await
    }

    async fn remove_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        (**self).remove_tags(note_id, tags).await
    }
}

/// Durable counter application for the sync worker.
///
/// Implementations must apply both deltas inside a single transaction scoped
/// to `note_id`, using relative updates (`views = views + delta`) so that
/// concurrent writers elsewhere are tolerated. The transaction must not span
/// multiple note ids.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn apply_counter_deltas(
        &self,
        note_id: i64,
        views: i64,
        likes: i64,
    ) -> Result<(), RepoError>;
}
