//! End-to-end write-behind pipeline over an in-memory durable store.
//!
//! Wires the real cache, counter recorder, cache-aside decorator, and sync
//! worker together the way the service does, with only the Postgres adapter
//! replaced by an in-memory repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use taccuino::application::repos::{
    CounterStore, CreateNoteParams, NotesRepo, RepoError, UpdateNoteParams,
};
use taccuino::cache::{
    CacheConfig, CachedNotesRepo, Counters, CounterSyncWorker, Decision, MemoryCache, NoOpCache,
    RateLimitPolicy, RateLimiter, Scope,
};
use taccuino::domain::entities::NoteRecord;

async fn flush_detached_tasks() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct InMemoryNotes {
    notes: Mutex<HashMap<i64, NoteRecord>>,
    next_id: AtomicI64,
    find_calls: AtomicUsize,
}

impl InMemoryNotes {
    fn note(&self, id: i64) -> Option<NoteRecord> {
        self.notes.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl NotesRepo for InMemoryNotes {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = OffsetDateTime::now_utc();
        let mut tags = params.tags;
        tags.sort();
        tags.dedup();
        let record = NoteRecord {
            id,
            author_id: params.author_id,
            title: params.title,
            body_markdown: params.body_markdown,
            views: 0,
            likes: 0,
            tags,
            created_at: now,
            updated_at: now,
        };
        self.notes.lock().unwrap().insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<NoteRecord>, RepoError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.note(id))
    }

    async fn list_by_author(
        &self,
        author_id: i64,
        _page: u32,
        _limit: u32,
    ) -> Result<(Vec<NoteRecord>, u64), RepoError> {
        let notes: Vec<NoteRecord> = self
            .notes
            .lock()
            .unwrap()
            .values()
            .filter(|note| note.author_id == author_id)
            .cloned()
            .collect();
        let total = notes.len() as u64;
        Ok((notes, total))
    }

    async fn search(
        &self,
        author_id: i64,
        query: &str,
        _tags: &[String],
    ) -> Result<Vec<NoteRecord>, RepoError> {
        let notes = self
            .notes
            .lock()
            .unwrap()
            .values()
            .filter(|note| note.author_id == author_id && note.title.contains(query))
            .cloned()
            .collect();
        Ok(notes)
    }

    async fn update_note(&self, params: UpdateNoteParams) -> Result<NoteRecord, RepoError> {
        let mut notes = self.notes.lock().unwrap();
        let note = notes.get_mut(&params.id).ok_or(RepoError::NotFound)?;
        note.title = params.title;
        note.body_markdown = params.body_markdown;
        note.updated_at = OffsetDateTime::now_utc();
        Ok(note.clone())
    }

    async fn delete_note(&self, id: i64) -> Result<(), RepoError> {
        self.notes
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    async fn add_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        let mut notes = self.notes.lock().unwrap();
        let note = notes.get_mut(&note_id).ok_or(RepoError::NotFound)?;
        for tag in tags {
            if !note.tags.contains(tag) {
                note.tags.push(tag.clone());
            }
        }
        note.tags.sort();
        Ok(())
    }

    async fn remove_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        let mut notes = self.notes.lock().unwrap();
        let note = notes.get_mut(&note_id).ok_or(RepoError::NotFound)?;
        note.tags.retain(|tag| !tags.contains(tag));
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryNotes {
    async fn apply_counter_deltas(
        &self,
        note_id: i64,
        views: i64,
        likes: i64,
    ) -> Result<(), RepoError> {
        let mut notes = self.notes.lock().unwrap();
        if let Some(note) = notes.get_mut(&note_id) {
            note.views += views;
            note.likes += likes;
        }
        Ok(())
    }
}

fn config() -> CacheConfig {
    CacheConfig {
        sync_interval_secs: 1,
        ..CacheConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn counters_flow_from_requests_to_durable_store() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(InMemoryNotes::default());
    let config = config();

    let repo = CachedNotesRepo::new(store.clone(), cache.clone(), &config);
    let counters = Counters::new(cache.clone(), &config);
    let handle = CounterSyncWorker::new(cache.clone(), store.clone(), &config).spawn();

    let note = repo
        .create_note(CreateNoteParams {
            author_id: 1,
            title: "Write-behind".to_string(),
            body_markdown: "counters".to_string(),
            tags: vec!["cache".to_string()],
        })
        .await
        .expect("create note");

    // Read twice: the second read is served from the cache.
    repo.find_by_id(note.id).await.expect("read").expect("present");
    repo.find_by_id(note.id).await.expect("read").expect("present");
    assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);

    // Traffic arrives before any sync cycle.
    counters.record_view(note.id).await;
    counters.record_view(note.id).await;
    counters.record_view(note.id).await;
    counters.record_like(note.id).await;
    flush_detached_tasks().await;

    // The durable row is untouched until the worker runs.
    assert_eq!(store.note(note.id).expect("note").views, 0);
    let pending = counters.pending(note.id).await;
    assert_eq!((pending.views, pending.likes), (3, 1));

    tokio::time::advance(Duration::from_secs(2)).await;
    flush_detached_tasks().await;

    let durable = store.note(note.id).expect("note");
    assert_eq!((durable.views, durable.likes), (3, 1));
    // Buffered deltas are gone once applied; display math adds zero.
    let pending = counters.pending(note.id).await;
    assert_eq!((pending.views, pending.likes), (0, 0));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deltas_recorded_between_cycles_are_not_lost() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(InMemoryNotes::default());
    let config = config();

    let counters = Counters::new(cache.clone(), &config);
    let worker = CounterSyncWorker::new(cache.clone(), store.clone(), &config);

    let note = store
        .create_note(CreateNoteParams {
            author_id: 1,
            title: "Interleaved".to_string(),
            body_markdown: String::new(),
            tags: Vec::new(),
        })
        .await
        .expect("create note");

    let mut recorded = 0;
    for batch in [5, 2, 4] {
        for _ in 0..batch {
            counters.record_view(note.id).await;
            recorded += 1;
        }
        flush_detached_tasks().await;
        worker.run_cycle().await;
    }
    counters.record_view(note.id).await;
    recorded += 1;

    let durable = store.note(note.id).expect("note").views;
    let pending = counters.pending(note.id).await.views;
    assert_eq!(durable + pending, recorded);
}

#[tokio::test]
async fn update_invalidates_cached_snapshot() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(InMemoryNotes::default());
    let repo = CachedNotesRepo::new(store.clone(), cache.clone(), &config());

    let note = repo
        .create_note(CreateNoteParams {
            author_id: 1,
            title: "Before".to_string(),
            body_markdown: String::new(),
            tags: Vec::new(),
        })
        .await
        .expect("create note");

    repo.find_by_id(note.id).await.expect("read").expect("present");

    repo.update_note(UpdateNoteParams {
        id: note.id,
        title: "After".to_string(),
        body_markdown: String::new(),
    })
    .await
    .expect("update note");

    let fresh = repo
        .find_by_id(note.id)
        .await
        .expect("read")
        .expect("present");
    assert_eq!(fresh.title, "After");
}

#[tokio::test]
async fn everything_degrades_gracefully_without_a_cache_backend() {
    let cache = Arc::new(NoOpCache);
    let store = Arc::new(InMemoryNotes::default());
    let config = config();

    let repo = CachedNotesRepo::new(store.clone(), cache.clone(), &config);
    let counters = Counters::new(cache.clone(), &config);
    let limiter = RateLimiter::new(cache.clone(), &config);
    let worker = CounterSyncWorker::new(cache.clone(), store.clone(), &config);

    let note = repo
        .create_note(CreateNoteParams {
            author_id: 1,
            title: "No cache".to_string(),
            body_markdown: String::new(),
            tags: Vec::new(),
        })
        .await
        .expect("create note");

    // Reads always reach the durable store.
    repo.find_by_id(note.id).await.expect("read").expect("present");
    repo.find_by_id(note.id).await.expect("read").expect("present");
    assert_eq!(store.find_calls.load(Ordering::SeqCst), 2);

    // Counter events are dropped, never errors.
    counters.record_view(note.id).await;
    assert_eq!(counters.pending(note.id).await.views, 0);

    // Rate limiting passes everything through.
    let policy = RateLimitPolicy {
        limit: 1,
        window_secs: 60,
    };
    for _ in 0..5 {
        assert_eq!(
            limiter.check("like", &Scope::User(1), policy).await,
            Decision::Allow
        );
    }

    // A sync cycle finds nothing to do.
    let outcome = worker.run_cycle().await;
    assert_eq!(outcome.drained, 0);
    assert_eq!(store.note(note.id).expect("note").views, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_and_counter_keys_share_the_cache_without_interfering() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(InMemoryNotes::default());
    let config = config();

    let counters = Counters::new(cache.clone(), &config);
    let limiter = RateLimiter::new(cache.clone(), &config);
    let worker = CounterSyncWorker::new(cache.clone(), store.clone(), &config);

    let note = store
        .create_note(CreateNoteParams {
            author_id: 1,
            title: "Shared".to_string(),
            body_markdown: String::new(),
            tags: Vec::new(),
        })
        .await
        .expect("create note");

    counters.record_like(note.id).await;
    let policy = RateLimitPolicy {
        limit: 10,
        window_secs: 60,
    };
    limiter.check("like", &Scope::User(1), policy).await;
    flush_detached_tasks().await;

    let outcome = worker.run_cycle().await;
    // Only the note id is reconciled; rate-limit traffic never reaches the
    // durable store.
    assert_eq!(outcome.drained, 1);
    assert_eq!(store.note(note.id).expect("note").likes, 1);
}
