use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Row};
use time::OffsetDateTime;

use crate::{
    application::repos::{
        CounterStore, CreateNoteParams, NotesRepo, RepoError, UpdateNoteParams,
    },
    domain::entities::NoteRecord,
};

use super::PostgresRepositories;

const NOTE_COLUMNS: &str = "n.id, n.author_id, n.title, n.body_markdown, n.views, n.likes, \
     COALESCE(array_agg(t.tag ORDER BY t.tag) FILTER (WHERE t.tag IS NOT NULL), '{}') AS tags, \
     n.created_at, n.updated_at";

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: i64,
    author_id: i64,
    title: String,
    body_markdown: String,
    views: i64,
    likes: i64,
    tags: Vec<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<NoteRow> for NoteRecord {
    fn from(row: NoteRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            body_markdown: row.body_markdown,
            views: row.views,
            likes: row.likes,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl NotesRepo for PostgresRepositories {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
        let CreateNoteParams {
            author_id,
            title,
            body_markdown,
            tags,
        } = params;

        let mut tx = self.begin().await.map_err(RepoError::from_persistence)?;

        let row = sqlx::query(
            r#"
            INSERT INTO notes (author_id, title, body_markdown)
            VALUES ($1, $2, $3)
            RETURNING id, views, likes, created_at, updated_at
            "#,
        )
        .bind(author_id)
        .bind(&title)
        .bind(&body_markdown)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepoError::from_persistence)?;

        let id: i64 = row.try_get("id").map_err(RepoError::from_persistence)?;
        let views: i64 = row.try_get("views").map_err(RepoError::from_persistence)?;
        let likes: i64 = row.try_get("likes").map_err(RepoError::from_persistence)?;
        let created_at: OffsetDateTime = row
            .try_get("created_at")
            .map_err(RepoError::from_persistence)?;
        let updated_at: OffsetDateTime = row
            .try_get("updated_at")
            .map_err(RepoError::from_persistence)?;

        if !tags.is_empty() {
            insert_tags(&mut tx, id, &tags).await?;
        }

        tx.commit().await.map_err(RepoError::from_persistence)?;

        let mut tags = tags;
        tags.sort();
        tags.dedup();

        Ok(NoteRecord {
            id,
            author_id,
            title,
            body_markdown,
            views,
            likes,
            tags,
            created_at,
            updated_at,
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<NoteRecord>, RepoError> {
        let mut qb = note_select();
        qb.push(" WHERE n.id = ");
        qb.push_bind(id);
        qb.push(" GROUP BY n.id ");

        let row = qb
            .build_query_as::<NoteRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        Ok(row.map(NoteRecord::from))
    }

    async fn list_by_author(
        &self,
        author_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<NoteRecord>, u64), RepoError> {
        let limit = i64::from(limit.clamp(1, 100));
        let offset = i64::from(page.max(1) - 1) * limit;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes WHERE author_id = $1")
            .bind(author_id)
            .fetch_one(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        let mut qb = note_select();
        qb.push(" WHERE n.author_id = ");
        qb.push_bind(author_id);
        qb.push(" GROUP BY n.id ORDER BY n.created_at DESC, n.id DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb
            .build_query_as::<NoteRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        let total = u64::try_from(total).unwrap_or(0);
        Ok((rows.into_iter().map(NoteRecord::from).collect(), total))
    }

    async fn search(
        &self,
        author_id: i64,
        query: &str,
        tags: &[String],
    ) -> Result<Vec<NoteRecord>, RepoError> {
        let mut qb = note_select();
        qb.push(" WHERE n.author_id = ");
        qb.push_bind(author_id);

        if !query.is_empty() {
            let pattern = format!("%{query}%");
            qb.push(" AND (n.title ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR n.body_markdown ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }

        if !tags.is_empty() {
            // All requested tags must be present on the note.
            qb.push(
                " AND (SELECT COUNT(DISTINCT nt.tag) FROM note_tags nt \
                 WHERE nt.note_id = n.id AND nt.tag = ANY(",
            );
            qb.push_bind(tags.to_vec());
            qb.push(")) = ");
            qb.push_bind(tags.len() as i64);
        }

        qb.push(" GROUP BY n.id ORDER BY n.created_at DESC, n.id DESC ");

        let rows = qb
            .build_query_as::<NoteRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        Ok(rows.into_iter().map(NoteRecord::from).collect())
    }

    async fn update_note(&self, params: UpdateNoteParams) -> Result<NoteRecord, RepoError> {
        let UpdateNoteParams {
            id,
            title,
            body_markdown,
        } = params;

        let result = sqlx::query(
            r#"
            UPDATE notes
            SET title = $2,
                body_markdown = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&title)
        .bind(&body_markdown)
        .execute(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        self.find_by_id(id).await?.ok_or(RepoError::NotFound)
    }

    async fn delete_note(&self, id: i64) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        Ok(())
    }

    async fn add_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        if tags.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin().await.map_err(RepoError::from_persistence)?;
        insert_tags(&mut tx, note_id, tags).await?;
        tx.commit().await.map_err(RepoError::from_persistence)?;

        Ok(())
    }

    async fn remove_tags(&self, note_id: i64, tags: &[String]) -> Result<(), RepoError> {
        if tags.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM note_tags WHERE note_id = $1 AND tag = ANY($2)")
            .bind(note_id)
            .bind(tags.to_vec())
            .execute(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        Ok(())
    }
}

#[async_trait]
impl CounterStore for PostgresRepositories {
    async fn apply_counter_deltas(
        &self,
        note_id: i64,
        views: i64,
        likes: i64,
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(RepoError::from_persistence)?;

        // Relative update: concurrent mutations to other columns and rows
        // are untouched, and retried deltas never overwrite absolute values.
        let result = sqlx::query(
            r#"
            UPDATE notes
            SET views = views + $2,
                likes = likes + $3
            WHERE id = $1
            "#,
        )
        .bind(note_id)
        .bind(views)
        .bind(likes)
        .execute(&mut *tx)
        .await
        .map_err(RepoError::from_persistence)?;

        tx.commit().await.map_err(RepoError::from_persistence)?;

        if result.rows_affected() == 0 {
            // The note was deleted after its counters were buffered; the
            // deltas have nowhere to go and are intentionally discarded.
            tracing::debug!(note_id, views, likes, "dropping deltas for deleted note");
        }

        Ok(())
    }
}

fn note_select() -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(NOTE_COLUMNS);
    qb.push(" FROM notes n LEFT JOIN note_tags t ON t.note_id = n.id ");
    qb
}

async fn insert_tags(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    note_id: i64,
    tags: &[String],
) -> Result<(), RepoError> {
    let mut qb = QueryBuilder::new("INSERT INTO note_tags (note_id, tag) ");
    qb.push_values(tags, |mut row, tag| {
        row.push_bind(note_id).push_bind(tag);
    });
    qb.push(" ON CONFLICT DO NOTHING ");

    qb.build()
        .execute(&mut **tx)
        .await
        .map_err(RepoError::from_persistence)?;

    Ok(())
}
