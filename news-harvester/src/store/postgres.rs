use crate::dedup::DELETE_DUPLICATES_SQL;
use crate::store::{category_plan, unmatched_counts, NewsStore};
use crate::summary::{is_safe_identifier, render_view_sql, SourceColumn};
use crate::types::{HarvesterError, IngestBatch, Result, Source, UnmatchedLabel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

// Keys for pg_advisory_xact_lock; the sweep and the summary step must not
// overlap with themselves across processes.
const SWEEP_LOCK_KEY: i64 = 0x6e65_7773_0001;
const SUMMARY_LOCK_KEY: i64 = 0x6e65_7773_0002;

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    pub fn get_db_pool(&self) -> &PgPool {
        &self.db
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Database schema is up to date");
        Ok(())
    }

    async fn lock(tx: &mut Transaction<'_, Postgres>, key: i64) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Returns the id of category `name`, creating it under `group` if absent.
    /// Runs on its own connection and commits at once, so no lock on the
    /// category row is held while a batch is written.
    async fn category_id(&self, name: &str, group: &str) -> Result<i64> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let created: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO categories (name, group_id)
            SELECT $1, id FROM category_groups WHERE name = $2
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(group)
        .fetch_optional(&self.db)
        .await?;

        debug!(category = name, group, "registered category");
        created.ok_or_else(|| HarvesterError::General(format!("unknown category group '{}'", group)))
    }
}

fn source_from_row(row: &PgRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
    })
}

fn checked_view(view: &str) -> Result<&str> {
    if is_safe_identifier(view) {
        Ok(view)
    } else {
        Err(HarvesterError::Config(format!("unsafe summary view name '{}'", view)))
    }
}

#[async_trait]
impl NewsStore for PgStore {
    async fn ensure_category_groups(&self, names: &[String]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for name in names {
            sqlx::query("INSERT INTO category_groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_source(&self, url: &str, name: &str) -> Result<Source> {
        let row = sqlx::query(
            r#"
            INSERT INTO sources (url, name)
            VALUES ($1, $2)
            ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url
            RETURNING id, url, name
            "#,
        )
        .bind(url)
        .bind(name)
        .fetch_one(&self.db)
        .await?;
        source_from_row(&row)
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT id, url, name FROM sources ORDER BY id")
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn watermark(&self, source_id: i64) -> Result<Option<DateTime<Utc>>> {
        let mark: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT max(published_at) FROM news_items WHERE source_id = $1")
                .bind(source_id)
                .fetch_one(&self.db)
                .await?;
        Ok(mark)
    }

    async fn commit_batch(&self, batch: &IngestBatch) -> Result<usize> {
        // Categories first, in name order and outside the item transaction: a
        // category left without items by a failed batch is harmless.
        let mut category_ids: HashMap<&str, i64> = HashMap::new();
        for (name, group) in category_plan(batch) {
            category_ids.insert(name, self.category_id(name, group).await?);
        }

        let mut tx = self.db.begin().await?;
        for item in &batch.items {
            let category_id = category_ids
                .get(item.category.as_str())
                .copied()
                .ok_or_else(|| HarvesterError::General(format!("category '{}' not resolved", item.category)))?;

            sqlx::query(
                r#"
                INSERT INTO news_items (published_at, title, link, description, source_id, category_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.published_at)
            .bind(&item.title)
            .bind(&item.link)
            .bind(&item.description)
            .bind(batch.source_id)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;
        }

        for (label, occurrences) in unmatched_counts(batch) {
            sqlx::query(
                r#"
                INSERT INTO unmatched_labels (label, occurrences)
                VALUES ($1, $2)
                ON CONFLICT (label) DO UPDATE
                SET occurrences = unmatched_labels.occurrences + EXCLUDED.occurrences, last_seen = NOW()
                "#,
            )
            .bind(label)
            .bind(occurrences)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.items.len())
    }

    async fn sweep_duplicates(&self) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        Self::lock(&mut tx, SWEEP_LOCK_KEY).await?;
        let removed = sqlx::query(DELETE_DUPLICATES_SQL)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }

    async fn summary_view_columns(&self, view: &str) -> Result<Option<Vec<String>>> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_matviews WHERE schemaname = current_schema() AND matviewname::text = $1)",
        )
        .bind(view)
        .fetch_one(&self.db)
        .await?;
        if !exists {
            return Ok(None);
        }

        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_attribute a
            JOIN pg_class t ON a.attrelid = t.oid
            JOIN pg_namespace s ON t.relnamespace = s.oid
            WHERE t.relname::text = $1
              AND s.nspname = current_schema()
              AND t.relkind = 'm'
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(view)
        .fetch_all(&self.db)
        .await?;
        Ok(Some(columns))
    }

    async fn rebuild_summary_view(&self, view: &str, columns: &[SourceColumn]) -> Result<()> {
        let view = checked_view(view)?;
        let staging = format!("{}_next", view);
        let create_sql = render_view_sql(&staging, columns);

        // DDL is transactional: if anything below fails the old view survives.
        let mut tx = self.db.begin().await?;
        Self::lock(&mut tx, SUMMARY_LOCK_KEY).await?;
        sqlx::query(&format!("DROP MATERIALIZED VIEW IF EXISTS {}", staging))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create_sql).execute(&mut *tx).await?;
        sqlx::query(&format!("DROP MATERIALIZED VIEW IF EXISTS {}", view))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("ALTER MATERIALIZED VIEW {} RENAME TO {}", staging, view))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn refresh_summary_view(&self, view: &str) -> Result<()> {
        let view = checked_view(view)?;
        let mut tx = self.db.begin().await?;
        Self::lock(&mut tx, SUMMARY_LOCK_KEY).await?;
        sqlx::query(&format!("REFRESH MATERIALIZED VIEW {}", view))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn unmatched_labels(&self) -> Result<Vec<UnmatchedLabel>> {
        let rows = sqlx::query(
            "SELECT label, occurrences, first_seen, last_seen FROM unmatched_labels ORDER BY occurrences DESC, label",
        )
        .fetch_all(&self.db)
        .await?;

        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            labels.push(UnmatchedLabel {
                label: row.try_get("label")?,
                occurrences: row.try_get("occurrences")?,
                first_seen: row.try_get("first_seen")?,
                last_seen: row.try_get("last_seen")?,
            });
        }
        Ok(labels)
    }

    async fn count_items(&self, source_id: Option<i64>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM news_items WHERE $1::BIGINT IS NULL OR source_id = $1",
        )
        .bind(source_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }
}
