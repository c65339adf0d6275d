//! Upsert writer: persists a deduplicated batch keyed by job uid.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;
use vagas_core::{EmploymentType, JobPosting, JobUid, Source, StoredPosting};

/// Postgres caps bind parameters at 65535; eleven columns per row.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS job_postings (
    id BIGSERIAL PRIMARY KEY,
    uid TEXT NOT NULL,
    source TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    company TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL,
    canonical_link TEXT NOT NULL,
    employment_type TEXT NOT NULL DEFAULT 'unknown',
    date_posted TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_UID_INDEX_SQL: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS job_postings_uid_key ON job_postings (uid)";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store write exceeded {0:?}")]
    Timeout(Duration),
    #[error("batch contains uid {0} more than once")]
    DuplicateUid(String),
    #[error("stored row is invalid: {0}")]
    InvalidRow(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub written: usize,
    pub inserted: usize,
    pub updated: usize,
}

#[async_trait]
pub trait PostingStore: Send + Sync {
    /// Idempotently creates the table and the unique index on `uid`.
    async fn ensure_schema(&self) -> Result<(), PersistenceError>;

    /// Inserts new uids and overwrites every field but `uid` and `created_at` on
    /// existing ones. The whole batch commits or none of it does.
    async fn upsert(&self, postings: &[JobPosting]) -> Result<UpsertReport, PersistenceError>;

    async fn count(&self) -> Result<u64, PersistenceError>;

    async fn load(&self, uid: &JobUid) -> Result<Option<StoredPosting>, PersistenceError>;
}

fn reject_duplicate_uids(postings: &[JobPosting]) -> Result<(), PersistenceError> {
    let mut seen = HashSet::with_capacity(postings.len());
    for posting in postings {
        if !seen.insert(posting.uid.as_str()) {
            return Err(PersistenceError::DuplicateUid(posting.uid.to_string()));
        }
    }
    Ok(())
}

/// Timestamp for a touched row, strictly after the previous one even when the
/// clock has not advanced past it.
fn next_updated_at(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + chrono::Duration::microseconds(1);
    now.max(floor)
}

pub struct PgPostingStore {
    pool: PgPool,
    write_timeout: Duration,
    schema_ready: OnceCell<()>,
}

impl PgPostingStore {
    pub fn new(pool: PgPool, write_timeout: Duration) -> Self {
        Self {
            pool,
            write_timeout,
            schema_ready: OnceCell::new(),
        }
    }

    pub async fn connect(database_url: &str, write_timeout: Duration) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(write_timeout)
            .connect_lazy(database_url)?;
        Ok(Self::new(pool, write_timeout))
    }

    async fn write_batch(&self, postings: &[JobPosting]) -> Result<UpsertReport, PersistenceError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut report = UpsertReport::default();

        for chunk in postings.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO job_postings (uid, source, title, company, location, link, \
                 canonical_link, employment_type, date_posted, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut row, posting| {
                row.push_bind(posting.uid.as_str())
                    .push_bind(posting.source.as_str())
                    .push_bind(posting.title.as_str())
                    .push_bind(posting.company.as_str())
                    .push_bind(posting.location.as_str())
                    .push_bind(posting.raw_link.as_str())
                    .push_bind(posting.canonical_link.as_str())
                    .push_bind(posting.employment_type.as_str())
                    .push_bind(posting.date_posted.as_str())
                    .push_bind(now)
                    .push_bind(now);
            });
            qb.push(
                r#"
                ON CONFLICT (uid) DO UPDATE SET
                    source = EXCLUDED.source,
                    title = EXCLUDED.title,
                    company = EXCLUDED.company,
                    location = EXCLUDED.location,
                    link = EXCLUDED.link,
                    canonical_link = EXCLUDED.canonical_link,
                    employment_type = EXCLUDED.employment_type,
                    date_posted = EXCLUDED.date_posted,
                    updated_at = GREATEST(EXCLUDED.updated_at, job_postings.updated_at + INTERVAL '1 microsecond')
                RETURNING (xmax = 0) AS inserted
                "#,
            );

            let rows = qb.build().fetch_all(&mut *tx).await?;
            for row in rows {
                let inserted: bool = row.try_get("inserted")?;
                if inserted {
                    report.inserted += 1;
                } else {
                    report.updated += 1;
                }
            }
        }

        tx.commit().await?;
        report.written = report.inserted + report.updated;
        Ok(report)
    }
}

fn stored_from_row(row: &PgRow) -> Result<StoredPosting, PersistenceError> {
    let uid: String = row.try_get("uid")?;
    let uid = JobUid::try_from(uid).map_err(|e| PersistenceError::InvalidRow(e.to_string()))?;
    let employment: String = row.try_get("employment_type")?;
    Ok(StoredPosting {
        posting: JobPosting {
            uid,
            source: Source::parse(&row.try_get::<String, _>("source")?),
            title: row.try_get("title")?,
            company: row.try_get("company")?,
            location: row.try_get("location")?,
            raw_link: row.try_get("link")?,
            canonical_link: row.try_get("canonical_link")?,
            employment_type: EmploymentType::from_label(&employment).unwrap_or_default(),
            date_posted: row.try_get("date_posted")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PostingStore for PgPostingStore {
    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
                sqlx::query(CREATE_UID_INDEX_SQL).execute(&self.pool).await?;
                info!("job_postings schema ready");
                Ok::<(), PersistenceError>(())
            })
            .await?;
        Ok(())
    }

    async fn upsert(&self, postings: &[JobPosting]) -> Result<UpsertReport, PersistenceError> {
        reject_duplicate_uids(postings)?;
        self.ensure_schema().await?;
        if postings.is_empty() {
            return Ok(UpsertReport::default());
        }
        tokio::time::timeout(self.write_timeout, self.write_batch(postings))
            .await
            .map_err(|_| PersistenceError::Timeout(self.write_timeout))?
    }

    async fn count(&self) -> Result<u64, PersistenceError> {
        self.ensure_schema().await?;
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_postings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.max(0) as u64)
    }

    async fn load(&self, uid: &JobUid) -> Result<Option<StoredPosting>, PersistenceError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            SELECT uid, source, title, company, location, link, canonical_link,
                   employment_type, date_posted, created_at, updated_at
              FROM job_postings
             WHERE uid = $1
            "#,
        )
        .bind(uid.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(stored_from_row).transpose()
    }
}

/// Process-local store with the same upsert contract, used for dry runs and
/// tests.
#[derive(Debug, Default)]
pub struct MemoryPostingStore {
    rows: Mutex<BTreeMap<JobUid, StoredPosting>>,
    fail_writes: AtomicBool,
}

impl MemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `upsert` fail until switched back off.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_writes.store(unavailable, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<StoredPosting> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl PostingStore for MemoryPostingStore {
    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn upsert(&self, postings: &[JobPosting]) -> Result<UpsertReport, PersistenceError> {
        reject_duplicate_uids(postings)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store marked unavailable".into()));
        }

        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut report = UpsertReport::default();
        for posting in postings {
            match rows.get_mut(&posting.uid) {
                Some(existing) => {
                    existing.posting = posting.clone();
                    existing.updated_at = next_updated_at(now, existing.updated_at);
                    report.updated += 1;
                }
                None => {
                    rows.insert(
                        posting.uid.clone(),
                        StoredPosting {
                            posting: posting.clone(),
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    report.inserted += 1;
                }
            }
        }
        report.written = report.inserted + report.updated;
        Ok(report)
    }

    async fn count(&self) -> Result<u64, PersistenceError> {
        Ok(self.rows.lock().await.len() as u64)
    }

    async fn load(&self, uid: &JobUid) -> Result<Option<StoredPosting>, PersistenceError> {
        Ok(self.rows.lock().await.get(uid).cloned())
    }
}
