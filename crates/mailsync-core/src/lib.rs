//! Persisted mail records and the relational store they are imported into.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

mod error;

pub use error::{Error, Result};

/// Rows per INSERT statement; 11 binds per row keeps us under SQLite's 999 bind limit.
const INSERT_CHUNK_ROWS: usize = 80;

/// A message imported into the store.
///
/// Rows are written once by the sync engine and never updated afterwards, so
/// flag changes made on the server later are not reflected here.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
    pub body: String,
    pub mailbox: String,
    pub account: String,
    pub tags: String,
    pub is_read: bool,
}

/// Connection settings for the store.
#[derive(Clone, Default)]
pub struct StoreConfig {
    pub driver: String,
    pub user: String,
    pub pass: String,
    /// Database name; for sqlite this is the file path.
    pub name: String,
    pub host: String,
    pub port: String,
    /// Extra URL parameters, appended as the query string.
    pub params: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("driver", &self.driver)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("params", &self.params)
            .finish()
    }
}

impl StoreConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: "sqlite".to_string(),
            name: path.into(),
            ..Self::default()
        }
    }

    /// Builds the connection URL for the configured driver.
    pub fn url(&self) -> Result<String> {
        match self.driver.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => {
                let name = self.name.trim();
                if name.is_empty() {
                    return Err(Error::Config("store name (database path) is empty".to_string()));
                }
                let mut url = if name.starts_with("sqlite:") {
                    name.to_string()
                } else {
                    format!("sqlite:{}", name)
                };
                let params = self.params.trim().trim_start_matches('?');
                if !params.is_empty() {
                    url.push('?');
                    url.push_str(params);
                }
                Ok(url)
            }
            other => Err(Error::Config(format!(
                "unsupported store driver {:?}, only sqlite is available",
                other
            ))),
        }
    }
}

/// The store side of a sync: a watermark query and a bulk write.
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Latest `sent_at` already imported for this mailbox and account, if any.
    async fn max_sent_date(&self, mailbox: &str, account: &str)
    -> Result<Option<DateTime<Utc>>>;

    /// Writes every record or none of them.
    async fn bulk_insert(&self, records: &[Email]) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteEmailStore {
    pool: SqlitePool,
}

impl SqliteEmailStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config.url()?;
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    pub async fn emails_for(&self, mailbox: &str, account: &str) -> Result<Vec<Email>> {
        let rows = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                String,
                String,
                i64,
                String,
                String,
                String,
                String,
                bool,
            ),
        >(
            "SELECT id, from_addr, to_addr, cc, subject, sent_ts, body, mailbox, account, tags, is_read
             FROM emails WHERE mailbox = ? AND account = ? ORDER BY sent_ts ASC",
        )
        .bind(mailbox)
        .bind(account)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, from, to, cc, subject, sent_ts, body, mailbox, account, tags, is_read)|
                 -> Result<Email> {
                    let id = Uuid::parse_str(&id)
                        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
                    let sent_at = decode_sent_ts(sent_ts)?;
                    Ok(Email {
                        id,
                        from,
                        to,
                        cc,
                        subject,
                        sent_at,
                        body,
                        mailbox,
                        account,
                        tags,
                        is_read,
                    })
                },
            )
            .collect()
    }

    pub async fn count_for(&self, mailbox: &str, account: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM emails WHERE mailbox = ? AND account = ?",
        )
        .bind(mailbox)
        .bind(account)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

fn decode_sent_ts(ts: i64) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| sqlx::Error::Decode(format!("sent_ts {} out of range", ts).into()))
}

#[async_trait]
impl EmailStore for SqliteEmailStore {
    async fn max_sent_date(
        &self,
        mailbox: &str,
        account: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, (Option<i64>,)>(
            "SELECT MAX(sent_ts) FROM emails WHERE mailbox = ? AND account = ?",
        )
        .bind(mailbox)
        .bind(account)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.map(decode_sent_ts).transpose()?)
    }

    async fn bulk_insert(&self, records: &[Email]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO emails (id, from_addr, to_addr, cc, subject, sent_ts, body, mailbox, account, tags, is_read) ",
            );
            builder.push_values(chunk, |mut row, email| {
                row.push_bind(email.id.to_string())
                    .push_bind(email.from.as_str())
                    .push_bind(email.to.as_str())
                    .push_bind(email.cc.as_str())
                    .push_bind(email.subject.as_str())
                    .push_bind(email.sent_at.timestamp())
                    .push_bind(email.body.as_str())
                    .push_bind(email.mailbox.as_str())
                    .push_bind(email.account.as_str())
                    .push_bind(email.tags.as_str())
                    .push_bind(email.is_read);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(rows = records.len(), "bulk insert committed");
        Ok(())
    }
}
