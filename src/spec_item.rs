use async_trait::async_trait;
use rusqlite::params;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;

/// A spec label that arrived without a group of its own.
#[derive(Clone, Debug, Id)]
#[Id(ref_id, get_id)]
pub struct StandaloneSpecItem {
    #[id]
    pub label: String,
    pub created_time: OffsetDateTime,
}

impl StandaloneSpecItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            created_time: OffsetDateTime::now_utc(),
        }
    }
}

pub trait StandaloneSpecItemRepository:
    Repository<StandaloneSpecItem, Error = anyhow::Error>
    + Save<StandaloneSpecItem>
    + Get<StandaloneSpecItem>
    + List<StandaloneSpecItem>
    + Send
    + Sync
{
}

/// Create-if-absent; an existing label is left untouched.
pub async fn upsert_label(
    repo: &dyn StandaloneSpecItemRepository,
    label: &str,
) -> Result<(), anyhow::Error> {
    if repo.get_one(&label.to_string()).await?.is_none() {
        repo.save(StandaloneSpecItem::new(label)).await?;
    }
    Ok(())
}

pub struct SqliteStandaloneSpecItemRepository {
    conn: Connection,
}

impl SqliteStandaloneSpecItemRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS standalone_spec_item (
                    label TEXT PRIMARY KEY,
                    created_time TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl Repository<StandaloneSpecItem> for SqliteStandaloneSpecItemRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<StandaloneSpecItem> for SqliteStandaloneSpecItemRepository {
    async fn get_one(
        &self,
        label: &IdentityOf<StandaloneSpecItem>,
    ) -> Result<Option<StandaloneSpecItem>, Self::Error> {
        let label = label.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT label, created_time FROM standalone_spec_item WHERE label = ?1",
                )?;
                let mut rows = stmt.query([label])?;
                match rows.next()? {
                    Some(row) => Ok(Some(StandaloneSpecItem {
                        label: row.get(0)?,
                        created_time: row.get(1)?,
                    })),
                    None => Ok(None),
                }
            })
            .await?)
    }
}

#[async_trait]
impl List<StandaloneSpecItem> for SqliteStandaloneSpecItemRepository {
    async fn list(&self) -> Result<Vec<StandaloneSpecItem>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT label, created_time FROM standalone_spec_item ORDER BY label")?;
                let items = stmt
                    .query_map([], |row| {
                        Ok(StandaloneSpecItem {
                            label: row.get(0)?,
                            created_time: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

#[async_trait]
impl Save<StandaloneSpecItem> for SqliteStandaloneSpecItemRepository {
    async fn save(&self, item: StandaloneSpecItem) -> Result<(), Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO standalone_spec_item (label, created_time)
                     VALUES (?1, ?2)
                     ON CONFLICT(label) DO NOTHING",
                    params![item.label, item.created_time],
                )?;
                Ok(())
            })
            .await?)
    }
}

impl StandaloneSpecItemRepository for SqliteStandaloneSpecItemRepository {}
