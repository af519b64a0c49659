use async_trait::async_trait;
use rusqlite::params;
use rusqlite::types::Type;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;

/// Named group of spec labels, shared across the whole catalog.
/// `labels` is ordered-unique and only ever grows.
#[derive(Clone, Debug, Id)]
#[Id(ref_id, get_id)]
pub struct SpecGroup {
    #[id]
    pub name: String,
    pub labels: Vec<String>,
    pub active: bool,
    pub created_time: OffsetDateTime,
    pub edited_time: OffsetDateTime,
}

impl SpecGroup {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.into(),
            labels: crate::merge_unique(&[], &labels),
            active: true,
            created_time: now,
            edited_time: now,
        }
    }
}

pub trait SpecGroupRepository:
    Repository<SpecGroup, Error = anyhow::Error>
    + Save<SpecGroup>
    + Get<SpecGroup>
    + List<SpecGroup>
    + Send
    + Sync
{
}

/// Read-merge-write: manual edits to other fields survive, the label set
/// only grows. Saves (and bumps `edited_time`) only when labels were added.
pub async fn upsert_labels(
    repo: &dyn SpecGroupRepository,
    name: &str,
    labels: &[String],
) -> Result<(), anyhow::Error> {
    match repo.get_one(&name.to_string()).await? {
        Some(mut group) => {
            let merged = crate::merge_unique(&group.labels, labels);
            if merged.len() > group.labels.len() {
                group.labels = merged;
                group.edited_time = OffsetDateTime::now_utc();
                repo.save(group).await?;
            }
        }
        None => {
            repo.save(SpecGroup::new(name, labels.to_vec())).await?;
        }
    }
    Ok(())
}

pub struct SqliteSpecGroupRepository {
    conn: Connection,
}

impl SqliteSpecGroupRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS spec_group (
                    name TEXT PRIMARY KEY,
                    labels TEXT NOT NULL DEFAULT '[]',
                    active INTEGER NOT NULL DEFAULT 1,
                    created_time TEXT NOT NULL,
                    edited_time TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> Result<SpecGroup, rusqlite::Error> {
    let labels: Vec<String> = serde_json::from_str(row.get::<_, String>(1)?.as_str())
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, err.into()))?;
    Ok(SpecGroup {
        name: row.get(0)?,
        labels,
        active: row.get(2)?,
        created_time: row.get(3)?,
        edited_time: row.get(4)?,
    })
}

impl Repository<SpecGroup> for SqliteSpecGroupRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<SpecGroup> for SqliteSpecGroupRepository {
    async fn get_one(&self, name: &IdentityOf<SpecGroup>) -> Result<Option<SpecGroup>, Self::Error> {
        let name = name.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, labels, active, created_time, edited_time
                     FROM spec_group WHERE name = ?1",
                )?;
                let mut rows = stmt.query([name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_group(row)?)),
                    None => Ok(None),
                }
            })
            .await?)
    }
}

#[async_trait]
impl List<SpecGroup> for SqliteSpecGroupRepository {
    async fn list(&self) -> Result<Vec<SpecGroup>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, labels, active, created_time, edited_time
                     FROM spec_group ORDER BY name",
                )?;
                let items = stmt
                    .query_map([], row_to_group)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

#[async_trait]
impl Save<SpecGroup> for SqliteSpecGroupRepository {
    async fn save(&self, g: SpecGroup) -> Result<(), Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let labels = serde_json::to_string(&g.labels)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                conn.execute(
                    "INSERT INTO spec_group (name, labels, active, created_time, edited_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(name) DO UPDATE SET labels=?2, active=?3, edited_time=?5",
                    params![g.name, labels, g.active, g.created_time, g.edited_time],
                )?;
                Ok(())
            })
            .await?)
    }
}

impl SpecGroupRepository for SqliteSpecGroupRepository {}
