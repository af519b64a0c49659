use async_trait::async_trait;
use rusqlite::params;
use rusqlite::types::Type;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;

/// Product family keyed by its source category name. `spec_groups` is
/// ordered-unique and grows across imports; the cover image is set once.
#[derive(Clone, Debug, Id)]
#[Id(ref_id, get_id)]
pub struct ProductFamily {
    #[id]
    pub title: String,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub active: bool,
    pub spec_groups: Vec<String>,
    pub created_time: OffsetDateTime,
    pub edited_time: OffsetDateTime,
}

pub trait ProductFamilyRepository:
    Repository<ProductFamily, Error = anyhow::Error>
    + Save<ProductFamily>
    + Get<ProductFamily>
    + List<ProductFamily>
    + Send
    + Sync
{
}

/// Create the family on first sight, otherwise merge in new group names.
/// An existing family's cover image and description are never overwritten.
pub async fn register(
    repo: &dyn ProductFamilyRepository,
    title: &str,
    cover_image: Option<&str>,
    group_names: &[String],
) -> Result<(), anyhow::Error> {
    match repo.get_one(&title.to_string()).await? {
        Some(mut family) => {
            let merged = crate::merge_unique(&family.spec_groups, group_names);
            if merged.len() > family.spec_groups.len() {
                family.spec_groups = merged;
                family.edited_time = OffsetDateTime::now_utc();
                repo.save(family).await?;
            }
        }
        None => {
            let now = OffsetDateTime::now_utc();
            repo.save(ProductFamily {
                title: title.to_string(),
                description: None,
                cover_image: cover_image.map(ToString::to_string),
                active: true,
                spec_groups: crate::merge_unique(&[], group_names),
                created_time: now,
                edited_time: now,
            })
            .await?;
        }
    }
    Ok(())
}

pub struct SqliteProductFamilyRepository {
    conn: Connection,
}

impl SqliteProductFamilyRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_family (
                    title TEXT PRIMARY KEY,
                    description TEXT,
                    cover_image TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    spec_groups TEXT NOT NULL DEFAULT '[]',
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

fn row_to_family(row: &rusqlite::Row<'_>) -> Result<ProductFamily, rusqlite::Error> {
    let spec_groups: Vec<String> = serde_json::from_str(row.get::<_, String>(4)?.as_str())
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, err.into()))?;
    Ok(ProductFamily {
        title: row.get(0)?,
        description: row.get(1)?,
        cover_image: row.get(2)?,
        active: row.get(3)?,
        spec_groups,
        created_time: row.get(5)?,
        edited_time: row.get(6)?,
    })
}

impl Repository<ProductFamily> for SqliteProductFamilyRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<ProductFamily> for SqliteProductFamilyRepository {
    async fn get_one(
        &self,
        title: &IdentityOf<ProductFamily>,
    ) -> Result<Option<ProductFamily>, Self::Error> {
        let title = title.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT title, description, cover_image, active, spec_groups, created_time, edited_time
                     FROM product_family WHERE title = ?1",
                )?;
                let mut rows = stmt.query([title])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_family(row)?)),
                    None => Ok(None),
                }
            })
            .await?)
    }
}

#[async_trait]
impl List<ProductFamily> for SqliteProductFamilyRepository {
    async fn list(&self) -> Result<Vec<ProductFamily>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT title, description, cover_image, active, spec_groups, created_time, edited_time
                     FROM product_family ORDER BY title",
                )?;
                let items = stmt
                    .query_map([], row_to_family)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

#[async_trait]
impl Save<ProductFamily> for SqliteProductFamilyRepository {
    async fn save(&self, f: ProductFamily) -> Result<(), Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let spec_groups = serde_json::to_string(&f.spec_groups)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                conn.execute(
                    "INSERT INTO product_family (title, description, cover_image, active, spec_groups, created_time, edited_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(title) DO UPDATE SET description=?2, cover_image=?3, active=?4, spec_groups=?5, edited_time=?7",
                    params![
                        f.title,
                        f.description,
                        f.cover_image,
                        f.active,
                        spec_groups,
                        f.created_time,
                        f.edited_time,
                    ],
                )?;
                Ok(())
            })
            .await?)
    }
}

impl ProductFamilyRepository for SqliteProductFamilyRepository {}
