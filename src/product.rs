use crate::{ImportMode, SupplierCode};
use async_trait::async_trait;
use rusqlite::params;
use rusqlite::types::Type;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, GetBy, List, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecAttribute {
    pub name: String,
    pub value: String,
}

/// One resolved group with its attributes, in first-seen order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalSpecGroup {
    pub group: String,
    pub attributes: Vec<SpecAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoMeta {
    pub title: String,
    pub description: String,
    pub canonical: Option<String>,
    pub og_image: Option<String>,
    pub robots: String,
    pub refreshed_time: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Draft,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Draft => "draft",
            Visibility::Public => "public",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "public" => Visibility::Public,
            _ => Visibility::Draft,
        }
    }
}

impl From<ImportMode> for Visibility {
    fn from(mode: ImportMode) -> Self {
        match mode {
            ImportMode::Draft => Visibility::Draft,
            ImportMode::Public => Visibility::Public,
        }
    }
}

#[derive(Clone, Debug, Id)]
#[Id(ref_id, get_id)]
pub struct NormalizedProduct {
    #[id]
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub short_description: String,
    pub slug: String,
    pub item_code: String,
    #[id_by]
    pub supplier_code: SupplierCode,
    pub regular_price: Decimal,
    pub sale_price: Decimal,
    pub technical_specs: Vec<TechnicalSpecGroup>,
    pub main_image: Option<String>,
    pub alt_image: Option<String>,
    pub gallery: Vec<String>,
    pub qr_code: Option<String>,
    pub family: Option<String>,
    pub brand: Option<String>,
    pub applications: Vec<String>,
    pub sales_channels: Vec<String>,
    pub visibility: Visibility,
    pub seo: SeoMeta,
    pub source: String,
    pub source_id: i64,
    pub created_time: OffsetDateTime,
}

pub trait NormalizedProductRepository:
    Repository<NormalizedProduct, Error = anyhow::Error>
    + Save<NormalizedProduct>
    + Get<NormalizedProduct>
    + GetBy<NormalizedProduct, SupplierCode>
    + List<NormalizedProduct>
    + Send
    + Sync
{
}

pub struct SqliteNormalizedProductRepository {
    conn: Connection,
}

impl SqliteNormalizedProductRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS normalized_product (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    short_description TEXT NOT NULL DEFAULT '',
                    slug TEXT NOT NULL,
                    item_code TEXT NOT NULL,
                    supplier_code TEXT NOT NULL UNIQUE,
                    regular_price TEXT NOT NULL,
                    sale_price TEXT NOT NULL,
                    technical_specs TEXT NOT NULL DEFAULT '[]',
                    main_image TEXT,
                    alt_image TEXT,
                    gallery TEXT NOT NULL DEFAULT '[]',
                    qr_code TEXT,
                    family TEXT,
                    brand TEXT,
                    applications TEXT NOT NULL DEFAULT '[]',
                    sales_channels TEXT NOT NULL DEFAULT '[]',
                    visibility TEXT NOT NULL DEFAULT 'draft',
                    seo TEXT NOT NULL DEFAULT '{}',
                    source TEXT NOT NULL,
                    source_id INTEGER NOT NULL,
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

const SELECT_COLUMNS: &str = "id, name, description, short_description, slug, item_code, \
    supplier_code, regular_price, sale_price, technical_specs, main_image, alt_image, gallery, \
    qr_code, family, brand, applications, sales_channels, visibility, seo, source, source_id, \
    created_time";

fn json_col<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(row.get::<_, String>(idx)?.as_str())
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

fn decimal_col(row: &rusqlite::Row<'_>, idx: usize) -> Result<Decimal, rusqlite::Error> {
    row.get::<_, String>(idx)?
        .parse::<Decimal>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

fn row_to_product(row: &rusqlite::Row<'_>) -> Result<NormalizedProduct, rusqlite::Error> {
    Ok(NormalizedProduct {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        short_description: row.get(3)?,
        slug: row.get(4)?,
        item_code: row.get(5)?,
        supplier_code: SupplierCode(row.get(6)?),
        regular_price: decimal_col(row, 7)?,
        sale_price: decimal_col(row, 8)?,
        technical_specs: json_col(row, 9)?,
        main_image: row.get(10)?,
        alt_image: row.get(11)?,
        gallery: json_col(row, 12)?,
        qr_code: row.get(13)?,
        family: row.get(14)?,
        brand: row.get(15)?,
        applications: json_col(row, 16)?,
        sales_channels: json_col(row, 17)?,
        visibility: Visibility::from_str(row.get::<_, String>(18)?.as_str()),
        seo: json_col(row, 19)?,
        source: row.get(20)?,
        source_id: row.get(21)?,
        created_time: row.get(22)?,
    })
}

impl Repository<NormalizedProduct> for SqliteNormalizedProductRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<NormalizedProduct> for SqliteNormalizedProductRepository {
    async fn save(&self, p: NormalizedProduct) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                let technical_specs = serde_json::to_string(&p.technical_specs)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                let gallery = serde_json::to_string(&p.gallery)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                let applications = serde_json::to_string(&p.applications)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                let sales_channels = serde_json::to_string(&p.sales_channels)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                let seo = serde_json::to_string(&p.seo)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(err.into()))?;
                conn.execute(
                    "INSERT OR REPLACE INTO normalized_product
                    (id, name, description, short_description, slug, item_code, supplier_code,
                     regular_price, sale_price, technical_specs, main_image, alt_image, gallery,
                     qr_code, family, brand, applications, sales_channels, visibility, seo,
                     source, source_id, created_time)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                            ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                    params![
                        p.id,
                        p.name,
                        p.description,
                        p.short_description,
                        p.slug,
                        p.item_code,
                        p.supplier_code.0,
                        p.regular_price.to_string(),
                        p.sale_price.to_string(),
                        technical_specs,
                        p.main_image,
                        p.alt_image,
                        gallery,
                        p.qr_code,
                        p.family,
                        p.brand,
                        applications,
                        sales_channels,
                        p.visibility.as_str(),
                        seo,
                        p.source,
                        p.source_id,
                        p.created_time,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<NormalizedProduct> for SqliteNormalizedProductRepository {
    async fn get_one(
        &self,
        id: &IdentityOf<NormalizedProduct>,
    ) -> Result<Option<NormalizedProduct>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM normalized_product WHERE id = ?1"
                ))?;
                let mut p = stmt
                    .query_map([id], row_to_product)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p.pop())
            })
            .await?)
    }
}

#[async_trait]
impl GetBy<NormalizedProduct, SupplierCode> for SqliteNormalizedProductRepository {
    async fn get_by(&self, code: &SupplierCode) -> Result<Option<NormalizedProduct>, Self::Error> {
        let code = code.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM normalized_product WHERE supplier_code = ?1"
                ))?;
                let mut p = stmt
                    .query_map([code.0], row_to_product)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p.pop())
            })
            .await?)
    }
}

#[async_trait]
impl List<NormalizedProduct> for SqliteNormalizedProductRepository {
    async fn list(&self) -> Result<Vec<NormalizedProduct>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM normalized_product ORDER BY name"
                ))?;
                let items = stmt
                    .query_map([], row_to_product)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

impl NormalizedProductRepository for SqliteNormalizedProductRepository {}
