use crate::ImportMode;
use anyhow::anyhow;
use async_trait::async_trait;
use lazy_regex::regex;
use log_error::LogError;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tokio::time::sleep;

// 250 is the Admin API maximum page size.
const DEFAULT_PAGE_SIZE: usize = 250;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    std::env::var("SHOPIFY_PAGE_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0 && *v <= DEFAULT_PAGE_SIZE)
        .unwrap_or(DEFAULT_PAGE_SIZE)
});

static PAGE_DELAY_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SHOPIFY_PAGE_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(500)
});

#[derive(Debug, Deserialize)]
struct ProductsPage {
    products: Vec<SourceProduct>,
}

#[derive(Debug, Deserialize)]
struct MetafieldsPage {
    metafields: Vec<Metafield>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    #[default]
    Draft,
    Archived,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceProduct {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub product_type: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub images: Vec<SourceImage>,
    #[serde(default)]
    pub variants: Vec<SourceVariant>,
    #[serde(default)]
    pub options: Vec<SourceOption>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceImage {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub position: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceVariant {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub compare_at_price: Option<String>,
    #[serde(default)]
    pub option1: Option<String>,
    #[serde(default)]
    pub option2: Option<String>,
    #[serde(default)]
    pub option3: Option<String>,
}

impl SourceVariant {
    /// Option value by 1-based option position.
    pub fn option_slot(&self, position: usize) -> Option<&str> {
        match position {
            1 => self.option1.as_deref(),
            2 => self.option2.as_deref(),
            3 => self.option3.as_deref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceOption {
    pub name: String,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Metafield {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
    #[serde(default, deserialize_with = "de_value_string")]
    pub value: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Full filtered catalog. A non-success page aborts the whole fetch.
    async fn fetch_all(&self, mode: ImportMode) -> Result<Vec<SourceProduct>, anyhow::Error>;
    /// Per-product metafields; failures degrade to an empty list.
    async fn fetch_metafields(&self, product_id: i64) -> Vec<Metafield>;
}

#[derive(Clone)]
pub struct ShopifyClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ShopifyClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into().trim().to_string(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self, anyhow::Error> {
        let base_url: String = envmnt::get_parse("SHOPIFY_API_URL")
            .map_err(|_| anyhow!("SHOPIFY_API_URL not set"))?;
        let token: String = envmnt::get_parse("SHOPIFY_TOKEN")
            .map_err(|_| anyhow!("SHOPIFY_TOKEN not set"))?;
        Ok(Self::new(client, base_url, token))
    }

    async fn fetch_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<SourceProduct>, Option<String>), anyhow::Error> {
        let mut url = format!("{}/products.json?limit={}", self.base_url, *PAGE_SIZE);
        if let Some(cursor) = cursor {
            url.push_str(&format!("&page_info={cursor}"));
        }
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        let link = resp
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Catalog API {status}: {}", truncate_body(&text)));
        }
        let page: ProductsPage = serde_json::from_str(&text).map_err(|err| {
            anyhow!(
                "Catalog API decode error: {err}. Body: {}",
                truncate_body(&text)
            )
        })?;
        Ok((page.products, link.as_deref().and_then(next_cursor)))
    }

    async fn try_fetch_metafields(&self, product_id: i64) -> Result<Vec<Metafield>, anyhow::Error> {
        let url = format!("{}/products/{product_id}/metafields.json", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Metafields API {status}: {}", truncate_body(&text)));
        }
        let page: MetafieldsPage = serde_json::from_str(&text).map_err(|err| {
            anyhow!(
                "Metafields API decode error: {err}. Body: {}",
                truncate_body(&text)
            )
        })?;
        Ok(page.metafields)
    }
}

#[async_trait]
impl CatalogClient for ShopifyClient {
    async fn fetch_all(&self, mode: ImportMode) -> Result<Vec<SourceProduct>, anyhow::Error> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        let mut first = true;
        loop {
            if !first && *PAGE_DELAY_MS > 0 {
                sleep(std::time::Duration::from_millis(*PAGE_DELAY_MS)).await;
            }
            first = false;
            let (products, next) = self.fetch_page(cursor.as_deref()).await?;
            all.extend(products);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(filter_by_mode(all, mode))
    }

    async fn fetch_metafields(&self, product_id: i64) -> Vec<Metafield> {
        self.try_fetch_metafields(product_id)
            .await
            .log_error(&format!("Unable to load metafields for product {product_id}"))
            .unwrap_or_default()
    }
}

/// `Public` keeps active records only; `Draft` keeps everything else.
pub fn filter_by_mode(products: Vec<SourceProduct>, mode: ImportMode) -> Vec<SourceProduct> {
    products
        .into_iter()
        .filter(|p| match mode {
            ImportMode::Public => p.status == ProductStatus::Active,
            ImportMode::Draft => p.status != ProductStatus::Active,
        })
        .collect()
}

/// Next-page cursor from a `Link` response header, if any.
pub fn next_cursor(link: &str) -> Option<String> {
    let regex = regex!(r#"<[^>]*[?&]page_info=([^&>]+)[^>]*>\s*;\s*rel="next""#);
    regex.captures(link).map(|c| c[1].to_string())
}

fn truncate_body(text: &str) -> &str {
    crate::truncate_chars(text.trim(), 200)
}

fn de_value_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ValueRepr {
        Str(String),
        Int(i64),
        Num(f64),
        Bool(bool),
        Other(serde_json::Value),
    }
    Ok(match ValueRepr::deserialize(deserializer)? {
        ValueRepr::Str(s) => s,
        ValueRepr::Int(i) => i.to_string(),
        ValueRepr::Num(n) => n.to_string(),
        ValueRepr::Bool(b) => b.to_string(),
        ValueRepr::Other(v) => v.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_cursor_from_link_header() {
        let link = "<https://shop.myshopify.com/admin/api/2024-01/products.json?page_info=abc123&limit=250>; rel=\"next\"";
        assert_eq!(next_cursor(link), Some("abc123".to_string()));
    }

    #[test]
    fn ignores_previous_only_link_header() {
        let link = "<https://shop.myshopify.com/admin/api/2024-01/products.json?page_info=xyz&limit=250>; rel=\"previous\"";
        assert_eq!(next_cursor(link), None);
    }

    #[test]
    fn picks_next_among_multiple_relations() {
        let link = "<https://x/products.json?page_info=prev1&limit=250>; rel=\"previous\", <https://x/products.json?limit=250&page_info=next1>; rel=\"next\"";
        assert_eq!(next_cursor(link), Some("next1".to_string()));
    }

    #[test]
    fn public_mode_keeps_active_only() {
        let products = vec![
            SourceProduct {
                id: 1,
                status: ProductStatus::Active,
                ..SourceProduct::default()
            },
            SourceProduct {
                id: 2,
                status: ProductStatus::Draft,
                ..SourceProduct::default()
            },
            SourceProduct {
                id: 3,
                status: ProductStatus::Archived,
                ..SourceProduct::default()
            },
        ];
        let public = filter_by_mode(products.clone(), ImportMode::Public);
        assert_eq!(public.iter().map(|p| p.id).collect::<Vec<_>>(), [1]);
        let draft = filter_by_mode(products, ImportMode::Draft);
        assert_eq!(draft.iter().map(|p| p.id).collect::<Vec<_>>(), [2, 3]);
    }

    #[test]
    fn deserializes_non_string_metafield_values() {
        let raw = r#"{"namespace":"specs","key":"weight_kg","value":5,"type":"number_integer"}"#;
        let field: Metafield = serde_json::from_str(raw).expect("metafield");
        assert_eq!(field.value, "5");
        let raw = r#"{"key":"color","value":"Red"}"#;
        let field: Metafield = serde_json::from_str(raw).expect("metafield");
        assert_eq!(field.namespace, "");
        assert_eq!(field.value, "Red");
    }

    #[test]
    fn variant_option_slots_are_positional() {
        let variant = SourceVariant {
            option1: Some("10cm".to_string()),
            option2: Some("Red".to_string()),
            ..SourceVariant::default()
        };
        assert_eq!(variant.option_slot(1), Some("10cm"));
        assert_eq!(variant.option_slot(2), Some("Red"));
        assert_eq!(variant.option_slot(3), None);
        assert_eq!(variant.option_slot(4), None);
    }
}
