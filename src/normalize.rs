use crate::product::{NormalizedProduct, SeoMeta};
use crate::product_family::{self, ProductFamilyRepository};
use crate::rehost::AssetStore;
use crate::shopify::{CatalogClient, SourceProduct, SourceVariant};
use crate::spec_group::SpecGroupRepository;
use crate::spec_item::StandaloneSpecItemRepository;
use crate::{slugify, specs, strip_html, truncate_chars, ImportMode, SupplierCode};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

const SHORT_DESCRIPTION_CHARS: usize = 160;
const SOURCE_NAME: &str = "shopify";

/// Regular price is the higher of price and compare-at; a zero sale price
/// means the item is not discounted.
pub fn compute_prices(variant: Option<&SourceVariant>) -> (Decimal, Decimal) {
    let price = variant
        .and_then(|v| v.price.as_deref())
        .and_then(|p| p.trim().parse::<Decimal>().ok())
        .unwrap_or_default();
    let compare = variant
        .and_then(|v| v.compare_at_price.as_deref())
        .and_then(|p| p.trim().parse::<Decimal>().ok())
        .unwrap_or_default();
    if compare > price {
        (compare, price)
    } else {
        (price, Decimal::ZERO)
    }
}

/// Item code from the first variant's SKU, the source id as the fallback.
pub fn item_code(product: &SourceProduct) -> String {
    product
        .variants
        .first()
        .and_then(|v| v.sku.as_deref())
        .map(str::trim)
        .filter(|sku| !sku.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| product.id.to_string())
}

pub async fn normalize(
    product: &SourceProduct,
    mode: ImportMode,
    catalog: &dyn CatalogClient,
    assets: &dyn AssetStore,
    groups: &dyn SpecGroupRepository,
    items: &dyn StandaloneSpecItemRepository,
    families: &dyn ProductFamilyRepository,
) -> Result<NormalizedProduct, anyhow::Error> {
    let metafields = catalog.fetch_metafields(product.id).await;
    let raw = specs::extract(product, &metafields);
    let resolved = specs::resolve(&raw, groups, items).await?;

    let mut images = product.images.clone();
    images.sort_by_key(|img| img.position);
    let sources = images
        .into_iter()
        .map(|img| img.src)
        .filter(|src| !src.trim().is_empty())
        .collect::<Vec<_>>();
    let mut hosted = assets.rehost_many(&sources).await;
    let main_image = (!hosted.is_empty()).then(|| hosted.remove(0));
    let alt_image = (!hosted.is_empty()).then(|| hosted.remove(0));
    let gallery = hosted;

    let family_title = product.product_type.trim();
    let family = if family_title.is_empty() {
        None
    } else {
        product_family::register(
            families,
            family_title,
            main_image.as_deref(),
            &resolved.group_names,
        )
        .await?;
        Some(family_title.to_string())
    };

    let (regular_price, sale_price) = compute_prices(product.variants.first());
    let code = item_code(product);
    let handle = product.handle.trim();
    let slug = if handle.is_empty() {
        slugify(&product.title)
    } else {
        slugify(handle)
    };
    let description = product
        .body_html
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .map(ToString::to_string);
    let short_description = description
        .as_deref()
        .map(|body| truncate_chars(&strip_html(body), SHORT_DESCRIPTION_CHARS).to_string())
        .unwrap_or_default();
    let applications = product
        .tags
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let brand = {
        let vendor = product.vendor.trim();
        (!vendor.is_empty()).then(|| vendor.to_string())
    };
    let now = OffsetDateTime::now_utc();

    Ok(NormalizedProduct {
        id: Uuid::new_v4(),
        name: product.title.trim().to_string(),
        description,
        short_description: short_description.clone(),
        slug,
        item_code: code.clone(),
        supplier_code: SupplierCode(code),
        regular_price,
        sale_price,
        technical_specs: resolved.technical_specs,
        main_image: main_image.clone(),
        alt_image,
        gallery,
        qr_code: None,
        family,
        brand,
        applications,
        sales_channels: Vec::new(),
        visibility: mode.into(),
        seo: SeoMeta {
            title: product.title.trim().to_string(),
            description: short_description,
            canonical: None,
            og_image: main_image,
            robots: "index, follow".to_string(),
            refreshed_time: now,
        },
        source: SOURCE_NAME.to_string(),
        source_id: product.id,
        created_time: now,
    })
}
