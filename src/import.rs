use crate::normalize;
use crate::product::NormalizedProductRepository;
use crate::product_family::ProductFamilyRepository;
use crate::rehost::AssetStore;
use crate::shopify::{CatalogClient, SourceProduct};
use crate::spec_group::SpecGroupRepository;
use crate::spec_item::StandaloneSpecItemRepository;
use crate::{ImportMode, SupplierCode};
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::time::sleep;
use uuid::Uuid;

static ITEM_DELAY_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("IMPORT_ITEM_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(250)
});

pub type ProgressFn = Box<dyn Fn(usize, usize, &str, Option<&ImportResult>) + Send + Sync>;
pub type CancelFn = Box<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
pub struct ImportOptions {
    pub mode: ImportMode,
    pub on_progress: Option<ProgressFn>,
    pub is_cancelled: Option<CancelFn>,
}

impl ImportOptions {
    fn progress(&self, done: usize, total: usize, message: &str, result: Option<&ImportResult>) {
        if let Some(cb) = &self.on_progress {
            cb(done, total, message, result);
        }
    }
    fn cancelled(&self) -> bool {
        self.is_cancelled.as_ref().map(|cb| cb()).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported { id: Uuid },
    Skipped { reason: String },
    Failed { error: String },
}

impl std::fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imported { id } => write!(f, "imported as {id}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImportResult {
    pub source_id: i64,
    pub title: String,
    pub outcome: ImportOutcome,
}

pub struct Importer {
    pub catalog: Arc<dyn CatalogClient>,
    pub assets: Arc<dyn AssetStore>,
    pub products: Arc<dyn NormalizedProductRepository>,
    pub groups: Arc<dyn SpecGroupRepository>,
    pub items: Arc<dyn StandaloneSpecItemRepository>,
    pub families: Arc<dyn ProductFamilyRepository>,
}

impl Importer {
    /// One full pass over the source catalog. Items are processed one at a
    /// time; a failed item is recorded and the run moves on. Only a failed
    /// catalog fetch aborts the run.
    pub async fn run(&self, options: &ImportOptions) -> Result<Vec<ImportResult>, anyhow::Error> {
        let products = self.catalog.fetch_all(options.mode).await?;
        let total = products.len();
        log::info!("Importing {total} products in {} mode", options.mode.as_str());
        let mut results = Vec::with_capacity(total);
        for (idx, product) in products.iter().enumerate() {
            if options.cancelled() {
                log::info!("Import cancelled after {idx} of {total} products");
                break;
            }
            if idx > 0 && *ITEM_DELAY_MS > 0 {
                sleep(std::time::Duration::from_millis(*ITEM_DELAY_MS)).await;
            }
            options.progress(idx, total, &product.title, None);
            let outcome = self.import_one(product, options.mode).await;
            let result = ImportResult {
                source_id: product.id,
                title: product.title.clone(),
                outcome,
            };
            options.progress(idx + 1, total, &product.title, Some(&result));
            results.push(result);
        }
        let imported = results
            .iter()
            .filter(|r| matches!(r.outcome, ImportOutcome::Imported { .. }))
            .count();
        log::info!("Import done: {imported} of {} imported", results.len());
        Ok(results)
    }

    async fn import_one(&self, product: &SourceProduct, mode: ImportMode) -> ImportOutcome {
        let code = SupplierCode(normalize::item_code(product));
        match self.products.get_by(&code).await {
            Ok(Some(existing)) => {
                return ImportOutcome::Skipped {
                    reason: format!("supplier code {} already imported as {}", code.0, existing.id),
                }
            }
            Ok(None) => {}
            Err(err) => {
                log::error!("Lookup failed for product {}: {err:#}", product.id);
                return ImportOutcome::Failed {
                    error: format!("{err:#}"),
                };
            }
        }
        let normalized = match normalize::normalize(
            product,
            mode,
            self.catalog.as_ref(),
            self.assets.as_ref(),
            self.groups.as_ref(),
            self.items.as_ref(),
            self.families.as_ref(),
        )
        .await
        {
            Ok(normalized) => normalized,
            Err(err) => {
                log::error!("Unable to normalize product {}: {err:#}", product.id);
                return ImportOutcome::Failed {
                    error: format!("{err:#}"),
                };
            }
        };
        let id = normalized.id;
        match self.products.save(normalized).await {
            Ok(()) => ImportOutcome::Imported { id },
            Err(err) => {
                log::error!("Unable to save product {}: {err:#}", product.id);
                ImportOutcome::Failed {
                    error: format!("{err:#}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{NormalizedProduct, SqliteNormalizedProductRepository};
    use crate::product_family::SqliteProductFamilyRepository;
    use crate::shopify::{Metafield, SourceVariant};
    use crate::spec_group::SqliteSpecGroupRepository;
    use crate::spec_item::SqliteStandaloneSpecItemRepository;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_rusqlite::Connection;
    use typesafe_repository::async_ops::{Get, GetBy, List, Save};
    use typesafe_repository::prelude::*;
    use typesafe_repository::IdentityOf;

    struct FakeCatalog {
        products: Vec<SourceProduct>,
        metafield_calls: AtomicUsize,
    }

    impl FakeCatalog {
        fn new(products: Vec<SourceProduct>) -> Self {
            Self {
                products,
                metafield_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogClient for FakeCatalog {
        async fn fetch_all(&self, mode: ImportMode) -> Result<Vec<SourceProduct>, anyhow::Error> {
            Ok(crate::shopify::filter_by_mode(self.products.clone(), mode))
        }
        async fn fetch_metafields(&self, _: i64) -> Vec<Metafield> {
            self.metafield_calls.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    struct EchoAssets;

    #[async_trait]
    impl AssetStore for EchoAssets {
        async fn rehost_many(&self, urls: &[String]) -> Vec<String> {
            urls.to_vec()
        }
    }

    struct FailingSaveRepo {
        inner: SqliteNormalizedProductRepository,
        fail_for: String,
    }

    impl Repository<NormalizedProduct> for FailingSaveRepo {
        type Error = anyhow::Error;
    }

    #[async_trait]
    impl Save<NormalizedProduct> for FailingSaveRepo {
        async fn save(&self, p: NormalizedProduct) -> Result<(), Self::Error> {
            if p.supplier_code.0 == self.fail_for {
                return Err(anyhow!("disk full"));
            }
            self.inner.save(p).await
        }
    }

    #[async_trait]
    impl Get<NormalizedProduct> for FailingSaveRepo {
        async fn get_one(
            &self,
            id: &IdentityOf<NormalizedProduct>,
        ) -> Result<Option<NormalizedProduct>, Self::Error> {
            self.inner.get_one(id).await
        }
    }

    #[async_trait]
    impl GetBy<NormalizedProduct, SupplierCode> for FailingSaveRepo {
        async fn get_by(
            &self,
            code: &SupplierCode,
        ) -> Result<Option<NormalizedProduct>, Self::Error> {
            self.inner.get_by(code).await
        }
    }

    #[async_trait]
    impl List<NormalizedProduct> for FailingSaveRepo {
        async fn list(&self) -> Result<Vec<NormalizedProduct>, Self::Error> {
            self.inner.list().await
        }
    }

    impl NormalizedProductRepository for FailingSaveRepo {}

    fn source(id: i64, sku: &str) -> SourceProduct {
        SourceProduct {
            id,
            title: format!("Product {id}"),
            handle: format!("product-{id}"),
            status: crate::shopify::ProductStatus::Draft,
            variants: vec![SourceVariant {
                sku: Some(sku.to_string()),
                price: Some("10.00".to_string()),
                ..SourceVariant::default()
            }],
            ..SourceProduct::default()
        }
    }

    async fn products_repo() -> SqliteNormalizedProductRepository {
        SqliteNormalizedProductRepository::init(
            Connection::open_in_memory().await.expect("sqlite"),
        )
        .await
        .expect("init")
    }

    async fn importer(
        catalog: FakeCatalog,
        products: Arc<dyn NormalizedProductRepository>,
    ) -> Importer {
        Importer {
            catalog: Arc::new(catalog),
            assets: Arc::new(EchoAssets),
            products,
            groups: Arc::new(
                SqliteSpecGroupRepository::init(
                    Connection::open_in_memory().await.expect("sqlite"),
                )
                .await
                .expect("init"),
            ),
            items: Arc::new(
                SqliteStandaloneSpecItemRepository::init(
                    Connection::open_in_memory().await.expect("sqlite"),
                )
                .await
                .expect("init"),
            ),
            families: Arc::new(
                SqliteProductFamilyRepository::init(
                    Connection::open_in_memory().await.expect("sqlite"),
                )
                .await
                .expect("init"),
            ),
        }
    }

    #[tokio::test]
    async fn imports_whole_batch_and_reports_progress() {
        std::env::set_var("IMPORT_ITEM_DELAY_MS", "0");
        let importer = importer(
            FakeCatalog::new(vec![source(1, "A-1"), source(2, "A-2")]),
            Arc::new(products_repo().await),
        )
        .await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let options = ImportOptions {
            mode: ImportMode::Draft,
            on_progress: Some(Box::new(move |done, total, _, _| {
                seen_cb.lock().expect("lock").push((done, total));
            })),
            is_cancelled: None,
        };
        let results = importer.run(&options).await.expect("run");
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, ImportOutcome::Imported { .. })));
        assert_eq!(
            *seen.lock().expect("lock"),
            [(0, 2), (1, 2), (1, 2), (2, 2)]
        );
        assert_eq!(importer.products.list().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn duplicate_supplier_code_is_skipped() {
        std::env::set_var("IMPORT_ITEM_DELAY_MS", "0");
        let importer = importer(
            FakeCatalog::new(vec![source(1, "SAME"), source(2, "SAME")]),
            Arc::new(products_repo().await),
        )
        .await;
        let results = importer
            .run(&ImportOptions::default())
            .await
            .expect("run");
        assert!(matches!(results[0].outcome, ImportOutcome::Imported { .. }));
        assert!(matches!(results[1].outcome, ImportOutcome::Skipped { .. }));
        assert_eq!(importer.products.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn rerun_skips_everything_without_new_rows() {
        std::env::set_var("IMPORT_ITEM_DELAY_MS", "0");
        let products: Arc<dyn NormalizedProductRepository> = Arc::new(products_repo().await);
        let importer_first = importer(
            FakeCatalog::new(vec![source(1, "A-1"), source(2, "A-2")]),
            products.clone(),
        )
        .await;
        importer_first
            .run(&ImportOptions::default())
            .await
            .expect("first run");
        let catalog = Arc::new(FakeCatalog::new(vec![source(1, "A-1"), source(2, "A-2")]));
        let mut importer_second = importer(
            FakeCatalog::new(Vec::new()),
            products.clone(),
        )
        .await;
        importer_second.catalog = catalog.clone();
        let results = importer_second
            .run(&ImportOptions::default())
            .await
            .expect("second run");
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, ImportOutcome::Skipped { .. })));
        assert_eq!(products.list().await.expect("list").len(), 2);
        // skipped items never hit the metafields endpoint
        assert_eq!(catalog.metafield_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_item_does_not_stop_the_run() {
        std::env::set_var("IMPORT_ITEM_DELAY_MS", "0");
        let inner = products_repo().await;
        let importer = importer(
            FakeCatalog::new(vec![source(1, "OK-1"), source(2, "BAD"), source(3, "OK-3")]),
            Arc::new(FailingSaveRepo {
                inner,
                fail_for: "BAD".to_string(),
            }),
        )
        .await;
        let results = importer
            .run(&ImportOptions::default())
            .await
            .expect("run");
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].outcome, ImportOutcome::Imported { .. }));
        assert!(matches!(results[1].outcome, ImportOutcome::Failed { .. }));
        assert!(matches!(results[2].outcome, ImportOutcome::Imported { .. }));
        assert_eq!(importer.products.list().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_results() {
        std::env::set_var("IMPORT_ITEM_DELAY_MS", "0");
        let importer = importer(
            FakeCatalog::new(vec![source(1, "A-1"), source(2, "A-2"), source(3, "A-3")]),
            Arc::new(products_repo().await),
        )
        .await;
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_cb = cancel.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let options = ImportOptions {
            mode: ImportMode::Draft,
            on_progress: Some(Box::new(move |_, _, _, result| {
                if result.is_some() && seen_cb.fetch_add(1, Ordering::SeqCst) == 0 {
                    cancel_cb.store(true, Ordering::SeqCst);
                }
            })),
            is_cancelled: Some(Box::new(move || cancel.load(Ordering::SeqCst))),
        };
        let results = importer.run(&options).await.expect("run");
        assert_eq!(results.len(), 1);
        assert_eq!(importer.products.list().await.expect("list").len(), 1);
    }
}
