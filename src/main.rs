use catalog_import::import::{ImportOptions, ImportOutcome, Importer};
use catalog_import::product::{NormalizedProductRepository, SqliteNormalizedProductRepository};
use catalog_import::product_family::{ProductFamilyRepository, SqliteProductFamilyRepository};
use catalog_import::rehost::{AssetStore, HttpAssetStore};
use catalog_import::shopify::{CatalogClient, ShopifyClient};
use catalog_import::spec_group::{SpecGroupRepository, SqliteSpecGroupRepository};
use catalog_import::spec_item::{SqliteStandaloneSpecItemRepository, StandaloneSpecItemRepository};
use catalog_import::ImportMode;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_rusqlite::Connection;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let mode = env::args()
        .nth(1)
        .or_else(|| env::var("IMPORT_MODE").ok())
        .map(|raw| ImportMode::from_str(&raw))
        .unwrap_or_default();

    let client = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .use_rustls_tls()
        .build()?;

    std::fs::create_dir_all("storage")?;
    // Each repository needs its own connection, they share the database file.
    let db_path = envmnt::get_or("CATALOG_DB", "storage/catalog.db");
    let products: Arc<dyn NormalizedProductRepository> = Arc::new(
        SqliteNormalizedProductRepository::init(Connection::open(&db_path).await?).await?,
    );
    let groups: Arc<dyn SpecGroupRepository> =
        Arc::new(SqliteSpecGroupRepository::init(Connection::open(&db_path).await?).await?);
    let items: Arc<dyn StandaloneSpecItemRepository> = Arc::new(
        SqliteStandaloneSpecItemRepository::init(Connection::open(&db_path).await?).await?,
    );
    let families: Arc<dyn ProductFamilyRepository> =
        Arc::new(SqliteProductFamilyRepository::init(Connection::open(&db_path).await?).await?);

    let catalog: Arc<dyn CatalogClient> = Arc::new(ShopifyClient::from_env(client.clone())?);
    let assets: Arc<dyn AssetStore> = Arc::new(HttpAssetStore::from_env(client)?);

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(_) => {
                log::info!("Shutdown requested, finishing current item");
                flag.store(true, Ordering::SeqCst);
            }
            Err(err) => log::error!("Unable to listen to shutdown: {err}"),
        }
    });

    let importer = Importer {
        catalog,
        assets,
        products,
        groups,
        items,
        families,
    };
    let options = ImportOptions {
        mode,
        on_progress: Some(Box::new(|done, total, message, result| match result {
            Some(result) => log::info!("[{done}/{total}] {message}: {}", result.outcome),
            None => log::info!("[{done}/{total}] importing {message}"),
        })),
        is_cancelled: Some(Box::new(move || cancelled.load(Ordering::SeqCst))),
    };
    let results = importer.run(&options).await?;

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for result in &results {
        match &result.outcome {
            ImportOutcome::Imported { .. } => imported += 1,
            ImportOutcome::Skipped { .. } => skipped += 1,
            ImportOutcome::Failed { error } => {
                failed += 1;
                log::warn!("{} ({}): {error}", result.title, result.source_id);
            }
        }
    }
    log::info!("Finished: {imported} imported, {skipped} skipped, {failed} failed");
    Ok(())
}
