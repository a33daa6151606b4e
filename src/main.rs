use stockflow::{
    inventory,
    sorting,
    Config,
    Product,
    TaskExecutor,
};
use tokio::{runtime::Builder, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;


fn sample_products() -> Vec<Product> {
    (0..20u64)
        .map(|i| {
            let price = ((i * 37) % 101) as f64 + 0.99;
            let category = if i % 2 == 0 { "hardware" } else { "garden" };
            Product::new(i, format!("product-{i}"), price, (i % 7) as i64).in_category(category)
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let products = sample_products();

        let by_price = sorting::merge_sort(&products, |a, b| a.price.total_cmp(&b.price));
        info!(cheapest = %by_price[0].name, "merge sorted {} products", by_price.len());

        let bucketed = sorting::bucket_sort_by_price(&products, 0.0, 101.0, 8)?;
        info!(first = bucketed[0].price, last = bucketed[bucketed.len() - 1].price, "bucket sorted");

        if let Some(hit) = sorting::binary_search_by_price(&products, 50.0) {
            info!(exact = hit.exact, price = hit.item().price, "closest to 50.0");
        }

        info!(
            value = inventory::total_inventory_value(&products),
            low_stock = inventory::low_stock(&products, 2).len(),
            "inventory summary"
        );

        let executor = TaskExecutor::with_config(Config::default().with_batch_grace(Duration::from_secs(1)));

        let report = executor
            .update_all_sync(products.clone(), |p: &Product| {
                if p.quantity == 0 {
                    return Err(format!("{} is out of stock", p.name));
                }
                Ok(Product { price: (p.price * 0.9 * 100.0).round() / 100.0, ..p.clone() })
            })
            .await?;
        info!(updated = report.updated(), skipped = report.failed.len(), "discount applied");

        let names = executor
            .compute_all(report.into_items(), |p| Ok::<_, String>(p.name.to_uppercase()))
            .await?;
        info!(count = names.len(), "names computed");

        let batches = executor
            .batch_with_delay(products, |p| {
                info!(id = p.id, "syncing");
                Ok::<_, String>(())
            }, 5, Duration::from_millis(50))
            .await?;
        info!(?batches, "batch dispatch done");

        let outcome = executor.shutdown().await;
        info!(?outcome, "executor shut down");
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}
