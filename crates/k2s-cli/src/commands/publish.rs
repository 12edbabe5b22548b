//! Publish command implementation.

use anyhow::{bail, Context, Result};
use k2s_core::publisher::KafkaPublisher;
use k2s_core::{Config, Product};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Product published when no document is given.
fn sample_product() -> Product {
    Product::new(
        3,
        "Poloshirt, Kurzarm (2er Pack)",
        25.99,
        "https://image01.bonprix.de/assets/275x385/1684855332/23077857-j6aULXSb.webp",
    )
}

/// Parse one product document or an array of them.
fn parse_products(text: &str) -> Result<Vec<Product>> {
    let value: serde_json::Value =
        serde_json::from_str(text).context("Product document is not valid JSON")?;
    let products = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(products)
}

/// Publish products to the configured topic.
pub async fn run(config: Config, json: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let products = match (json, file) {
        (Some(text), _) => parse_products(&text)?,
        (None, Some(path)) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_products(&text)?
        }
        (None, None) => vec![sample_product()],
    };

    if products.is_empty() {
        bail!("Nothing to publish");
    }

    let publisher = KafkaPublisher::new(&config.kafka, &config.publisher)?;
    let acks = publisher.publish_all(&products).await?;
    publisher.flush(FLUSH_TIMEOUT)?;

    for (product, ack) in products.iter().zip(&acks) {
        info!(
            id = product.id,
            topic = %publisher.topic(),
            partition = ack.partition,
            offset = ack.offset,
            "Published product"
        );
    }
    println!("Published {} product(s) to {}", acks.len(), publisher.topic());

    Ok(())
}
