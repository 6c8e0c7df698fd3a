//! Optimist command line entry point.

use std::sync::Arc;

use clap::Parser;
use optimist_cache::{OptimisticCache, Settlement};
use optimist_client::app::{add_product, list_products};
use optimist_client::cli::{render_table, Cli, Command};
use optimist_client::config::ClientConfig;
use optimist_client::error::ClientError;
use optimist_client::http::RestCollection;
use optimist_client::telemetry::init_tracing;
use optimist_core::Product;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.config)?;
    init_tracing(&config.logging)?;

    let rest = Arc::new(RestCollection::<Product>::new(&config)?);
    let key = rest.key();
    let cache = OptimisticCache::new(Arc::clone(&rest), rest, config.cache.clone());

    match cli.cmd {
        Command::List { json } => {
            let products = list_products(&cache, &key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*products)?);
            } else {
                println!("{}", render_table(&products));
            }
        }
        Command::Add(args) => {
            let report = add_product(&cache, &key, Product::from(args), |products| {
                println!("{}\n", render_table(products));
            })
            .await?;
            match report.settlement {
                Settlement::Committed(product) => match product.id {
                    Some(id) => println!("added product {} ({})", id, product.name),
                    None => println!("added product {}", product.name),
                },
                Settlement::RolledBack(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
