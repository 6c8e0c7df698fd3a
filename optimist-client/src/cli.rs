//! Command line parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use optimist_core::{CachedItem, Product};

#[derive(Parser, Debug)]
#[command(
    name = "optimist",
    version,
    about = "List and optimistically add records of a REST collection"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "OPTIMIST_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the collection
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Add a product optimistically and wait for the server to settle it
    Add(AddArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "")]
    pub price: String,
    #[arg(long, default_value = "")]
    pub description: String,
    /// Image URL
    #[arg(long, default_value = "")]
    pub image: String,
}

impl From<AddArgs> for Product {
    fn from(args: AddArgs) -> Self {
        Product::named(args.name)
            .with_price(args.price)
            .with_description(args.description)
            .with_image(args.image)
    }
}

/// One table row. Tentative records show `...` in place of their id.
pub fn render_row(product: &Product) -> String {
    let id = match product.server_id() {
        Some(id) => id.to_string(),
        None => "...".to_string(),
    };
    format!(
        "{:>6}  {:<24}  {:>10}  {}",
        id, product.name, product.price, product.description
    )
}

pub fn render_table(products: &[Product]) -> String {
    let mut out = format!(
        "{:>6}  {:<24}  {:>10}  {}",
        "ID", "NAME", "PRICE", "DESCRIPTION"
    );
    for product in products {
        out.push('\n');
        out.push_str(&render_row(product));
    }
    out
}
