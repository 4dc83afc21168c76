//! BookBazaar CLI - migrations, catalog seeding and a terminal shopper.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! bazaar migrate
//!
//! # Seed listings from a YAML file or from Google Books
//! bazaar seed file books.yaml
//! bazaar seed google-books --per-genre 10
//!
//! # Browse the catalog of a running API
//! bazaar browse --genre Fantasy --condition New --page 2
//!
//! # Manage the local cart
//! bazaar cart add 5b0c9e0e-...
//! bazaar cart list
//! bazaar cart checkout
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Insert listings directly into the database
//! - `browse` - Search listings through the API
//! - `cart` - Local cart kept in a state file

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "bazaar")]
#[command(author, version, about = "BookBazaar CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed the catalog
    Seed {
        #[command(subcommand)]
        source: SeedSource,
    },
    /// Search listings through the API
    Browse {
        /// API base URL
        #[arg(long, env = "BAZAAR_API_URL", default_value = "http://127.0.0.1:5000")]
        api_url: String,

        /// Match title, author or summary
        #[arg(short, long)]
        search: Option<String>,

        /// Only listings in this genre
        #[arg(short, long)]
        genre: Option<String>,

        /// `New` or `Used`
        #[arg(short, long)]
        condition: Option<String>,

        /// 1-based page number
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Manage the local cart
    Cart {
        /// API base URL
        #[arg(long, env = "BAZAAR_API_URL", default_value = "http://127.0.0.1:5000")]
        api_url: String,

        /// Local state file
        #[arg(long, env = "BAZAAR_STATE_FILE", default_value = ".bazaar/state.json")]
        state: PathBuf,

        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum SeedSource {
    /// Insert listings described in a YAML file
    File {
        /// Path to the YAML file
        path: PathBuf,
    },
    /// Insert listings fetched from the Google Books API
    GoogleBooks {
        /// Volumes to fetch per genre (max 40)
        #[arg(long, default_value_t = 20)]
        per_genre: u32,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Show the cart and its total
    List,
    /// Add a listing by id
    Add { id: String },
    /// Remove a listing by id
    Remove { id: String },
    /// Place an order for the cart (needs `BAZAAR_TOKEN`)
    Checkout,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { source } => match source {
            SeedSource::File { path } => commands::seed::from_file(&path).await?,
            SeedSource::GoogleBooks { per_genre } => {
                commands::seed::from_google_books(per_genre).await?;
            }
        },
        Commands::Browse {
            api_url,
            search,
            genre,
            condition,
            page,
        } => {
            let filters = commands::browse::Filters {
                search,
                genre,
                condition,
                page,
            };
            commands::browse::run(&api_url, filters).await?;
        }
        Commands::Cart {
            api_url,
            state,
            action,
        } => {
            let session = commands::cart::Session::open(&api_url, &state)?;
            match action {
                CartAction::List => session.list()?,
                CartAction::Add { id } => session.add(&id).await?,
                CartAction::Remove { id } => session.remove(&id)?,
                CartAction::Checkout => session.checkout().await?,
            }
        }
    }
    Ok(())
}
