//! Seed the catalog with listings.
//!
//! Listings are written straight through the repositories, owned by a fixed
//! seed seller profile, so seeding needs only database access:
//!
//! - `seed file <yaml>` inserts the listings described in a YAML list
//! - `seed google-books` pulls volumes per genre from the public Google Books
//!   API and gives each a random price (100-499) and condition

use std::path::Path;

use bookbazaar_api::db::{self, BookRepository, UserRepository};
use bookbazaar_api::models::NewListing;
use bookbazaar_core::{Condition, DEFAULT_AUTHOR, DEFAULT_GENRE, Price, UserId, split_list};
use rand::Rng;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Owner of every seeded listing.
pub const SEED_SELLER_ID: Uuid = Uuid::from_u128(0x0b00_c0ba_2a00_4000_8000_0000_5eed_0001);
const SEED_SELLER_NAME: &str = "BookBazaar Seed";
const SEED_SELLER_EMAIL: &str = "seed@bookbazaar.invalid";

/// Genres queried from Google Books.
pub const GOOGLE_BOOKS_GENRES: [&str; 6] =
    ["Fantasy", "Science", "Romance", "History", "Biography", "Fiction"];

const GOOGLE_BOOKS_ENDPOINT: &str = "https://www.googleapis.com/books/v1/volumes";

/// Google Books caps `maxResults` at 40.
const GOOGLE_BOOKS_MAX_RESULTS: u32 = 40;

const UNTITLED: &str = "Untitled";
const NO_DESCRIPTION: &str = "No description available.";

// =============================================================================
// YAML seed files
// =============================================================================

/// One listing in a seed file.
///
/// ```yaml
/// - title: Dune
///   author: [Frank Herbert]
///   summary: A desert planet and its spice.
///   price: 150
///   condition: Used
///   genre: [Fiction, Science]
///   image: https://example.com/dune.jpg
/// ```
#[derive(Debug, Deserialize)]
pub struct SeedBook {
    pub title: String,
    #[serde(default)]
    pub author: Vec<String>,
    pub summary: String,
    pub price: Price,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl SeedBook {
    /// Validate and normalize into a listing.
    ///
    /// # Errors
    ///
    /// Returns a message if the title or summary is blank or the price is
    /// zero.
    pub fn into_listing(self) -> Result<NewListing, String> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("title cannot be empty".to_owned());
        }
        let summary = self.summary.trim();
        if summary.is_empty() {
            return Err(format!("{title}: summary cannot be empty"));
        }
        if self.price.is_zero() {
            return Err(format!("{title}: price must be positive"));
        }

        Ok(NewListing {
            title: title.to_owned(),
            author: split_list(&self.author, DEFAULT_AUTHOR),
            summary: summary.to_owned(),
            price: self.price,
            condition: self.condition,
            genre: split_list(&self.genre, DEFAULT_GENRE),
            image: self.image.filter(|i| !i.trim().is_empty()),
        })
    }
}

/// Parse a seed file body.
///
/// # Errors
///
/// Returns an error for invalid YAML or any invalid entry.
pub fn parse_seed_file(content: &str) -> Result<Vec<NewListing>, Box<dyn std::error::Error>> {
    let books: Vec<SeedBook> = serde_yaml::from_str(content)?;
    let mut listings = Vec::with_capacity(books.len());
    let mut errors = Vec::new();

    for (i, book) in books.into_iter().enumerate() {
        match book.into_listing() {
            Ok(listing) => listings.push(listing),
            Err(e) => errors.push(format!("entry {}: {e}", i + 1)),
        }
    }

    if !errors.is_empty() {
        for err in &errors {
            tracing::error!("  - {err}");
        }
        return Err(format!("{} invalid entries", errors.len()).into());
    }
    Ok(listings)
}

/// Seed listings from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or database
/// operations fail.
pub async fn from_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()).into());
    }

    info!(path = %path.display(), "Loading listings from file");
    let content = tokio::fs::read_to_string(path).await?;
    let listings = parse_seed_file(&content)?;
    info!(count = listings.len(), "Parsed seed file");

    let pool = connect().await?;
    let inserted = insert_all(&pool, &listings).await?;

    info!("Seeding complete!");
    info!("  Listings inserted: {inserted}");
    Ok(())
}

// =============================================================================
// Google Books
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Default, Deserialize)]
struct Volume {
    #[serde(default, rename = "volumeInfo")]
    info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    description: Option<String>,
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageLinks {
    thumbnail: Option<String>,
}

fn volumes_url(genre: &str, per_genre: u32) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(GOOGLE_BOOKS_ENDPOINT)?;
    url.query_pairs_mut()
        .append_pair("q", &format!("subject:{genre}"))
        .append_pair(
            "maxResults",
            &per_genre.clamp(1, GOOGLE_BOOKS_MAX_RESULTS).to_string(),
        );
    Ok(url)
}

/// Turn a volume into a listing, filling gaps with placeholders.
fn volume_listing(info: VolumeInfo, genre: &str, price: Price, condition: Condition) -> NewListing {
    let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

    NewListing {
        title: non_blank(info.title).unwrap_or_else(|| UNTITLED.to_owned()),
        author: split_list(&info.authors, DEFAULT_AUTHOR),
        summary: non_blank(info.description).unwrap_or_else(|| NO_DESCRIPTION.to_owned()),
        price,
        condition,
        genre: vec![genre.to_owned()],
        image: non_blank(info.image_links.and_then(|links| links.thumbnail)),
    }
}

/// Random price in 100..=499 and a fair coin for the condition.
fn random_terms() -> (Price, Condition) {
    let mut rng = rand::rng();
    let price = Price::from_units(rng.random_range(100..500));
    let condition = if rng.random_bool(0.5) {
        Condition::New
    } else {
        Condition::Used
    };
    (price, condition)
}

/// Seed listings from Google Books, `per_genre` volumes per genre.
///
/// A genre whose fetch fails is skipped with a warning.
///
/// # Errors
///
/// Returns an error if the database cannot be reached or an insert fails.
pub async fn from_google_books(per_genre: u32) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect().await?;
    let http = reqwest::Client::new();
    let mut inserted = 0;
    let mut failed_genres = Vec::new();

    for genre in GOOGLE_BOOKS_GENRES {
        let volumes = match fetch_volumes(&http, genre, per_genre).await {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(genre, error = %e, "Failed to fetch volumes, skipping genre");
                failed_genres.push(genre);
                continue;
            }
        };

        let listings: Vec<NewListing> = volumes
            .into_iter()
            .map(|volume| {
                let (price, condition) = random_terms();
                volume_listing(volume.info, genre, price, condition)
            })
            .collect();

        let count = insert_all(&pool, &listings).await?;
        info!(genre, count, "Seeded genre");
        inserted += count;
    }

    info!("Seeding complete!");
    info!("  Listings inserted: {inserted}");
    if !failed_genres.is_empty() {
        warn!("  Genres skipped: {}", failed_genres.join(", "));
    }
    Ok(())
}

async fn fetch_volumes(
    http: &reqwest::Client,
    genre: &str,
    per_genre: u32,
) -> Result<Vec<Volume>, Box<dyn std::error::Error>> {
    let response = http
        .get(volumes_url(genre, per_genre)?)
        .send()
        .await?
        .error_for_status()?;
    let body: VolumesResponse = response.json().await?;
    Ok(body.items)
}

// =============================================================================
// Database
// =============================================================================

async fn connect() -> Result<PgPool, Box<dyn std::error::Error>> {
    let database_url = super::database_url()?;
    let pool = db::create_pool(&database_url).await?;
    info!("Connected to database");
    Ok(pool)
}

async fn insert_all(pool: &PgPool, listings: &[NewListing]) -> Result<usize, Box<dyn std::error::Error>> {
    let seller = UserId::new(SEED_SELLER_ID);
    UserRepository::new(pool)
        .upsert_profile(seller, SEED_SELLER_NAME, SEED_SELLER_EMAIL)
        .await?;

    let books = BookRepository::new(pool);
    for listing in listings {
        let book = books.create(listing, seller).await?;
        tracing::debug!(book_id = %book.id, index = book.index, title = %book.title, "Inserted listing");
    }
    Ok(listings.len())
}
