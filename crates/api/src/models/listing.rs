//! Listing form parsing and validation.
//!
//! Listings arrive as multipart forms. Multi-valued fields (`author`,
//! `genre`) may be sent as repeated fields, as `author[]`, or as one
//! comma-separated value.

use thiserror::Error;

use bookbazaar_core::{
    Condition, ConditionError, DEFAULT_AUTHOR, DEFAULT_GENRE, Price, PriceError, split_list,
};

/// Errors produced while validating a listing form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingError {
    /// A required field was absent.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A supplied text field was blank.
    #[error("{0} cannot be empty")]
    Blank(&'static str),

    /// The price is not a non-negative number.
    #[error("Invalid price: {0}")]
    Price(#[from] PriceError),

    /// The condition is not a known label.
    #[error("{0}")]
    Condition(#[from] ConditionError),
}

/// Raw text fields of a listing form, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct ListingForm {
    fields: Vec<(String, String)>,
}

/// A validated new listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub title: String,
    pub author: Vec<String>,
    pub summary: String,
    pub price: Price,
    pub condition: Condition,
    pub genre: Vec<String>,
    pub image: Option<String>,
}

/// Validated changes to an existing listing. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingChanges {
    pub title: Option<String>,
    pub author: Option<Vec<String>>,
    pub summary: Option<String>,
    pub price: Option<Price>,
    pub condition: Option<Condition>,
    pub genre: Option<Vec<String>>,
    pub image: Option<String>,
}

impl ListingForm {
    /// Record one text field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let name = name.strip_suffix("[]").unwrap_or(&name).to_owned();
        self.fields.push((name, value.into()));
    }

    /// Whether the form carried `name` at all.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    fn values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn first(&self, name: &str) -> Option<&str> {
        self.values(name).next()
    }

    fn text(&self, name: &'static str) -> Result<Option<String>, ListingError> {
        match self.first(name) {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Err(ListingError::Blank(name)),
            Some(value) => Ok(Some(value.trim().to_owned())),
        }
    }

    fn list(&self, name: &str, default: &str) -> Option<Vec<String>> {
        self.has(name).then(|| split_list(self.values(name), default))
    }

    fn price(&self) -> Result<Option<Price>, ListingError> {
        self.first("price")
            .map(|raw| raw.parse::<Price>().map_err(ListingError::from))
            .transpose()
    }

    fn condition(&self) -> Result<Option<Condition>, ListingError> {
        match self.first("condition") {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => Ok(Some(raw.parse()?)),
        }
    }

    /// Validate as a new listing.
    ///
    /// `image` is the stored filename of an uploaded file, if any; without an
    /// upload, an `image` text field holding an absolute URL is kept.
    ///
    /// # Errors
    ///
    /// Returns `ListingError` when `title`, `summary` or `price` is missing or
    /// blank, the price is negative or not a number, or the condition is unknown.
    pub fn into_new_listing(self, image: Option<String>) -> Result<NewListing, ListingError> {
        let title = self.text("title")?.ok_or(ListingError::Missing("title"))?;
        let summary = self.text("summary")?.ok_or(ListingError::Missing("summary"))?;
        let price = self.price()?.ok_or(ListingError::Missing("price"))?;

        Ok(NewListing {
            title,
            author: self
                .list("author", DEFAULT_AUTHOR)
                .unwrap_or_else(|| vec![DEFAULT_AUTHOR.to_owned()]),
            summary,
            price,
            condition: self.condition()?.unwrap_or_default(),
            genre: self
                .list("genre", DEFAULT_GENRE)
                .unwrap_or_else(|| vec![DEFAULT_GENRE.to_owned()]),
            image: image.or_else(|| self.image_url()),
        })
    }

    /// Validate as changes to an existing listing.
    ///
    /// # Errors
    ///
    /// Returns `ListingError` when a supplied field fails the same checks as
    /// [`ListingForm::into_new_listing`].
    pub fn into_changes(self, image: Option<String>) -> Result<ListingChanges, ListingError> {
        Ok(ListingChanges {
            title: self.text("title")?,
            author: self.list("author", DEFAULT_AUTHOR),
            summary: self.text("summary")?,
            price: self.price()?,
            condition: self.condition()?,
            genre: self.list("genre", DEFAULT_GENRE),
            image: image.or_else(|| self.image_url()),
        })
    }

    fn image_url(&self) -> Option<String> {
        self.first("image")
            .map(str::trim)
            .filter(|v| v.starts_with("http://") || v.starts_with("https://"))
            .map(str::to_owned)
    }
}
