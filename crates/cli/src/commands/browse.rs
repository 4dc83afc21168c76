//! Catalog browsing through the API.

use bookbazaar_client::{BazaarClient, BookQuery};
use bookbazaar_core::{Book, Condition, PageSlice};

/// Search filters from the command line.
#[derive(Debug, Default)]
pub struct Filters {
    pub search: Option<String>,
    pub genre: Option<String>,
    pub condition: Option<String>,
    pub page: u32,
}

impl Filters {
    fn into_query(self) -> Result<BookQuery, Box<dyn std::error::Error>> {
        let condition = self
            .condition
            .as_deref()
            .map(str::parse::<Condition>)
            .transpose()?;

        Ok(BookQuery {
            search: self.search,
            genre: self.genre,
            condition,
            page: Some(self.page.max(1)),
            ..BookQuery::default()
        })
    }
}

/// One line per listing.
pub fn format_book(book: &Book) -> String {
    format!(
        "#{:<6} {:<40} {:<24} {:>9} {:<4} {}",
        book.index,
        truncate(&book.title, 40),
        truncate(&book.author.join(", "), 24),
        format!("₹{}", book.price),
        book.condition,
        book.id,
    )
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn page_footer(page: &PageSlice<Book>) -> String {
    let more = if page.has_more { ", more available" } else { "" };
    format!("page {} · {} of {} listings{more}", page.page, page.items.len(), page.total)
}

/// Print one page of search results.
///
/// # Errors
///
/// Returns an error for an unknown condition or a failed request.
pub async fn run(api_url: &str, filters: Filters) -> Result<(), Box<dyn std::error::Error>> {
    let client = BazaarClient::new(api_url)?;
    let query = filters.into_query()?;
    tracing::debug!(?query, "Searching catalog");

    let page = client.search_books(&query).await?;

    #[allow(clippy::print_stdout)]
    {
        if page.items.is_empty() {
            println!("No listings found.");
        }
        for book in &page.items {
            println!("{}", format_book(book));
        }
        println!("{}", page_footer(&page));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_into_query() {
        let query = Filters {
            genre: Some("Fantasy".to_owned()),
            condition: Some("new".to_owned()),
            page: 0,
            ..Filters::default()
        }
        .into_query()
        .unwrap();

        assert_eq!(query.condition, Some(Condition::New));
        assert_eq!(query.page, Some(1));
        assert_eq!(query.genre.as_deref(), Some("Fantasy"));
    }

    #[test]
    fn test_unknown_condition_rejected() {
        let filters = Filters {
            condition: Some("Mint".to_owned()),
            page: 1,
            ..Filters::default()
        };
        assert!(filters.into_query().is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Dune", 10), "Dune");
        assert_eq!(truncate("The Left Hand of Darkness", 8), "The Lef…");
    }
}
