//! Catalog integration tests: listing numbers, search filters, lookups and
//! owner-only edits.
//!
//! Requires `BAZAAR_TEST_DATABASE_URL`; see the crate docs.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use bookbazaar_client::{BookQuery, ClientError, ListingFields};
use bookbazaar_core::{BookId, Condition, Price, UserId};
use bookbazaar_integration_tests::{context_or_skip, unique_genre};
use tokio::task::JoinSet;

// ============================================================================
// Listing numbers
// ============================================================================

#[tokio::test]
async fn test_index_increases_in_creation_order() {
    let ctx = context_or_skip!();
    let seller = UserId::generate();
    let genre = unique_genre("index");

    let mut indices = Vec::new();
    for title in ["First", "Second", "Third"] {
        let book = ctx.listing(seller, title, 100, Condition::Used, &genre).await;
        indices.push(book.index);
    }

    assert!(indices.windows(2).all(|w| w[0] < w[1]), "{indices:?}");
}

#[tokio::test]
async fn test_concurrent_creation_gets_distinct_indices() {
    let ctx = std::sync::Arc::new(context_or_skip!());
    let seller = UserId::generate();
    let genre = unique_genre("concurrent");
    // Make sure the seller row exists before the concurrent inserts.
    ctx.listing(seller, "Warm-up", 100, Condition::Used, &genre).await;

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        let ctx = std::sync::Arc::clone(&ctx);
        let genre = genre.clone();
        tasks.spawn(async move {
            ctx.listing(seller, &format!("Book {i}"), 100, Condition::New, &genre)
                .await
                .index
        });
    }

    let mut indices = Vec::new();
    while let Some(index) = tasks.join_next().await {
        indices.push(index.expect("insert task panicked"));
    }
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 20);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_price_range_is_inclusive() {
    let ctx = context_or_skip!();
    let seller = UserId::generate();
    let genre = unique_genre("price");
    for (title, price) in [("Cheap", 100), ("Middle", 250), ("Upper", 400), ("Dear", 450)] {
        ctx.listing(seller, title, price, Condition::Used, &genre).await;
    }

    let page = ctx
        .client()
        .search_books(&BookQuery {
            genre: Some(genre),
            min_price: Some(Price::from_units(250)),
            max_price: Some(Price::from_units(400)),
            ..BookQuery::default()
        })
        .await
        .expect("search failed");

    let titles: Vec<&str> = page.items.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Middle", "Upper"]);
    assert_eq!(page.total, 2);
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_genre_and_condition_filters() {
    let ctx = context_or_skip!();
    let seller = UserId::generate();
    let genre = unique_genre("fantasy");
    ctx.listing(seller, "The Hobbit", 300, Condition::New, &genre).await;
    ctx.listing(seller, "Earthsea", 150, Condition::Used, &genre).await;
    ctx.listing(seller, "Elsewhere", 150, Condition::New, &unique_genre("other")).await;

    let client = ctx.client();
    let page = client
        .search_books(&BookQuery {
            genre: Some(genre.clone()),
            condition: Some(Condition::New),
            ..BookQuery::default()
        })
        .await
        .expect("search failed");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].title, "The Hobbit");

    let by_genre = client.books_by_genre(&genre).await.expect("genre lookup failed");
    assert_eq!(by_genre.len(), 2);
}

#[tokio::test]
async fn test_search_pagination() {
    let ctx = context_or_skip!();
    let seller = UserId::generate();
    let genre = unique_genre("paged");
    for i in 0..5 {
        ctx.listing(seller, &format!("Volume {i}"), 100, Condition::Used, &genre).await;
    }

    let client = ctx.client();
    let query = |page| BookQuery {
        genre: Some(genre.clone()),
        page: Some(page),
        limit: Some(2),
        ..BookQuery::default()
    };

    let first = client.search_books(&query(1)).await.expect("page 1");
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.total, 5);
    assert!(first.has_more);

    let last = client.search_books(&query(3)).await.expect("page 3");
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more);

    let beyond = client.search_books(&query(9)).await.expect("page 9");
    assert!(beyond.items.is_empty());
    assert!(!beyond.has_more);
}

// ============================================================================
// Lookups
// ============================================================================

#[tokio::test]
async fn test_books_by_ids_skips_unknown() {
    let ctx = context_or_skip!();
    let seller = UserId::generate();
    let genre = unique_genre("ids");
    let a = ctx.listing(seller, "A", 100, Condition::Used, &genre).await;
    let b = ctx.listing(seller, "B", 100, Condition::Used, &genre).await;

    let books = ctx
        .client()
        .books_by_ids(&[a.id, BookId::generate(), b.id])
        .await
        .expect("by-ids failed");

    let mut ids: Vec<BookId> = books.iter().map(|book| book.id).collect();
    ids.sort_unstable();
    let mut expected = vec![a.id, b.id];
    expected.sort_unstable();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_unknown_book_is_not_found() {
    let ctx = context_or_skip!();
    let err = ctx.client().book(BookId::generate()).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

// ============================================================================
// Listing lifecycle
// ============================================================================

#[tokio::test]
async fn test_only_owner_can_edit_or_delete() {
    let ctx = context_or_skip!();
    let owner = ctx.user("Owner");
    let other = ctx.user("Other");

    let book = owner
        .client
        .create_book(ListingFields {
            title: Some("Dune".to_owned()),
            summary: Some("Spice and sand.".to_owned()),
            price: Some(Price::from_units(150)),
            genre: vec![unique_genre("lifecycle")],
            ..ListingFields::default()
        })
        .await
        .expect("create failed");
    assert!(book.is_owned_by(owner.id));
    assert_eq!(book.author, vec!["Unknown"]);

    let edit = ListingFields {
        price: Some(Price::from_units(90)),
        ..ListingFields::default()
    };
    let err = other.client.update_book(book.id, edit.clone()).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    let err = other.client.delete_book(book.id).await.unwrap_err();
    assert_eq!(err.status(), Some(403));

    let updated = owner.client.update_book(book.id, edit).await.expect("update failed");
    assert_eq!(updated.price, Price::from_units(90));
    assert_eq!(updated.title, "Dune");

    let mine = owner.client.my_books().await.expect("my-books failed");
    assert_eq!(mine.len(), 1);

    owner.client.delete_book(book.id).await.expect("delete failed");
    let err = ctx.client().book(book.id).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
}

#[tokio::test]
async fn test_create_requires_token() {
    let ctx = context_or_skip!();
    let err = ctx
        .client()
        .create_book(ListingFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotSignedIn));
}
