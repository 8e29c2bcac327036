//! Books API suite

use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use webtests_e2e::api::ApiResponse;
use webtests_e2e::{ensure_that, ApiSession, HarnessError, HarnessResult, TestBody, TestCase, TestScope};

pub const CATEGORY: &str = "Books API";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    pub published_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub published_date: DateTime<Utc>,
}

impl CreateBookRequest {
    /// A book with a unique title and ISBN, published `years_ago`
    pub fn unique(title: &str, author: &str, years_ago: i64) -> Self {
        Self {
            title: format!("{} {}", title, Uuid::new_v4()),
            author: author.to_string(),
            isbn: random_isbn(),
            published_date: days_ago(years_ago * 365),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookRequest {
    pub title: String,
    pub author: String,
    pub published_date: DateTime<Utc>,
}

/// `978-` followed by nine digits
pub fn random_isbn() -> String {
    format!("978-{:09}", Uuid::new_v4().as_u128() % 1_000_000_000)
}

/// Whole seconds, so dates survive the API round trip unchanged
fn days_ago(days: i64) -> DateTime<Utc> {
    let at = Utc::now() - Duration::days(days);
    at.duration_trunc(Duration::seconds(1)).unwrap_or(at)
}

fn expect_one_of(response: &ApiResponse, allowed: &[StatusCode]) -> HarnessResult<()> {
    ensure_that!(
        allowed.contains(&response.status),
        "expected one of {:?}, got {} (body: {})",
        allowed.iter().map(|s| s.as_u16()).collect::<Vec<_>>(),
        response.status,
        response.body
    );
    Ok(())
}

/// POST a book and track it as soon as the API confirms the creation
async fn create_book(session: &ApiSession, scope: &TestScope<'_>, request: &CreateBookRequest) -> HarnessResult<Book> {
    scope.info(format!("Creating book: {}", request.title));
    let response = session.client.post("/Books", request).await?;
    scope.info(format!("POST /Books -> {}", response.status));

    response.expect_status(StatusCode::CREATED)?;
    let book: Book = response.json()?;
    scope.track("Books", book.id.clone());
    scope.info(format!("Created book ID: {}", book.id));
    Ok(book)
}

async fn fetch_book(session: &ApiSession, id: &str) -> HarnessResult<Book> {
    let response = session.client.get(&format!("/Books/{}", id)).await?;
    response.expect_status(StatusCode::OK)?;
    response.json()
}

struct CreateValidBook;

#[async_trait]
impl TestBody<ApiSession> for CreateValidBook {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let request = CreateBookRequest::unique("Test Book", "Test Author", 5);
        let book = create_book(session, scope, &request).await?;
        scope.pass("Status code validation passed: 201 Created");

        ensure_that!(!book.id.is_empty(), "created book has no id");
        ensure_that!(book.title == request.title, "title {:?} != {:?}", book.title, request.title);
        ensure_that!(book.author == request.author, "author {:?} != {:?}", book.author, request.author);
        ensure_that!(book.isbn == request.isbn, "isbn {:?} != {:?}", book.isbn, request.isbn);
        ensure_that!(
            book.published_date == request.published_date,
            "published date {} != {}",
            book.published_date,
            request.published_date
        );
        scope.pass("All response body fields match the input data");
        Ok(())
    }
}

struct DuplicateIsbnRejected;

#[async_trait]
impl TestBody<ApiSession> for DuplicateIsbnRejected {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let first = CreateBookRequest::unique("First Book", "Author One", 3);
        create_book(session, scope, &first).await?;
        scope.pass("First book created");

        let duplicate = CreateBookRequest {
            title: "Second Book".to_string(),
            author: "Author Two".to_string(),
            isbn: first.isbn.clone(),
            published_date: days_ago(2 * 365),
        };
        scope.info(format!("Creating a second book with ISBN {}", duplicate.isbn));
        let response = session.client.post("/Books", &duplicate).await?;
        if response.status == StatusCode::CREATED {
            if let Ok(book) = response.json::<Book>() {
                scope.track("Books", book.id);
            }
        }

        expect_one_of(&response, &[StatusCode::BAD_REQUEST, StatusCode::CONFLICT])?;
        scope.pass(format!("Duplicate ISBN rejected with {}", response.status));
        Ok(())
    }
}

struct ListBooks;

#[async_trait]
impl TestBody<ApiSession> for ListBooks {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let response = session.client.get("/Books").await?;
        response.expect_status(StatusCode::OK)?;
        let books: Vec<Book> = response.json()?;
        scope.info(format!("Retrieved {} book(s)", books.len()));

        for book in &books {
            ensure_that!(!book.id.is_empty(), "book without id: {:?}", book);
            ensure_that!(!book.title.is_empty(), "title missing for book {}", book.id);
            ensure_that!(!book.author.is_empty(), "author missing for book {}", book.title);
        }
        scope.pass(format!("All {} book(s) have required fields", books.len()));
        Ok(())
    }
}

struct GetBookById;

#[async_trait]
impl TestBody<ApiSession> for GetBookById {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let created = create_book(session, scope, &CreateBookRequest::unique("Get By ID Book", "Get Author", 4)).await?;

        let fetched = fetch_book(session, &created.id).await?;
        ensure_that!(fetched == created, "fetched {:?}, created {:?}", fetched, created);
        scope.pass("All book data matches expected values");
        Ok(())
    }
}

/// Which endpoint an id-based case exercises
#[derive(Debug, Clone, Copy)]
enum ById {
    Get,
    Update,
    Delete,
}

impl ById {
    fn label(self) -> &'static str {
        match self {
            ById::Get => "Get Book by ID",
            ById::Update => "Update Book",
            ById::Delete => "Delete Book",
        }
    }

    async fn call(self, session: &ApiSession, id: &str) -> HarnessResult<ApiResponse> {
        let endpoint = format!("/Books/{}", id);
        match self {
            ById::Get => session.client.get(&endpoint).await,
            ById::Update => {
                let update = UpdateBookRequest {
                    title: "Should Not Update".to_string(),
                    author: "No Author".to_string(),
                    published_date: days_ago(0),
                };
                session.client.put(&endpoint, &update).await
            }
            ById::Delete => session.client.delete(&endpoint).await,
        }
    }
}

/// A well-formed id that matches nothing must be 404
struct UnknownId(ById);

#[async_trait]
impl TestBody<ApiSession> for UnknownId {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let id = Uuid::new_v4().to_string();
        scope.info(format!("Testing non-existent ID: {}", id));
        self.0.call(session, &id).await?.expect_status(StatusCode::NOT_FOUND)?;
        scope.pass("Correctly returns 404 for non-existent ID");
        Ok(())
    }
}

/// A malformed id must be rejected with 400 or 404
struct InvalidId(ById, &'static str);

#[async_trait]
impl TestBody<ApiSession> for InvalidId {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        scope.info(format!("Testing invalid ID format: '{}'", self.1));
        let response = self.0.call(session, self.1).await?;
        expect_one_of(&response, &[StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND])?;
        scope.pass(format!("Invalid ID format handling works: {}", response.status));
        Ok(())
    }
}

struct UpdateBook;

#[async_trait]
impl TestBody<ApiSession> for UpdateBook {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let created = create_book(session, scope, &CreateBookRequest::unique("Original Book", "Original Author", 3)).await?;

        let update = UpdateBookRequest {
            title: format!("Updated Book {}", Uuid::new_v4()),
            author: "Updated Author".to_string(),
            published_date: days_ago(0),
        };
        scope.info(format!("Updating with new title: {}", update.title));
        let response = session.client.put(&format!("/Books/{}", created.id), &update).await?;
        response.expect_status(StatusCode::NO_CONTENT)?;
        scope.pass("Update status code correct: 204 No Content");

        let updated = fetch_book(session, &created.id).await?;
        ensure_that!(updated.title == update.title, "title {:?} != {:?}", updated.title, update.title);
        ensure_that!(updated.author == update.author, "author {:?} != {:?}", updated.author, update.author);
        ensure_that!(updated.isbn == created.isbn, "isbn changed from {:?} to {:?}", created.isbn, updated.isbn);
        ensure_that!(
            updated.published_date == update.published_date,
            "published date {} != {}",
            updated.published_date,
            update.published_date
        );
        scope.pass("Book updated successfully with correct data");
        Ok(())
    }
}

struct DeleteBook;

#[async_trait]
impl TestBody<ApiSession> for DeleteBook {
    async fn run(&self, session: &ApiSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        let created = create_book(session, scope, &CreateBookRequest::unique("Book to Delete", "Delete Author", 0)).await?;
        let endpoint = format!("/Books/{}", created.id);

        session.client.get(&endpoint).await?.expect_status(StatusCode::OK)?;
        scope.pass("Book exists before deletion");

        session.client.delete(&endpoint).await?.expect_status(StatusCode::NO_CONTENT)?;
        scope.pass("Delete status code correct: 204 No Content");

        match session.client.get(&endpoint).await?.status {
            StatusCode::NOT_FOUND => {
                scope.pass("Book no longer retrievable");
                Ok(())
            }
            status => Err(HarnessError::assertion(format!(
                "deleted book {} still answers {}",
                created.id, status
            ))),
        }
    }
}

/// Every case of the suite
pub fn suite() -> Vec<TestCase<ApiSession>> {
    let mut cases = vec![
        TestCase::new("Create Book - Valid Book", CATEGORY, CreateValidBook),
        TestCase::new("Create Book - Duplicate ISBN", CATEGORY, DuplicateIsbnRejected),
        TestCase::new("Get All Books", CATEGORY, ListBooks),
        TestCase::new("Get Book by ID - Valid ID", CATEGORY, GetBookById),
        TestCase::new("Update Book - Valid Data", CATEGORY, UpdateBook),
        TestCase::new("Delete Book - Valid ID", CATEGORY, DeleteBook),
    ];

    for op in [ById::Get, ById::Update, ById::Delete] {
        cases.push(TestCase::new(
            format!("{} - Non-existent ID", op.label()),
            CATEGORY,
            UnknownId(op),
        ));
    }

    let invalid: [(ById, &[&'static str]); 3] = [
        (ById::Get, &["invalid-guid", "12345", "not-a-guid"]),
        (ById::Update, &["invalid", "123", "not-a-valid-guid"]),
        (ById::Delete, &["invalid-id", "123abc"]),
    ];
    for (op, ids) in invalid {
        for &id in ids {
            cases.push(TestCase::new(
                format!("{} - Invalid ID Format: {}", op.label(), id),
                CATEGORY,
                InvalidId(op, id),
            ));
        }
    }

    cases
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_book_uses_camel_case() {
        let book: Book = serde_json::from_str(
            r#"{"id":"7f9c","title":"Emma","author":"Austen","isbn":"978-1","publishedDate":"2020-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        assert_eq!(book.id, "7f9c");
        assert_eq!(book.published_date.to_rfc3339(), "2020-01-02T03:04:05+00:00");

        let update = serde_json::to_value(UpdateBookRequest {
            title: "t".to_string(),
            author: "a".to_string(),
            published_date: book.published_date,
        })
        .unwrap();
        assert!(update.get("publishedDate").is_some());
        assert!(update.get("isbn").is_none());
    }

    #[test]
    fn test_random_isbn_shape() {
        let isbn = random_isbn();
        assert!(isbn.starts_with("978-"));
        assert_eq!(isbn.len(), 13);
        assert!(isbn[4..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_suite_names_are_unique() {
        let cases = suite();
        let names: HashSet<_> = cases.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names.len(), cases.len());
        assert_eq!(cases.len(), 17);
        assert!(cases.iter().all(|c| c.category == CATEGORY));
    }
}
