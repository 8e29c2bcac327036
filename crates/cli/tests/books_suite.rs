//! The Books suite end to end against an in-memory Books API

use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use webtests_cli::books::{Book, CreateBookRequest, UpdateBookRequest};
use webtests_cli::commands::api::run_suite;
use webtests_e2e::{HarnessConfig, TestStatus};

/// Minimal Books API keeping its state in memory
#[derive(Clone, Default)]
struct BooksApi {
    books: Arc<Mutex<BTreeMap<String, Book>>>,
}

impl Respond for BooksApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let segments: Vec<&str> = request.url.path().trim_matches('/').split('/').collect();
        let mut books = self.books.lock();

        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["Books"]) => ResponseTemplate::new(200).set_body_json(books.values().collect::<Vec<_>>()),
            ("POST", ["Books"]) => {
                let Ok(create) = serde_json::from_slice::<CreateBookRequest>(&request.body) else {
                    return ResponseTemplate::new(400);
                };
                if books.values().any(|b| b.isbn == create.isbn) {
                    return ResponseTemplate::new(409).set_body_json(json!({ "error": "duplicate isbn" }));
                }
                let book = Book {
                    id: Uuid::new_v4().to_string(),
                    title: create.title,
                    author: create.author,
                    isbn: create.isbn,
                    published_date: create.published_date,
                };
                books.insert(book.id.clone(), book.clone());
                ResponseTemplate::new(201).set_body_json(book)
            }
            (verb, ["Books", id]) => {
                if Uuid::parse_str(id).is_err() {
                    return ResponseTemplate::new(400);
                }
                let id = id.to_string();
                match verb {
                    "GET" => match books.get(&id) {
                        Some(book) => ResponseTemplate::new(200).set_body_json(book),
                        None => ResponseTemplate::new(404),
                    },
                    "PUT" => {
                        let Ok(update) = serde_json::from_slice::<UpdateBookRequest>(&request.body) else {
                            return ResponseTemplate::new(400);
                        };
                        match books.get_mut(&id) {
                            Some(book) => {
                                book.title = update.title;
                                book.author = update.author;
                                book.published_date = update.published_date;
                                ResponseTemplate::new(204)
                            }
                            None => ResponseTemplate::new(404),
                        }
                    }
                    "DELETE" => match books.remove(&id) {
                        Some(_) => ResponseTemplate::new(204),
                        None => ResponseTemplate::new(404),
                    },
                    _ => ResponseTemplate::new(405),
                }
            }
            _ => ResponseTemplate::new(404),
        }
    }
}

fn config(server: &MockServer, output: &std::path::Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.api.base_url = server.uri();
    config.api.token_url = format!("{}/connect/token", server.uri());
    config.api.client_id = "suite-client".to_string();
    config.api.client_secret = "suite-secret".to_string();
    config.report.output_dir = output.to_path_buf();
    config
}

#[tokio::test]
async fn suite_passes_and_leaves_no_books_behind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "suite-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    let api = BooksApi::default();
    Mock::given(path_regex("^/Books"))
        .respond_with(api.clone())
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = run_suite(&config(&server, dir.path()), None).await.unwrap();

    let failed: Vec<_> = report
        .summary
        .outcomes
        .iter()
        .filter(|o| o.status != TestStatus::Passed)
        .map(|o| format!("{}: {:?}", o.name, o.error))
        .collect();
    assert!(failed.is_empty(), "unexpected failures: {:#?}", failed);
    assert_eq!(report.summary.total, 17);

    // Five cases create books, the delete case removes its own
    assert_eq!(report.cleanup.len(), 5);
    assert_eq!(report.cleanup_failures(), 0);
    assert!(api.books.lock().is_empty());

    let html = report.report_path.expect("html report");
    assert!(html.starts_with(dir.path()));
    server.verify().await;
}

#[tokio::test]
async fn filter_selects_cases_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "suite-token",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;
    Mock::given(path_regex("^/Books"))
        .respond_with(BooksApi::default())
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = run_suite(&config(&server, dir.path()), Some("Invalid ID Format"))
        .await
        .unwrap();

    assert_eq!(report.summary.total, 8);
    assert_eq!(report.summary.passed, 8);
    assert!(report.cleanup.is_empty());
}

#[tokio::test]
async fn rejected_credentials_fail_every_case() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;
    Mock::given(path_regex("^/Books"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = run_suite(&config(&server, dir.path()), None).await.unwrap();

    assert_eq!(report.summary.failed, report.summary.total);
    assert!(!report.success());
    assert!(report
        .summary
        .outcomes
        .iter()
        .all(|o| o.error.as_deref().unwrap_or("").contains("Authentication failed")));
    server.verify().await;
}
