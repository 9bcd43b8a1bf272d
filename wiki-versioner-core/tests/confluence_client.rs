use serial_test::serial;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use tempfile::tempdir;

use wiki_versioner_core::contract::{ExportError, PageFetchResult, PageSource};
use wiki_versioner_core::export::confluence::{ConfluenceClient, EMAIL_ENV, TOKEN_ENV};
use wiki_versioner_core::export::{ExportFormat, ExportSettings, Exporter};

fn ensure_env_loaded_from_workspace() {
    // Loads .env from the workspace root regardless of cwd.
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let env_path = Path::new(&manifest_dir).join("../.env");
        let _ = dotenvy::from_path(env_path);
    }
}

/// Serves canned JSON bodies keyed by request target, split over two pages
/// with v1-style relative `next` links.
fn serve_paged_listings() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                    break;
                }
            }
            let target = request_line.split_whitespace().nth(1).unwrap_or("");
            let (status, body) = match target {
                "/wiki/rest/api/content/5/version" => (
                    "200 OK",
                    r#"{"results": [{"number": 1, "when": "2024-01-01"}, {"number": 2, "when": "2024-02-01"}],
                        "_links": {"next": "/rest/api/content/5/version?start=2"}}"#,
                ),
                "/wiki/rest/api/content/5/version?start=2" => (
                    "200 OK",
                    r#"{"results": [{"number": 3, "when": "2024-03-01"}], "_links": {}}"#,
                ),
                "/wiki/rest/api/content/5/child/attachment?expand=version" => (
                    "200 OK",
                    r#"{"results": [{"id": "att1", "title": "a.png", "version": {"number": 1},
                                     "_links": {"download": "/download/attachments/5/a.png"}}],
                        "_links": {"next": "/rest/api/content/5/child/attachment?expand=version&start=1"}}"#,
                ),
                "/wiki/rest/api/content/5/child/attachment?expand=version&start=1" => (
                    "200 OK",
                    r#"{"results": [{"id": "att2", "title": "b.pdf", "version": {"number": 4},
                                     "_links": {"download": "/download/attachments/5/b.pdf"}}]}"#,
                ),
                _ => ("404 Not Found", "{}"),
            };
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

fn local_client(base_url: &str) -> ConfluenceClient {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    ConfluenceClient::new(base_url, "a", "b").with_http_client(http)
}

#[tokio::test]
async fn version_listing_follows_next_links() {
    let client = local_client(&serve_paged_listings());

    let versions = client.page_versions("5").await.expect("versions listed");

    let numbers: Vec<i64> = versions.iter().map(|v| v.number).collect();
    assert_eq!(numbers, [1, 2, 3]);
    assert_eq!(versions[2].when, "2024-03-01");
}

#[tokio::test]
async fn attachment_listing_follows_next_links() {
    let client = local_client(&serve_paged_listings());

    let attachments = client.attachments("5").await.expect("attachments listed");

    let ids: Vec<&str> = attachments.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, ["att1", "att2"]);
    assert_eq!(attachments[1].version, Some(4));
    assert_eq!(attachments[1].download_path, "/wiki/download/attachments/5/b.pdf");
}

#[test]
#[serial]
fn from_env_requires_both_credentials() {
    let saved_email = std::env::var(EMAIL_ENV).ok();
    let saved_token = std::env::var(TOKEN_ENV).ok();

    std::env::remove_var(EMAIL_ENV);
    std::env::set_var(TOKEN_ENV, "token");
    let missing_email = ConfluenceClient::from_env("https://example.atlassian.net");

    std::env::set_var(EMAIL_ENV, "someone@example.com");
    std::env::remove_var(TOKEN_ENV);
    let missing_token = ConfluenceClient::from_env("https://example.atlassian.net");

    std::env::set_var(TOKEN_ENV, "token");
    let complete = ConfluenceClient::from_env("https://example.atlassian.net/");

    for (key, value) in [(EMAIL_ENV, saved_email), (TOKEN_ENV, saved_token)] {
        match value {
            Some(v) => std::env::set_var(key, v),
            None => std::env::remove_var(key),
        }
    }

    assert!(matches!(
        missing_email,
        Err(ExportError::MissingCredentials(name)) if name == EMAIL_ENV
    ));
    assert!(matches!(
        missing_token,
        Err(ExportError::MissingCredentials(name)) if name == TOKEN_ENV
    ));
    let client = complete.expect("both credentials set");
    assert_eq!(client.base_url(), "https://example.atlassian.net");
    assert_eq!(client.word_export_path("42"), "/wiki/exportword?pageId=42");
}

/// Runs against a real Confluence site when `CONFLUENCE_TEST_URL` and
/// `CONFLUENCE_TEST_PAGE_ID` are set (e.g. in the workspace `.env`).
#[tokio::test]
#[serial]
async fn live_export_of_a_single_page() {
    ensure_env_loaded_from_workspace();
    let (Ok(url), Ok(page_id)) = (
        std::env::var("CONFLUENCE_TEST_URL"),
        std::env::var("CONFLUENCE_TEST_PAGE_ID"),
    ) else {
        eprintln!("CONFLUENCE_TEST_URL / CONFLUENCE_TEST_PAGE_ID not set, skipping live test");
        return;
    };
    let client = ConfluenceClient::from_env(&url).expect("credentials in environment");

    match client.fetch_page(&page_id, None).await {
        PageFetchResult::Ok(page) => assert_eq!(page.id, page_id),
        PageFetchResult::Error { kind, message } => {
            panic!("fetching page {page_id} failed: {kind:?} {message}")
        }
    }

    let out = tempdir().unwrap();
    let settings = ExportSettings {
        output_dir: out.path().to_path_buf(),
        site_url: url.clone(),
        format: ExportFormat::Markdown,
        export_versions: false,
        export_attachments: false,
    };
    let report = Exporter::new(client, settings)
        .export(&[page_id])
        .await
        .expect("live export should succeed");
    assert!(report.pages >= 1);
}
