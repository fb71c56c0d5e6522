//! Blog/article scraping.
//!
//! Fetches a page and pulls out readable text plus the usual metadata so it
//! can be used as a chat source like an uploaded document.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::documents::collapse_whitespace;
use crate::error::ApiError;
use crate::server::AppState;

/// Containers tried in order when looking for the main article body.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[role=\"main\"]",
    ".content",
    ".post-content",
    ".entry-content",
    "main",
    ".blog-content",
];

const TEXT_BLOCKS: &str = "p, h1, h2, h3, h4, h5, h6, li, blockquote";

/// Blocks this short are navigation crumbs, not content.
const MIN_BLOCK_CHARS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPage {
    pub title: String,
    pub content: String,
    pub author: String,
    pub published_date: String,
    pub description: String,
    pub keywords: String,
    pub images: Vec<String>,
    pub links: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    pub data: ScrapedPage,
    pub url: String,
    pub scraped_at: String,
}

pub async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    let Json(req) = payload?;
    let raw = req
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("URL is required"))?;
    let url = parse_http_url(&raw)?;

    info!("Scraping {}", url);
    let html = fetch(&state, &url).await?;
    let data = ScrapedPage::from_html(&html);
    debug!("Scraped {} chars of content from {}", data.content.len(), url);

    Ok(Json(ScrapeResponse {
        success: true,
        data,
        url: raw,
        scraped_at: Utc::now().to_rfc3339(),
    }))
}

fn parse_http_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw)
        .map_err(|e| ApiError::bad_request(format!("Invalid URL format: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ApiError::bad_request(format!(
            "Invalid URL format: unsupported scheme {}",
            scheme
        ))),
    }
}

async fn fetch(state: &AppState, url: &Url) -> Result<String, ApiError> {
    let cfg = &state.cfg.scrape;
    let result = state
        .http
        .get(url.clone())
        .header(reqwest::header::USER_AGENT, cfg.user_agent.as_str())
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .send()
        .await
        .and_then(|r| r.error_for_status());

    let response = match result {
        Ok(r) => r,
        Err(e) => return Err(fetch_error(url, e)),
    };
    response.text().await.map_err(|e| fetch_error(url, e))
}

fn fetch_error(url: &Url, e: reqwest::Error) -> ApiError {
    warn!("Scraping {} failed: {}", url, e);
    if e.is_timeout() {
        ApiError::new(StatusCode::REQUEST_TIMEOUT, "Request timeout")
    } else if e.is_connect() {
        ApiError::new(StatusCode::NOT_FOUND, "URL not found or unreachable")
    } else {
        ApiError::internal("Failed to scrape the URL. Please check if the URL is accessible.")
    }
}

impl ScrapedPage {
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);

        let title = first_text(&document, "title")
            .or_else(|| first_text(&document, "h1"))
            .or_else(|| meta_content(&document, "meta[property=\"og:title\"]"))
            .unwrap_or_default();

        let author = all_text(&document, ".author, .byline, [rel=\"author\"]")
            .or_else(|| meta_content(&document, "meta[name=\"author\"]"))
            .unwrap_or_default();

        let published_date = first_attr(&document, "time", "datetime")
            .or_else(|| meta_content(&document, "meta[property=\"article:published_time\"]"))
            .or_else(|| all_text(&document, ".date, .published"))
            .unwrap_or_default();

        let description = meta_content(&document, "meta[name=\"description\"]")
            .or_else(|| meta_content(&document, "meta[property=\"og:description\"]"))
            .unwrap_or_default();

        let keywords = meta_content(&document, "meta[name=\"keywords\"]").unwrap_or_default();

        let images = select(&document, "img")
            .into_iter()
            .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
            .filter(|src| src.starts_with("http"))
            .map(str::to_string)
            .collect();

        let links = select(&document, "a[href]")
            .into_iter()
            .filter_map(|el| el.value().attr("href"))
            .filter(|href| href.starts_with("http"))
            .map(str::to_string)
            .collect();

        Self {
            title,
            content: main_content(&document),
            author,
            published_date,
            description,
            keywords,
            images,
            links,
        }
    }
}

fn main_content(document: &Html) -> String {
    let containers = CONTENT_SELECTORS
        .iter()
        .map(|s| select(document, s))
        .find(|found| !found.is_empty())
        .unwrap_or_else(|| select(document, "body"));

    let Ok(blocks) = Selector::parse(TEXT_BLOCKS) else {
        return String::new();
    };
    let texts: Vec<String> = containers
        .iter()
        .flat_map(|c| c.select(&blocks))
        .map(element_text)
        .filter(|t| t.len() > MIN_BLOCK_CHARS)
        .collect();

    collapse_whitespace(&texts.join("\n\n"))
}

fn select<'a>(document: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => document.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    select(document, selector)
        .into_iter()
        .next()
        .map(element_text)
        .and_then(non_empty)
}

fn all_text(document: &Html, selector: &str) -> Option<String> {
    let text: String = select(document, selector)
        .into_iter()
        .flat_map(|el| el.text())
        .collect();
    non_empty(text.trim().to_string())
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    select(document, selector)
        .into_iter()
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
        .and_then(non_empty)
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    first_attr(document, selector, "content")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<!doctype html>
<html><head>
  <title> My Post </title>
  <meta name="description" content="A post about things">
  <meta name="keywords" content="rust, web">
  <meta name="author" content="Meta Author">
</head><body>
  <nav><p>Navigation link that is long enough</p></nav>
  <article>
    <h1>Heading of the post</h1>
    <p>First   paragraph
       with wrapped text.</p>
    <p>short</p>
    <span class="byline">Jane Doe</span>
    <time datetime="2024-05-01T10:00:00Z">May 1</time>
    <img src="https://cdn.example.com/a.png">
    <img data-src="https://cdn.example.com/b.png">
    <img src="/relative.png">
    <a href="https://example.com/next">next</a>
    <a href="/local">local</a>
  </article>
</body></html>"#;

    #[test]
    fn test_extracts_article() {
        let page = ScrapedPage::from_html(ARTICLE);
        assert_eq!(page.title, "My Post");
        assert_eq!(
            page.content,
            "Heading of the post First paragraph with wrapped text."
        );
        assert_eq!(page.author, "Jane Doe");
        assert_eq!(page.published_date, "2024-05-01T10:00:00Z");
        assert_eq!(page.description, "A post about things");
        assert_eq!(page.keywords, "rust, web");
        assert_eq!(
            page.images,
            vec![
                "https://cdn.example.com/a.png".to_string(),
                "https://cdn.example.com/b.png".to_string()
            ]
        );
        assert_eq!(page.links, vec!["https://example.com/next".to_string()]);
    }

    #[test]
    fn test_falls_back_to_body_and_meta() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <meta property="og:description" content="OG description">
            <meta name="author" content="Meta Author">
        </head><body><div><p>Paragraph living directly in the body.</p></div></body></html>"#;
        let page = ScrapedPage::from_html(html);
        assert_eq!(page.title, "OG Title");
        assert_eq!(page.description, "OG description");
        assert_eq!(page.author, "Meta Author");
        assert_eq!(page.content, "Paragraph living directly in the body.");
        assert!(page.images.is_empty());
    }

    #[test]
    fn test_url_validation() {
        assert!(parse_http_url("https://example.com/post").is_ok());
        assert_eq!(
            parse_http_url("not a url").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_http_url("ftp://example.com/file").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
    }
}
