//! Document upload and text extraction.
//!
//! PDF text comes from `pdf-extract`; DOCX text is read from the
//! `word/document.xml` part of the package. Plain text is taken as UTF-8.

use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;
use docuchat_common::{Error, Result};
use regex_lite::Regex;
use serde::Serialize;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::server::AppState;

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_DOC: &str = "application/msword";
const MIME_TEXT: &str = "text/plain";

/// Upload formats we can extract text from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Word,
    Text,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            MIME_PDF => Some(Self::Pdf),
            MIME_DOCX | MIME_DOC => Some(Self::Word),
            MIME_TEXT => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub page_count: usize,
    pub word_count: usize,
    pub file_type: String,
    pub file_size: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub file_name: String,
    pub processed_at: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessDocumentResponse {
    pub success: bool,
    pub data: ProcessedDocument,
}

struct Upload {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

pub async fn process_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> std::result::Result<Json<ProcessDocumentResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?;
        upload = Some(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    info!(
        "Processing upload {} ({}, {} bytes)",
        upload.file_name,
        upload.content_type,
        upload.bytes.len()
    );

    let kind = DocumentKind::from_mime(&upload.content_type).ok_or_else(|| {
        ApiError::bad_request("Invalid file type. Only PDF, DOCX, DOC, and TXT files are allowed.")
    })?;

    let max = state.cfg.documents.max_upload_bytes;
    if upload.bytes.len() > max {
        return Err(ApiError::bad_request(format!(
            "File size too large. Maximum size is {}MB.",
            max / (1024 * 1024)
        )));
    }

    let Upload {
        file_name,
        content_type,
        bytes,
    } = upload;
    let file_size = bytes.len();

    let name = file_name.clone();
    let extracted = tokio::task::spawn_blocking(move || extract(kind, &name, &bytes))
        .await
        .map_err(|e| ApiError::internal(format!("extraction task failed: {}", e)))?
        .map_err(|e| {
            warn!("Extraction failed for {}: {}", file_name, e);
            ApiError::internal("Failed to process DOCX file. The file might be corrupted.")
        })?;

    let content = collapse_whitespace(&extracted.text);
    if content.is_empty() {
        return Err(ApiError::bad_request("No readable content found in the document"));
    }
    debug!("Extracted {} chars from {}", content.len(), file_name);

    Ok(Json(ProcessDocumentResponse {
        success: true,
        data: ProcessedDocument {
            metadata: DocumentMetadata {
                title: file_name.clone(),
                author: String::new(),
                page_count: extracted.page_count,
                word_count: word_count(&content),
                file_type: content_type,
                file_size,
            },
            content,
            file_name,
            processed_at: Utc::now().to_rfc3339(),
        },
    }))
}

/// Raw text of a document plus its page count when known.
#[derive(Debug)]
pub struct Extracted {
    pub text: String,
    pub page_count: usize,
}

/// Extract text. A PDF that cannot be read degrades to a placeholder note
/// so the conversation can still proceed; a broken Word file is an error.
pub fn extract(kind: DocumentKind, file_name: &str, bytes: &[u8]) -> Result<Extracted> {
    match kind {
        DocumentKind::Text => Ok(Extracted {
            text: String::from_utf8_lossy(bytes).into_owned(),
            page_count: 0,
        }),
        DocumentKind::Word => Ok(Extracted {
            text: extract_docx_text(bytes)?,
            page_count: 0,
        }),
        DocumentKind::Pdf => match pdf_extract::extract_text_from_mem_by_pages(bytes) {
            Ok(pages) => Ok(Extracted {
                page_count: pages.len(),
                text: pages.join("\n"),
            }),
            Err(e) => {
                warn!("PDF extraction failed for {}: {}", file_name, e);
                Ok(Extracted {
                    text: pdf_placeholder(file_name, bytes.len(), &e.to_string()),
                    page_count: 0,
                })
            }
        },
    }
}

fn pdf_placeholder(file_name: &str, size: usize, error: &str) -> String {
    format!(
        "[PDF File: {}]\n\nThis is a PDF file that has been uploaded. PDF text extraction \
         encountered an error. The file contains {} KB of data.\n\nError: {}",
        file_name,
        size.div_ceil(1024),
        error
    )
}

/// Text runs, paragraph ends, tabs and line breaks of WordprocessingML.
const DOCX_TOKENS: &str = r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|</w:p>|<w:tab/>|<w:br/>";

/// Concatenate the text runs of `word/document.xml`, one line per paragraph.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("not a DOCX package: {}", e)))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| Error::Extraction(format!("missing document part: {}", e)))?
        .read_to_string(&mut xml)?;

    let tokens = Regex::new(DOCX_TOKENS).map_err(|e| Error::Internal(e.to_string()))?;
    let mut text = String::new();
    for caps in tokens.captures_iter(&xml) {
        match caps.get(1) {
            Some(run) => text.push_str(&unescape_xml(run.as_str())),
            None => match &caps[0] {
                "</w:p>" | "<w:br/>" => text.push('\n'),
                _ => text.push('\t'),
            },
        }
    }
    Ok(text)
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Replace every whitespace run with a single space and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}
