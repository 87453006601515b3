//! Text extraction from local files and web pages.
//!
//! Only text-like formats are read here; anything else is reported as an
//! error, which ingestion treats as an empty document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::core::errors::RagError;

const TEXT_EXTENSIONS: [&str; 8] = ["txt", "md", "markdown", "rst", "csv", "json", "log", "xml"];
const HTML_EXTENSIONS: [&str; 2] = ["html", "htm"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    /// Source label stored with every chunk: file name or page URL.
    pub name: String,
    pub text: String,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, location: &str) -> Result<ExtractedDocument, RagError>;
}

pub fn is_url(location: &str) -> bool {
    let lower = location.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Parses an absolute http(s) URL with a host.
pub fn parse_web_url(location: &str) -> Result<Url, RagError> {
    let url = Url::parse(location.trim())
        .map_err(|err| RagError::Configuration(format!("invalid URL '{}': {}", location, err)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(RagError::Configuration(format!(
            "'{}' is not an http(s) URL",
            location
        )));
    }
    Ok(url)
}

#[derive(Debug, Clone, Default)]
pub struct FileExtractor;

impl FileExtractor {
    fn read(path: &Path) -> Result<String, RagError> {
        let ext = extension_of(path);
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        if HTML_EXTENSIONS.contains(&ext.as_str()) {
            Ok(strip_html_tags(&text))
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Ok(text)
        } else {
            Err(RagError::Configuration(format!(
                "no text extractor for '{}'",
                path.display()
            )))
        }
    }
}

#[async_trait]
impl DocumentExtractor for FileExtractor {
    async fn extract(&self, location: &str) -> Result<ExtractedDocument, RagError> {
        let path = PathBuf::from(location);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.to_string());

        let read_path = path.clone();
        let text = tokio::task::spawn_blocking(move || Self::read(&read_path))
            .await
            .map_err(|err| RagError::Io(std::io::Error::other(err)))??;

        Ok(ExtractedDocument { name, text })
    }
}

#[derive(Clone)]
pub struct WebExtractor {
    client: Client,
}

impl WebExtractor {
    pub fn new(timeout_secs: u64) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| RagError::Configuration(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentExtractor for WebExtractor {
    async fn extract(&self, location: &str) -> Result<ExtractedDocument, RagError> {
        let url = parse_web_url(location)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(RagError::backend)?;

        if !response.status().is_success() {
            return Err(RagError::Backend(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("html"))
            .unwrap_or(false);
        let body = response.text().await.map_err(RagError::backend)?;

        let text = if is_html || body.trim_start().starts_with('<') {
            strip_html_tags(&body)
        } else {
            body
        };

        Ok(ExtractedDocument {
            name: location.trim().to_string(),
            text,
        })
    }
}

/// Routes URLs to the web extractor and everything else to the file extractor.
#[derive(Clone)]
pub struct SourceExtractor {
    files: FileExtractor,
    web: WebExtractor,
}

impl SourceExtractor {
    pub fn new(web_timeout_secs: u64) -> Result<Self, RagError> {
        Ok(Self {
            files: FileExtractor,
            web: WebExtractor::new(web_timeout_secs)?,
        })
    }
}

#[async_trait]
impl DocumentExtractor for SourceExtractor {
    async fn extract(&self, location: &str) -> Result<ExtractedDocument, RagError> {
        if is_url(location) {
            self.web.extract(location).await
        } else {
            self.files.extract(location).await
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Files directly inside `dir`, optionally filtered by extension, sorted by name.
///
/// A missing directory yields an empty list.
pub fn list_documents(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, RagError> {
    if !dir.exists() {
        tracing::warn!("Documents folder {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let wanted: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if wanted.is_empty() || wanted.contains(&extension_of(&path)) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reduces an HTML page to its visible text, one non-empty line per line.
pub fn strip_html_tags(html: &str) -> String {
    let chars: Vec<char> = html.chars().collect();

    // tag names are ASCII, so matching never depends on how other text folds
    let starts_with = |i: usize, pat: &str| -> bool {
        let mut at = i;
        for expected in pat.chars() {
            match chars.get(at) {
                Some(c) if c.eq_ignore_ascii_case(&expected) => at += 1,
                _ => return false,
            }
        }
        true
    };

    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let mut i = 0;

    while i < chars.len() {
        if let Some(end) = skip_until {
            if starts_with(i, end) {
                skip_until = None;
                i += end.chars().count();
            } else {
                i += 1;
            }
            continue;
        }

        if starts_with(i, "<script") {
            skip_until = Some("</script>");
            continue;
        }
        if starts_with(i, "<style") {
            skip_until = Some("</style>");
            continue;
        }
        if starts_with(i, "<!--") {
            skip_until = Some("-->");
            continue;
        }

        match chars[i] {
            '<' => {
                in_tag = true;
                if starts_with(i, "<br") || starts_with(i, "<p") || starts_with(i, "</p") {
                    out.push('\n');
                }
            }
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
        i += 1;
    }

    decode_entities(&out)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = "<html><head><style>p { color: red; }</style>\
                    <script type=\"text/javascript\">var x = '<b>';</script></head>\
                    <body><h1>Title</h1><!-- hidden --><p>Fish &amp; chips</p>\
                    <P>Second<br/>line</P></body></html>";
        assert_eq!(strip_html_tags(html), "Title\nFish & chips\nSecond\nline");
    }

    #[test]
    fn uppercase_blocks_are_skipped_next_to_non_ascii_text() {
        let html = "<P>İstanbul</P><SCRIPT>var hidden = 1;</SCRIPT><STYLE>p{}</STYLE><p>Ankara</p>";
        assert_eq!(strip_html_tags(html), "İstanbul\nAnkara");
    }

    #[test]
    fn url_detection_and_validation() {
        assert!(is_url("https://example.com/page"));
        assert!(is_url("HTTP://example.com"));
        assert!(!is_url("documents/manual.txt"));

        assert!(parse_web_url("https://example.com/a").is_ok());
        assert!(matches!(parse_web_url("ftp://example.com"), Err(RagError::Configuration(_))));
        assert!(parse_web_url("not a url").is_err());
    }

    #[test]
    fn listing_filters_by_extension_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.txt", "a.md", "c.PDF", "d.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let all = list_documents(dir.path(), &[]).unwrap();
        assert_eq!(all.len(), 4);

        let txt = list_documents(dir.path(), &[".txt".to_string()]).unwrap();
        let names: Vec<String> = txt
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.txt", "d.txt"]);

        let pdf = list_documents(dir.path(), &["pdf".to_string()]).unwrap();
        assert_eq!(pdf.len(), 1);
    }

    #[test]
    fn missing_folder_lists_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(list_documents(&dir.path().join("absent"), &[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn files_are_read_by_type() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("notes.txt");
        let html = dir.path().join("page.html");
        let pdf = dir.path().join("scan.pdf");
        std::fs::write(&txt, "plain words").unwrap();
        std::fs::write(&html, "<p>marked up</p>").unwrap();
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();

        let extractor = FileExtractor;
        let doc = extractor.extract(txt.to_str().unwrap()).await.unwrap();
        assert_eq!(doc, ExtractedDocument { name: "notes.txt".to_string(), text: "plain words".to_string() });

        let doc = extractor.extract(html.to_str().unwrap()).await.unwrap();
        assert_eq!(doc.text, "marked up");

        assert!(extractor.extract(pdf.to_str().unwrap()).await.is_err());
        assert!(extractor.extract("/definitely/not/here.txt").await.is_err());
    }

    #[tokio::test]
    async fn web_pages_are_fetched_and_stripped() {
        let (url, _seen) = crate::test_support::serve(vec![(
            200,
            "<html><body><p>Hello from the web</p></body></html>".to_string(),
        )])
        .await;

        let extractor = SourceExtractor::new(5).unwrap();
        let doc = extractor.extract(&format!("{}/page", url)).await.unwrap();
        assert_eq!(doc.text, "Hello from the web");
        assert!(doc.name.ends_with("/page"));
    }
}
