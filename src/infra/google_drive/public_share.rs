// =============================================================================
// PUBLIC SHARE DOWNLOADS
// =============================================================================
//
// Files shared as "anyone with the link" can be fetched without the service
// account through `uc?export=download`. Small files come straight back with a
// `Content-Disposition` header. Large ones first return an HTML page warning
// that the file can't be virus-scanned; the real link is on that page, either
// as an `<a id="uc-download-link">` or as a `download-form` with hidden inputs.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, Client, Response};
use std::sync::OnceLock;

use crate::core::drive::formatting::parse_human_bytes;
use crate::core::drive::{ChunkSource, DriveError, PublicShare};

pub const DEFAULT_SHARE_BASE: &str = "https://drive.google.com";

fn download_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<a[^>]*id="uc-download-link"[^>]*href="([^"]+)"|<a[^>]*href="([^"]+)"[^>]*id="uc-download-link""#)
            .unwrap()
    })
}

fn form_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)<form[^>]*id="download-form"[^>]*action="([^"]+)"[^>]*>(.*?)</form>"#).unwrap())
}

fn hidden_input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<input[^>]*type="hidden"[^>]*name="([^"]+)"[^>]*value="([^"]*)""#).unwrap())
}

fn size_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)class="uc-name-size"[^>]*>(.*?)</span>"#).unwrap())
}

fn error_caption_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)<p class="uc-error-caption"[^>]*>(.*?)</p>"#).unwrap())
}

fn error_subcaption_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)<p class="uc-error-subcaption"[^>]*>(.*?)</p>"#).unwrap())
}

fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"filename="([^"]+)"|filename\*=UTF-8''([^;\s]+)"#).unwrap())
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn unescape_html(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

fn strip_tags(raw: &str) -> String {
    unescape_html(tag_regex().replace_all(raw, "").trim())
}

/// What the confirmation page tells us.
#[derive(Debug, PartialEq, Eq)]
enum ConfirmationPage {
    Link { url: String, size: Option<u64> },
    Error(String),
    Unrecognised,
}

fn parse_confirmation_page(base: &str, html: &str) -> ConfirmationPage {
    let size = size_label_regex()
        .captures(html)
        .and_then(|c| strip_tags(&c[1]).split_whitespace().last().map(str::to_string))
        .and_then(|label| parse_human_bytes(&label));

    if let Some(caps) = download_link_regex().captures(html) {
        if let Some(href) = caps.get(1).or_else(|| caps.get(2)) {
            return ConfirmationPage::Link {
                url: absolute(base, &unescape_html(href.as_str())),
                size,
            };
        }
    }

    if let Some(caps) = form_regex().captures(html) {
        let action = absolute(base, &unescape_html(&caps[1]));
        let params: Vec<String> = hidden_input_regex()
            .captures_iter(&caps[2])
            .map(|input| {
                format!(
                    "{}={}",
                    urlencoding::encode(&unescape_html(&input[1])),
                    urlencoding::encode(&unescape_html(&input[2]))
                )
            })
            .collect();
        let separator = if action.contains('?') { '&' } else { '?' };
        return ConfirmationPage::Link {
            url: format!("{}{}{}", action, separator, params.join("&")),
            size,
        };
    }

    let caption = error_caption_regex()
        .captures(html)
        .map(|c| strip_tags(&c[1]));
    if let Some(caption) = caption {
        let subcaption = error_subcaption_regex()
            .captures(html)
            .map(|c| strip_tags(&c[1]))
            .unwrap_or_default();
        let message = if subcaption.is_empty() {
            caption
        } else {
            format!("{}\n{}", caption, subcaption)
        };
        return ConfirmationPage::Error(message);
    }

    ConfirmationPage::Unrecognised
}

fn absolute(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base, href.trim_start_matches('/'))
    }
}

fn disposition_name(response: &Response) -> Option<String> {
    let value = response.headers().get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
    let caps = filename_regex().captures(value)?;
    caps.get(1)
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            caps.get(2)
                .and_then(|m| urlencoding::decode(m.as_str()).ok())
                .map(|s| s.into_owned())
        })
}

fn network(e: reqwest::Error) -> DriveError {
    DriveError::Transfer(format!("Public download failed: {}", e))
}

/// Body of a public download, read chunk by chunk.
struct ShareSource {
    response: Response,
    name: String,
    total: Option<u64>,
    exact: bool,
}

#[async_trait]
impl ChunkSource for ShareSource {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    fn size_is_exact(&self) -> bool {
        self.exact
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DriveError> {
        let chunk = self.response.chunk().await.map_err(network)?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

pub struct PublicShareClient {
    client: Client,
    base: String,
}

impl Default for PublicShareClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicShareClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_SHARE_BASE)
    }

    pub fn with_base_url(base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, url: &str) -> Result<Response, DriveError> {
        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriveError::remote(
                status.as_u16(),
                status.canonical_reason().unwrap_or("public download refused"),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl PublicShare for PublicShareClient {
    async fn open(&self, file_id: &str) -> Result<Box<dyn ChunkSource>, DriveError> {
        let url = format!(
            "{}/uc?export=download&id={}",
            self.base,
            urlencoding::encode(file_id)
        );
        tracing::debug!(id = file_id, "Opening public download");
        let response = self.get(&url).await?;

        if let Some(name) = disposition_name(&response) {
            let total = response.content_length();
            return Ok(Box::new(ShareSource {
                response,
                name,
                total,
                exact: true,
            }));
        }

        // No attachment header: this is the virus-scan warning page.
        let html = response.text().await.map_err(network)?;
        let (link, page_size) = match parse_confirmation_page(&self.base, &html) {
            ConfirmationPage::Link { url, size } => (url, size),
            ConfirmationPage::Error(message) => return Err(DriveError::Transfer(message)),
            ConfirmationPage::Unrecognised => {
                return Err(DriveError::Transfer(
                    "public download returned an unrecognised page".to_string(),
                ))
            }
        };

        tracing::debug!(id = file_id, "Following confirmation link");
        let response = self.get(&link).await?;
        let name = disposition_name(&response).ok_or_else(|| {
            DriveError::Transfer("public download did not return a file".to_string())
        })?;
        // The page label is rounded, so it only counts as an estimate.
        let (total, exact) = match response.content_length() {
            Some(length) => (Some(length), true),
            None => (page_size, false),
        };
        Ok(Box::new(ShareSource {
            response,
            name,
            total,
            exact,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn drain(mut source: Box<dyn ChunkSource>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            out.extend(chunk);
        }
        out
    }

    #[test]
    fn parses_link_style_confirmation_page() {
        let html = r#"<span class="uc-name-size"><a href="/open?id=x">big.iso</a> (1.5G)</span>
            <a id="uc-download-link" class="goog-inline-block" href="/uc?export=download&amp;confirm=T0k&amp;id=x">Download anyway</a>"#;
        assert_eq!(
            parse_confirmation_page("https://drive.example.com", html),
            ConfirmationPage::Link {
                url: "https://drive.example.com/uc?export=download&confirm=T0k&id=x".to_string(),
                size: Some(1_610_612_736),
            }
        );
    }

    #[test]
    fn parses_form_style_confirmation_page() {
        let html = r#"<form id="download-form" action="https://usercontent.example.com/download" method="get">
            <input type="hidden" name="id" value="x">
            <input type="hidden" name="confirm" value="t">
            <input type="hidden" name="uuid" value="u-1">
            </form>"#;
        match parse_confirmation_page("https://drive.example.com", html) {
            ConfirmationPage::Link { url, size } => {
                assert_eq!(url, "https://usercontent.example.com/download?id=x&confirm=t&uuid=u-1");
                assert_eq!(size, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_error_page() {
        let html = r#"<p class="uc-error-caption">Sorry, you can't view or download this file at this time.</p>
            <p class="uc-error-subcaption">Too many users have viewed or downloaded this file recently.</p>"#;
        match parse_confirmation_page("https://drive.example.com", html) {
            ConfirmationPage::Error(message) => {
                assert!(message.starts_with("Sorry"));
                assert!(message.contains("Too many users"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn direct_download_uses_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("id", "small-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", r#"attachment; filename="notes.txt""#)
                    .set_body_bytes(b"hello".to_vec()),
            )
            .mount(&server)
            .await;

        let source = PublicShareClient::with_base_url(server.uri())
            .open("small-1")
            .await
            .unwrap();
        assert_eq!(source.file_name(), "notes.txt");
        assert_eq!(source.total_bytes(), Some(5));
        assert_eq!(drain(source).await, b"hello");
    }

    #[tokio::test]
    async fn follows_confirmation_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("confirm", "abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", r#"attachment; filename="big.bin""#)
                    .set_body_bytes(vec![7u8; 32]),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("id", "big-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><a id="uc-download-link" href="/uc?export=download&amp;confirm=abc&amp;id=big-1">Download</a></html>"#,
            ))
            .mount(&server)
            .await;

        let source = PublicShareClient::with_base_url(server.uri())
            .open("big-1")
            .await
            .unwrap();
        assert_eq!(source.file_name(), "big.bin");
        assert_eq!(drain(source).await.len(), 32);
    }

    #[tokio::test]
    async fn error_page_is_a_transfer_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<p class="uc-error-caption">Quota exceeded</p>"#,
            ))
            .mount(&server)
            .await;

        let result = PublicShareClient::with_base_url(server.uri()).open("q-1").await;
        match result {
            Err(DriveError::Transfer(message)) => assert_eq!(message, "Quota exceeded"),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected an error"),
        }
    }
}
