use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::domain::{AnalysisResult, Link};
use crate::error::AnalyzeError;
use crate::link_checker::LinkChecker;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches a page, parses it, extracts metrics and the link set, then hands
/// the links to the link checker.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        url: &str,
        token: CancellationToken,
    ) -> Result<(AnalysisResult, Vec<Link>), AnalyzeError>;
}

pub struct HtmlAnalyzer {
    client: reqwest::Client,
    link_checker: Arc<LinkChecker>,
}

impl HtmlAnalyzer {
    pub fn new(client: reqwest::Client, link_checker: Arc<LinkChecker>) -> Self {
        Self {
            client,
            link_checker,
        }
    }
}

#[async_trait]
impl Analyzer for HtmlAnalyzer {
    async fn analyze(
        &self,
        url: &str,
        token: CancellationToken,
    ) -> Result<(AnalysisResult, Vec<Link>), AnalyzeError> {
        let request_url = Url::parse(url).map_err(|e| AnalyzeError::Parse(e.to_string()))?;

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AnalyzeError::Cancelled),
            resp = self.client.get(request_url.clone()).timeout(FETCH_TIMEOUT).send() => {
                resp?.text().await?
            }
        };

        let html_version = doctype_version(&body);
        let (title, has_login_form, h1, h2, h3, h4, h5, h6, mut links) = {
            let document = Html::parse_document(&body);
            let title = extract_title(&document);
            let has_login_form = has_login_form(&document);
            let (h1, h2, h3, h4, h5, h6) = count_headings(&document);
            let links = extract_links(&document, &request_url);
            (title, has_login_form, h1, h2, h3, h4, h5, h6, links)
        };

        self.link_checker.check(&mut links, token).await;

        let internal_link_count = links.iter().filter(|l| !l.is_external).count() as i32;
        let external_link_count = links.iter().filter(|l| l.is_external).count() as i32;
        let broken_link_count = links.iter().filter(|l| l.is_broken()).count() as i32;

        let result = AnalysisResult {
            html_version,
            title,
            h1_count: h1,
            h2_count: h2,
            h3_count: h3,
            h4_count: h4,
            h5_count: h5,
            h6_count: h6,
            has_login_form,
            internal_link_count,
            external_link_count,
            broken_link_count,
        };

        Ok((result, links))
    }
}

/// The leading `<!doctype ...>` declaration, or `"unknown"` if absent.
/// A doctype beginning with "html" (case-insensitive) is reported as the
/// modern `"HTML 5"` literal; anything else is reported verbatim.
fn doctype_version(body: &str) -> String {
    let trimmed = body.trim_start();
    if !trimmed.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("<!")) {
        return "unknown".to_owned();
    }
    let lower = trimmed.to_ascii_lowercase();
    if !lower.starts_with("<!doctype") {
        return "unknown".to_owned();
    }
    let end = trimmed.find('>').unwrap_or(trimmed.len());
    let declaration = &trimmed[..end];
    let after_keyword = declaration["<!doctype".len()..].trim();
    if after_keyword.to_ascii_lowercase().starts_with("html") {
        "HTML 5".to_owned()
    } else {
        declaration.to_owned()
    }
}

fn extract_title(document: &Html) -> String {
    let selector = Selector::parse("title").expect("static selector is valid");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_owned())
        .unwrap_or_default()
}

fn has_login_form(document: &Html) -> bool {
    let form_selector = Selector::parse("form").expect("static selector is valid");
    let password_selector =
        Selector::parse("input[type=password]").expect("static selector is valid");
    document
        .select(&form_selector)
        .any(|form| form.select(&password_selector).next().is_some())
}

fn count_headings(document: &Html) -> (i32, i32, i32, i32, i32, i32) {
    let mut counts = [0i32; 6];
    for (i, tag) in ["h1", "h2", "h3", "h4", "h5", "h6"].iter().enumerate() {
        let selector = Selector::parse(tag).expect("static selector is valid");
        counts[i] = document.select(&selector).count() as i32;
    }
    (counts[0], counts[1], counts[2], counts[3], counts[4], counts[5])
}

fn extract_links(document: &Html, request_url: &Url) -> Vec<Link> {
    let selector = Selector::parse("a[href]").expect("static selector is valid");
    let request_host = request_url.host_str();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = request_url.join(href) else {
            continue;
        };
        let absolute = resolved.to_string();
        if absolute.is_empty() || !seen.insert(absolute.clone()) {
            continue;
        }
        let is_external = resolved.host_str() != request_host;
        links.push(Link {
            href: absolute,
            is_external,
            status_code: 0,
        });
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctype_html5() {
        assert_eq!(doctype_version("<!doctype html><title>x</title>"), "HTML 5");
        assert_eq!(doctype_version("<!DOCTYPE HTML>"), "HTML 5");
    }

    #[test]
    fn doctype_missing_is_unknown() {
        assert_eq!(doctype_version("<title>x</title>"), "unknown");
    }

    #[test]
    fn doctype_legacy_is_verbatim() {
        let body = r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 4.01//EN">"#;
        assert_eq!(doctype_version(body), body);
    }

    #[test]
    fn title_is_trimmed() {
        let doc = Html::parse_document("<html><head><title>  Hello  </title></head></html>");
        assert_eq!(extract_title(&doc), "Hello");
    }

    #[test]
    fn detects_login_form() {
        let doc = Html::parse_document(
            r#"<form><input type="text"><input type="password"></form>"#,
        );
        assert!(has_login_form(&doc));
    }

    #[test]
    fn no_password_input_is_not_a_login_form() {
        let doc = Html::parse_document(r#"<form><input type="text"></form>"#);
        assert!(!has_login_form(&doc));
    }

    #[test]
    fn links_deduplicated_and_classified() {
        let doc = Html::parse_document(
            r#"<a href="/a"></a><a href="/a"></a><a href="http://other.example/b"></a>"#,
        );
        let base = Url::parse("http://h.example/").unwrap();
        let links = extract_links(&doc, &base);
        assert_eq!(links.len(), 2);
        assert!(!links[0].is_external);
        assert!(links[1].is_external);
    }

    #[test]
    fn heading_counts() {
        let doc = Html::parse_document("<h1>a</h1><h1>b</h1><h2>c</h2>");
        let (h1, h2, h3, h4, h5, h6) = count_headings(&doc);
        assert_eq!((h1, h2, h3, h4, h5, h6), (2, 1, 0, 0, 0, 0));
    }
}
