use indexmap::IndexSet;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::fetcher::PageSource;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern is valid")
});

const IMAGE_SUFFIXES: [&str; 4] = [".png", ".jpg", ".jpeg", ".gif"];

/// Fetch `url` and pull contact addresses out of it. A page that can't be
/// fetched simply has no addresses.
pub async fn fetch_emails(source: &dyn PageSource, url: &str) -> Vec<String> {
    match source.fetch(url).await {
        Ok(html) => {
            let emails = extract_emails(&html);
            debug!(url = %url, count = emails.len(), "Scanned page for emails");
            emails
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Error fetching emails");
            Vec::new()
        }
    }
}

/// Addresses found in text nodes and `mailto:` links, in document order,
/// without duplicates and without obvious junk.
pub fn extract_emails(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut found: IndexSet<String> = IndexSet::new();

    // Text nodes under <body>; html5ever always synthesizes one, but be lenient
    let body = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next());
    let scope = body.unwrap_or_else(|| document.root_element());
    for text in scope.text() {
        for m in EMAIL_RE.find_iter(text) {
            found.insert(m.as_str().to_string());
        }
    }

    if let Ok(mailto) = Selector::parse(r#"a[href^="mailto:"]"#) {
        for link in document.select(&mailto) {
            let Some(target) = link.value().attr("href").and_then(|href| href.strip_prefix("mailto:")) else {
                continue;
            };
            // mailto:jobs@acme.io?subject=Hi
            let address = target.split('?').next().unwrap_or_default().trim();
            if !address.is_empty() {
                found.insert(address.to_string());
            }
        }
    }

    filter_emails(found)
}

/// Drop placeholders, asset filenames and URL fragments that the pattern
/// happens to match. Order is preserved.
pub fn filter_emails<I>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = IndexSet::new();
    for email in candidates {
        if is_plausible_email(&email) {
            seen.insert(email);
        }
    }
    seen.into_iter().collect()
}

pub fn is_plausible_email(email: &str) -> bool {
    let lower = email.to_lowercase();
    !email.trim().is_empty()
        && !email.contains("example")
        && !email.contains("placeholder")
        && !IMAGE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        && !email.starts_with('?')
        && !email.contains('/')
}
