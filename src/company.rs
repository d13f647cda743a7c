use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

use crate::fetcher::PageSource;
use crate::models::CompanyDetails;

/// Fetch a candidate site and read its name and careers link. Returns `None`
/// when the page can't be fetched; callers move on to the next candidate.
pub async fn fetch_company_details(source: &dyn PageSource, url: &str) -> Option<CompanyDetails> {
    match source.fetch(url).await {
        Ok(html) => Some(parse_company_details(&html, url)),
        Err(e) => {
            warn!(url = %url, error = %e, "Error fetching company details");
            None
        }
    }
}

pub fn parse_company_details(html: &str, page_url: &str) -> CompanyDetails {
    let document = Html::parse_document(html);

    let display_name = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|title| title.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    // First anchor whose text mentions "career" wins, even if it has no href
    let careers_page = Selector::parse("a").ok().and_then(|sel| {
        document
            .select(&sel)
            .find(|a| a.text().collect::<String>().to_lowercase().contains("career"))
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| resolve_link(href, page_url))
    });

    CompanyDetails {
        display_name,
        careers_page,
    }
}

/// Absolute `http…` links are kept verbatim; anything else is joined onto the
/// page it was found on.
fn resolve_link(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    let base = Url::parse(page_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
