use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::fetcher::PageSource;

pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
pub const DEFAULT_RESULT_LIMIT: usize = 5;

/// Anchor class DuckDuckGo's HTML endpoint puts on organic result titles.
const RESULT_LINK_SELECTOR: &str = "a.result__a";

pub fn website_query(company_name: &str) -> String {
    format!("{} company website", company_name)
}

/// Search for `query` and return up to `limit` candidate sites in the order
/// the provider ranked them. Transport failures are returned so the caller
/// can retry; an empty or blocked results page is just an empty list.
pub async fn discover_websites(
    source: &dyn PageSource,
    search_url: &str,
    query: &str,
    limit: usize,
) -> FetchResult<Vec<String>> {
    let url = Url::parse_with_params(search_url, &[("q", query)]).map_err(|_| {
        FetchError::InvalidUrl {
            url: search_url.to_string(),
        }
    })?;

    let html = source.fetch(url.as_str()).await?;
    let results = parse_search_results(&html, limit);

    if results.is_empty() {
        warn!(query = %query, "No search results; the provider may be blocking requests");
    } else {
        info!(query = %query, count = results.len(), "Found candidate websites");
    }

    Ok(results)
}

pub fn parse_search_results(html: &str, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(RESULT_LINK_SELECTOR) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for link in document.select(&selector) {
        if results.len() >= limit {
            break;
        }
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let target = unwrap_redirect(href);
        if target.starts_with("http://") || target.starts_with("https://") {
            results.push(target);
        }
    }
    results
}

/// DuckDuckGo sometimes wraps results as `//duckduckgo.com/l/?uddg=<target>`.
fn unwrap_redirect(href: &str) -> String {
    let Ok(base) = Url::parse(DEFAULT_SEARCH_URL) else {
        return href.to_string();
    };
    let Ok(resolved) = base.join(href) else {
        return href.to_string();
    };

    let is_ddg = resolved
        .host_str()
        .is_some_and(|host| host == "duckduckgo.com" || host.ends_with(".duckduckgo.com"));
    if is_ddg && resolved.path() == "/l/" {
        if let Some((_, target)) = resolved.query_pairs().find(|(key, _)| key == "uddg") {
            return target.into_owned();
        }
    }
    href.to_string()
}
