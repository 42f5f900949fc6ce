//! Wikipedia lookup for free-form chat grounding
//!
//! Two-step: opensearch resolves a fuzzy query to a title, the REST
//! summary endpoint fetches the extract. Lookups are best-effort; every
//! failure collapses to `None`.

use reqwest::Client;
use std::time::Duration;

const WIKI_LANG: &str = "en";
const USER_AGENT: &str = "ViVoice/0.1";

#[derive(Debug, Clone)]
pub struct WikiSummary {
    pub title: String,
    pub extract: String,
    pub url: Option<String>,
}

/// Cheap gate so short or clearly technical utterances skip the lookup
pub fn should_use_wikipedia(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    if t.len() < 8 {
        return false;
    }
    const SKIP_KEYWORDS: [&str; 18] = [
        "error",
        "bug",
        "traceback",
        "stack trace",
        "exception",
        "django",
        "python",
        "rust",
        "sql",
        "mysql",
        "api",
        "http",
        "post",
        "get",
        "cors",
        "git",
        "github",
        "commit",
    ];
    !SKIP_KEYWORDS.iter().any(|k| t.contains(k))
}

pub struct WikiClient {
    client: Client,
}

impl WikiClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Best-effort summary lookup, `None` on any failure
    pub async fn fetch_summary(&self, query: &str) -> Option<WikiSummary> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        let search_url = format!("https://{}.wikipedia.org/w/api.php", WIKI_LANG);
        let data: serde_json::Value = self
            .client
            .get(&search_url)
            .query(&[
                ("action", "opensearch"),
                ("search", query),
                ("limit", "1"),
                ("namespace", "0"),
                ("format", "json"),
            ])
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let title = data
            .get(1)
            .and_then(|titles| titles.get(0))
            .and_then(|t| t.as_str())?
            .to_string();

        let summary_url = format!(
            "https://{}.wikipedia.org/api/rest_v1/page/summary/{}",
            WIKI_LANG,
            urlencode(&title)
        );
        let js: serde_json::Value = self
            .client
            .get(&summary_url)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let extract = js.get("extract").and_then(|e| e.as_str())?.trim().to_string();
        if extract.is_empty() {
            return None;
        }

        let url = js
            .get("content_urls")
            .and_then(|c| c.get("desktop"))
            .and_then(|d| d.get("page"))
            .and_then(|p| p.as_str())
            .map(str::to_string);

        Some(WikiSummary {
            title: js
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or(&title)
                .to_string(),
            extract,
            url,
        })
    }
}

impl Default for WikiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_use_wikipedia() {
        assert!(should_use_wikipedia("Who was Marie Curie?"));
        assert!(!should_use_wikipedia("short"));
        assert!(!should_use_wikipedia("why does my python traceback say this"));
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("Marie Curie"), "Marie%20Curie");
        assert_eq!(urlencode("a.b-c_d~e"), "a.b-c_d~e");
    }
}
