use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::http::HttpClient;
use crate::models::NewItem;

const DEFAULT_MAX_ITEMS: usize = 200;

pub struct RssFetcher {
    http: Arc<HttpClient>,
    name: String,
    url: String,
}

impl RssFetcher {
    pub fn new(http: Arc<HttpClient>, name: String, url: String) -> Self {
        Self { http, name, url }
    }

    pub async fn fetch_articles(&self, limit: Option<usize>) -> Result<Vec<NewItem>> {
        let body = self.http.fetch_text(&self.url, None).await?;

        let feed = feed_rs::parser::parse(body.as_bytes()).map_err(|e| FetchError::Parse {
            url: self.url.clone(),
            message: e.to_string(),
        })?;

        let max = limit.unwrap_or(DEFAULT_MAX_ITEMS);
        let mut items = Vec::new();
        for (index, entry) in feed.entries.into_iter().take(max).enumerate() {
            match parse_entry(entry) {
                Some(item) => items.push(item),
                None => debug!(source = %self.name, index, "skipping unusable feed entry"),
            }
        }

        if items.is_empty() {
            warn!(source = %self.name, url = %self.url, "feed returned no usable items");
        }
        Ok(items)
    }

    /// The feed must fetch with 200 and parse with at least one entry, or
    /// at minimum parse cleanly.
    pub async fn test_connection(&self) -> bool {
        let Ok(response) = self.http.get(&self.url, None).await else {
            return false;
        };
        if response.status != 200 {
            return false;
        }
        match feed_rs::parser::parse(response.body.as_bytes()) {
            Ok(feed) => !feed.entries.is_empty() || feed.title.is_some(),
            Err(_) => false,
        }
    }
}

fn parse_entry(entry: feed_rs::model::Entry) -> Option<NewItem> {
    let url = entry.links.first().map(|l| l.href.clone())?;

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title".to_string());

    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .map(strip_html)
        .filter(|c| !c.is_empty());
    let summary = entry
        .summary
        .as_ref()
        .map(|s| strip_html(&s.content))
        .filter(|s| !s.is_empty());

    // First image enclosure, if any
    let image_url = entry.media.iter().find_map(|media| {
        media.content.iter().find_map(|content| {
            let is_image = content
                .content_type
                .as_ref()
                .map(|mime| mime.to_string().starts_with("image/"))
                .unwrap_or(false);
            if is_image {
                content.url.as_ref().map(|u| u.to_string())
            } else {
                None
            }
        })
    });

    // Missing dates default to "now"
    let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);

    let mut item = NewItem {
        title,
        url: url.clone(),
        content,
        summary,
        image_url,
        published_at: Some(published_at),
        ..Default::default()
    };
    item.raw.guid = if entry.id.is_empty() { Some(url) } else { Some(entry.id) };
    item.raw.author = entry.authors.first().map(|a| a.name.clone());
    item.raw.tags = entry.categories.into_iter().map(|c| c.term).collect();

    Some(item)
}

/// Feed bodies are frequently HTML; store them as plain text.
fn strip_html(text: &str) -> String {
    if !text.contains('<') {
        return text.trim().to_string();
    }
    html2text::from_read(text.as_bytes(), 200)
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|_| text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example News</title>
    <link>https://ex.com</link>
    <item>
      <title>Apple earnings up</title>
      <link>https://ex.com/a1</link>
      <guid>ex-a1</guid>
      <author>reporter@ex.com</author>
      <category>Business</category>
      <pubDate>Mon, 29 Jul 2025 10:00:00 GMT</pubDate>
      <description>&lt;p&gt;Apple reported &lt;b&gt;strong&lt;/b&gt; earnings.&lt;/p&gt;</description>
      <enclosure url="https://ex.com/a1.jpg" type="image/jpeg" length="1000"/>
    </item>
    <item>
      <title>No link entry</title>
      <description>orphan</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn sample_feed_parses_into_items() {
        let feed = feed_rs::parser::parse(SAMPLE_RSS.as_bytes()).unwrap();
        let items: Vec<NewItem> = feed.entries.into_iter().filter_map(parse_entry).collect();

        assert_eq!(items.len(), 1, "entry without a link is dropped");
        let item = &items[0];
        assert_eq!(item.title, "Apple earnings up");
        assert_eq!(item.url, "https://ex.com/a1");
        assert_eq!(item.image_url.as_deref(), Some("https://ex.com/a1.jpg"));
        assert_eq!(item.raw.guid.as_deref(), Some("ex-a1"));
        assert_eq!(item.raw.tags, vec!["Business".to_string()]);

        let published = item.published_at.unwrap();
        assert_eq!(published.date_naive().to_string(), "2025-07-29");

        let summary = item.summary.as_deref().unwrap();
        assert!(summary.contains("strong earnings") || summary.contains("**strong**"));
        assert!(!summary.contains("<p>"), "HTML converted to text");
    }

    #[test]
    fn missing_date_defaults_to_now() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>
            <item><title>x</title><link>https://ex.com/x</link></item></channel></rss>"#;
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        let item = parse_entry(feed.entries.into_iter().next().unwrap()).unwrap();
        let published = item.published_at.expect("defaulted");
        assert!((Utc::now() - published).num_seconds() < 5);
    }

    #[test]
    fn strip_html_passthrough_for_plain_text() {
        assert_eq!(strip_html("plain text"), "plain text");
        assert!(!strip_html("<div>wrapped</div>").contains('<'));
    }
}
