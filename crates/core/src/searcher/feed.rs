//! RSS feed parsing shared by the Torznab and Newznab clients.
//!
//! Both protocols answer `t=search` with an RSS 2.0 document whose items
//! carry extra `<torznab:attr name=".." value=".."/>` or
//! `<newznab:attr .../>` elements. Indexers mix the two prefixes freely, so
//! both are accepted regardless of which client is parsing.

use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;
use url::Url;

use super::{RawSearchItem, SearchError};

/// Parsed `t=search` response.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub items: Vec<RawSearchItem>,
    /// From `<newznab:response total="..">` when present.
    pub total: Option<u64>,
}

/// Parse an indexer RSS response.
///
/// An `<error code=".." description=".."/>` document is reported as
/// [`SearchError::IndexerError`].
pub fn parse_feed(xml: &str) -> Result<ParsedFeed, SearchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut current: Option<RawSearchItem> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = tag_name(e);
                match tag.as_str() {
                    "item" => current = Some(RawSearchItem::default()),
                    "error" => return Err(indexer_error_from(e)),
                    _ => handle_element(&tag, e, current.as_mut(), &mut feed),
                }
                current_tag = tag;
            }
            Ok(Event::Empty(ref e)) => {
                let tag = tag_name(e);
                if tag == "error" {
                    return Err(indexer_error_from(e));
                }
                handle_element(&tag, e, current.as_mut(), &mut feed);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(item) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| SearchError::ParseError(err.to_string()))?;
                    apply_text(item, &current_tag, text.trim());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(item) = current.as_mut() {
                    let raw = e.into_inner();
                    let text = String::from_utf8_lossy(&raw);
                    apply_text(item, &current_tag, text.trim());
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if name.as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        if !item.title.is_empty()
                            && (!item.link.is_empty() || item.magnet_url.is_some())
                        {
                            feed.items.push(item);
                        } else {
                            debug!(title = %item.title, "Skipping feed item without title or link");
                        }
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SearchError::ParseError(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    Ok(feed)
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
            (key, value)
        })
        .collect()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    attributes(e)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

fn indexer_error_from(e: &BytesStart<'_>) -> SearchError {
    SearchError::IndexerError {
        code: attribute(e, "code").unwrap_or_default(),
        description: attribute(e, "description").unwrap_or_else(|| "unknown error".to_string()),
    }
}

fn handle_element(
    tag: &str,
    e: &BytesStart<'_>,
    item: Option<&mut RawSearchItem>,
    feed: &mut ParsedFeed,
) {
    match (tag, item) {
        ("newznab:response" | "torznab:response", _) => {
            feed.total = attribute(e, "total").and_then(|t| t.parse().ok());
        }
        ("newznab:attr" | "torznab:attr", Some(item)) => {
            if let (Some(name), Some(value)) = (attribute(e, "name"), attribute(e, "value")) {
                apply_attr(item, &name, &value);
            }
        }
        ("enclosure", Some(item)) => {
            for (key, value) in attributes(e) {
                match key.as_str() {
                    "url" if item.link.is_empty() => item.link = value,
                    "length" if item.size.is_none() => {
                        item.size = value.parse::<u64>().ok().filter(|s| *s > 0);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn apply_text(item: &mut RawSearchItem, tag: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    match tag {
        "title" => item.title = text.to_string(),
        "guid" => item.guid = Some(text.to_string()),
        "link" => item.link = text.to_string(),
        "comments" => item.comments = Some(text.to_string()),
        "pubDate" => item.pub_date = parse_date(text),
        "size" => item.size = text.parse().ok(),
        "category" => push_category(item, text),
        _ => {}
    }
}

fn apply_attr(item: &mut RawSearchItem, name: &str, value: &str) {
    match name {
        "size" => item.size = value.parse().ok(),
        "seeders" => item.seeders = value.parse().ok(),
        "peers" => item.peers = value.parse().ok(),
        "infohash" => item.info_hash = Some(value.to_lowercase()),
        "magneturl" => item.magnet_url = Some(value.to_string()),
        "grabs" => item.grabs = value.parse().ok(),
        "poster" => item.poster = Some(value.to_string()),
        "group" => item.group = Some(value.to_string()),
        "usenetdate" => item.usenet_date = parse_date(value),
        "category" => push_category(item, value),
        _ => {}
    }
}

fn push_category(item: &mut RawSearchItem, value: &str) {
    if !item.categories.iter().any(|c| c == value) {
        item.categories.push(value.to_string());
    }
}

/// Parse the date formats indexers emit: RFC 2822 (RSS), RFC 3339, or a
/// bare `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| ndt.and_utc())
        })
}

/// Best-effort details page for an item whose feed omitted `<comments>`:
/// `{scheme}://{host}[:port]/details/{last guid segment}`.
///
/// Returns `None` (after logging) when the base URL cannot be parsed.
pub fn details_url(indexer_url: &str, guid: &str) -> Option<String> {
    let base = match Url::parse(indexer_url) {
        Ok(url) => url,
        Err(e) => {
            debug!(url = %indexer_url, error = %e, "Cannot derive details link from indexer url");
            return None;
        }
    };
    let host = base.host_str()?;
    let tail = guid
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|t| !t.is_empty())?;

    let origin = match base.port() {
        Some(port) => format!("{}://{}:{}", base.scheme(), host, port),
        None => format!("{}://{}", base.scheme(), host),
    };
    Some(format!("{}/details/{}", origin, tail))
}
