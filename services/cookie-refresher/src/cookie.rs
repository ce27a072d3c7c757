//! Cookie codec
//!
//! Stored credentials are `;`-delimited `name=value` lists. Renewal responses
//! use the same syntax in their `set-cookie` headers, with extra attributes
//! such as `expires`, `path` or `domain` after the first pair.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// `Ddd, DD-Mon-YYYY HH:MM:SS TZ`, the cookie `expires` shape
static COOKIE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w{3},\s?\d{2}-\w{3}-\d{4}\s\d{2}:\d{2}:\d{2}\s\w{3}")
        .expect("cookie date pattern is valid")
});

/// Insertion-ordered cookie attributes; a `None` value is a bare flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieMap {
    entries: Vec<(String, Option<String>)>,
}

impl CookieMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, keeping its original position when already present
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_deref())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `;`-delimited cookie string.
///
/// Each segment is split on its first `=`; names and values are trimmed.
/// A later duplicate overwrites the earlier value in place.
pub fn parse(raw: &str) -> CookieMap {
    let mut cookies = CookieMap::new();

    for segment in raw.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        match segment.split_once('=') {
            Some((name, value)) => cookies.insert(name.trim(), Some(value.trim().to_string())),
            None => cookies.insert(segment, None),
        }
    }

    cookies
}

/// Serialize a cookie map back to the stored representation
pub fn serialize(cookies: &CookieMap) -> String {
    cookies
        .iter()
        .map(|(name, value)| match value {
            Some(value) => format!("{}={}", name, value),
            None => name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Refresh the values of `base` from `directives`.
///
/// Only keys already present in `base` are updated; the attribute set of the
/// stored credential never grows.
pub fn merge(base: &CookieMap, directives: &CookieMap) -> CookieMap {
    let mut merged = base.clone();
    for (name, value) in &mut merged.entries {
        if let Some(update) = directives.get(name) {
            *value = update.map(str::to_string);
        }
    }
    merged
}

/// Replace cookie dates with epoch seconds so that their comma cannot be
/// mistaken for a header separator. Dates that fail to parse are kept.
pub fn normalize_dates(raw: &str) -> String {
    COOKIE_DATE_RE
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            match parse_cookie_date(matched) {
                Some(at) => at.timestamp().to_string(),
                None => matched.to_string(),
            }
        })
        .into_owned()
}

/// Parse `Ddd, DD-Mon-YYYY HH:MM:SS GMT`
fn parse_cookie_date(raw: &str) -> Option<DateTime<Utc>> {
    let (day, rest) = raw.trim().split_once(',')?;
    let (datetime, zone) = rest.trim().rsplit_once(' ')?;
    if !matches!(zone, "GMT" | "UTC") {
        return None;
    }

    let normalized = format!("{}, {}", day, datetime);
    NaiveDateTime::parse_from_str(&normalized, "%a, %d-%b-%Y %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Parse an `expires` attribute: epoch seconds, the cookie date shape or
/// an RFC 2822 date
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(seconds) = raw.parse::<i64>() {
        return DateTime::from_timestamp(seconds, 0);
    }

    parse_cookie_date(raw).or_else(|| {
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Cookie values and expiries handed out by a renewal response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetCookie {
    /// `name -> value` of every cookie set by the response
    pub directives: CookieMap,
    /// `name -> expiry` of every cookie that declared one
    pub expiries: Vec<(String, DateTime<Utc>)>,
}

impl SetCookie {
    /// Earliest expiry among the cookies that refresh a key of `base`.
    ///
    /// Deletion directives (empty value, or an expiry at or before `now`)
    /// say nothing about how long the stored value stays usable and are
    /// ignored.
    pub fn expires_for(&self, base: &CookieMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiries
            .iter()
            .filter(|(name, at)| {
                base.contains_key(name)
                    && *at > now
                    && matches!(self.directives.get(name), Some(Some(value)) if !value.is_empty())
            })
            .map(|(_, at)| *at)
            .min()
    }
}

/// Split a header value that may fold several cookies with `,`.
///
/// A piece whose first pair has no `=` is the tail of a date that survived
/// normalisation and is glued back onto the previous cookie.
fn split_folded(value: &str) -> Vec<String> {
    let mut cookies: Vec<String> = Vec::new();

    for piece in value.split(',') {
        let head = piece.split(';').next().unwrap_or_default();
        match cookies.last_mut() {
            Some(previous) if !head.contains('=') => {
                previous.push(',');
                previous.push_str(piece);
            }
            _ => cookies.push(piece.to_string()),
        }
    }

    cookies
}

/// Parse every `set-cookie` header value of a response
pub fn parse_set_cookie_headers<'a>(
    values: impl IntoIterator<Item = &'a str>,
    now: DateTime<Utc>,
) -> SetCookie {
    let mut result = SetCookie::default();

    for value in values {
        let normalized = normalize_dates(value);

        for raw_cookie in split_folded(&normalized) {
            let attributes = parse(&raw_cookie);
            let mut iter = attributes.iter();

            let Some((name, value)) = iter.next() else {
                continue;
            };
            result.directives.insert(name, value.map(str::to_string));

            let mut expires = None;
            for (attribute, value) in iter {
                let Some(value) = value else { continue };
                if attribute.eq_ignore_ascii_case("max-age") {
                    if let Ok(seconds) = value.parse::<i64>() {
                        expires = Some(now + chrono::Duration::seconds(seconds));
                        break;
                    }
                } else if attribute.eq_ignore_ascii_case("expires") && expires.is_none() {
                    expires = parse_expiry(value);
                }
            }

            if let Some(at) = expires {
                result.expiries.push((name.to_string(), at));
            }
        }
    }

    result
}
