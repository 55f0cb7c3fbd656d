//! Response header access.

use std::collections::HashMap;

use crate::config::HeaderNames;

/// Read-only access to a response's headers.
///
/// Names are given in lowercase; an empty value is reported as absent.
pub trait ResponseHeaders {
    fn header(&self, name: &str) -> Option<&str>;
}

impl ResponseHeaders for http::HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }
}

impl ResponseHeaders for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Ratelimit fields pulled out of a response.
///
/// Values that fail to parse are treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatelimitHeaders<'a> {
    pub bucket: Option<&'a str>,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    /// Absolute reset time, epoch seconds
    pub reset: Option<f64>,
    /// Seconds until reset
    pub reset_after: Option<f64>,
    pub global: bool,
    pub date: Option<&'a str>,
}

impl<'a> RatelimitHeaders<'a> {
    pub fn parse<H: ResponseHeaders + ?Sized>(headers: &'a H, names: &HeaderNames) -> Self {
        Self {
            bucket: headers.header(&names.bucket).map(str::trim),
            limit: parse_number(headers.header(&names.limit)),
            remaining: parse_number(headers.header(&names.remaining)),
            reset: parse_number(headers.header(&names.reset)),
            reset_after: parse_number(headers.header(&names.reset_after)),
            global: headers.header(&names.global).is_some(),
            date: headers.header(&names.date),
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Parse an HTTP `date` header into epoch milliseconds.
pub fn parse_http_date(value: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .and_then(|date| u64::try_from(date.timestamp_millis()).ok())
}
