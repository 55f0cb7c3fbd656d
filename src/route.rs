//! Route key generation.
//!
//! A route key groups requests that share a server-side ratelimit bucket.
//! Keys are derived from the HTTP method and the endpoint's segments: major
//! parameters (the ID following `channels` or `guilds`) are written
//! literally, any other parameter is written as its placeholder so that
//! different values collapse onto the same key.

use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::fmt;

use crate::config::DEFAULT_ROUTE_KEY_CAPACITY;
use crate::error::{RatelimitError, RatelimitResult};

/// Literal segments whose following ID is a major parameter
const MAJOR_PARAMETERS: [&str; 2] = ["channels", "guilds"];

/// Every route below a `reactions` segment shares one bucket
const REACTIONS: &str = "reactions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Delete,
    Get,
    Post,
    MimePost,
    Patch,
    Put,
}

impl Method {
    /// Stable numeric code written at the head of every route key
    pub fn code(self) -> u8 {
        match self {
            Method::Delete => 0,
            Method::Get => 1,
            Method::Post => 2,
            Method::MimePost => 3,
            Method::Patch => 4,
            Method::Put => 5,
        }
    }

    /// Wire method; multipart posts are plain `POST` requests
    pub fn http_method(self) -> http::Method {
        match self {
            Method::Delete => http::Method::DELETE,
            Method::Get => http::Method::GET,
            Method::Post | Method::MimePost => http::Method::POST,
            Method::Patch => http::Method::PATCH,
            Method::Put => http::Method::PUT,
        }
    }
}

/// One `/`-separated piece of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Literal(Cow<'static, str>),
    /// 64-bit snowflake identifier
    Id(u64),
    Int(i64),
    Str(String),
}

impl Segment {
    /// Text written into the key when the value itself is not significant
    fn placeholder(&self) -> Cow<'_, str> {
        match self {
            Segment::Literal(text) => Cow::Borrowed(text.as_ref()),
            Segment::Id(_) => Cow::Borrowed("{id}"),
            Segment::Int(_) => Cow::Borrowed("{int}"),
            Segment::Str(_) => Cow::Borrowed("{str}"),
        }
    }

    fn is_literal(&self, text: &str) -> bool {
        matches!(self, Segment::Literal(lit) if lit == text)
    }

    fn is_major(&self) -> bool {
        MAJOR_PARAMETERS.iter().any(|major| self.is_literal(major))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(text) => f.write_str(text),
            Segment::Id(id) => write!(f, "{}", id),
            Segment::Int(value) => write!(f, "{}", value),
            Segment::Str(value) => f.write_str(value),
        }
    }
}

/// Canonical bucket grouping string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(String);

impl RouteKey {
    /// Key used for the bucket of requests whose route is still unknown
    pub const NULL: &'static str = "null";
    /// Key used for the bucket of routes outside any ratelimit group
    pub const MISS: &'static str = "miss";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RouteKey {
    fn from(key: &str) -> Self {
        RouteKey(key.to_string())
    }
}

impl Borrow<str> for RouteKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded writer for `:`-separated key parts
struct KeyWriter {
    buf: String,
    capacity: usize,
}

impl KeyWriter {
    fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, part: &str) -> RatelimitResult<()> {
        let attempted = self.buf.len() + 1 + part.len();
        if attempted > self.capacity {
            return Err(RatelimitError::RouteKeyOverflow {
                capacity: self.capacity,
                attempted,
            });
        }
        self.buf.push(':');
        self.buf.push_str(part);
        Ok(())
    }

    fn finish(self) -> RouteKey {
        RouteKey(self.buf)
    }
}

/// Typed endpoint description: a method plus its ordered segments.
///
/// ```
/// use rest_ratelimit::route::{Method, Route};
///
/// let route = Route::new(Method::Get).lit("channels").id(1234).lit("messages");
/// assert_eq!(route.path(), "/channels/1234/messages");
/// assert_eq!(route.key().as_str(), ":1:channels:1234:messages");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub method: Method,
    pub segments: Vec<Segment>,
}

impl Route {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            segments: Vec::new(),
        }
    }

    pub fn lit(mut self, text: &'static str) -> Self {
        self.segments.push(Segment::Literal(Cow::Borrowed(text)));
        self
    }

    pub fn id(mut self, id: u64) -> Self {
        self.segments.push(Segment::Id(id));
        self
    }

    pub fn int(mut self, value: i64) -> Self {
        self.segments.push(Segment::Int(value));
        self
    }

    pub fn str(mut self, value: impl Into<String>) -> Self {
        self.segments.push(Segment::Str(value.into()));
        self
    }

    /// Concrete endpoint path with every argument substituted
    pub fn path(&self) -> String {
        self.segments
            .iter()
            .map(|segment| format!("/{}", segment))
            .collect()
    }

    /// Build the route key, failing if it exceeds `capacity` bytes
    pub fn try_key_with_capacity(&self, capacity: usize) -> RatelimitResult<RouteKey> {
        let mut writer = KeyWriter::new(capacity);
        writer.push(&self.method.code().to_string())?;

        let mut prev: Option<&Segment> = None;
        for segment in &self.segments {
            if prev.is_some_and(|p| p.is_literal(REACTIONS)) {
                break;
            }

            match segment {
                Segment::Id(id) if prev.is_some_and(Segment::is_major) => {
                    writer.push(&id.to_string())?
                }
                other => writer.push(&other.placeholder())?,
            }

            prev = Some(segment);
        }

        Ok(writer.finish())
    }

    pub fn try_key(&self) -> RatelimitResult<RouteKey> {
        self.try_key_with_capacity(DEFAULT_ROUTE_KEY_CAPACITY)
    }

    /// Build the route key.
    ///
    /// # Panics
    ///
    /// Panics if the key exceeds the default capacity; a route that long is
    /// a malformed endpoint definition, not a runtime condition.
    pub fn key(&self) -> RouteKey {
        self.key_with_capacity(DEFAULT_ROUTE_KEY_CAPACITY)
    }

    /// Same as [`Route::key`] with an explicit capacity.
    pub fn key_with_capacity(&self, capacity: usize) -> RouteKey {
        match self.try_key_with_capacity(capacity) {
            Ok(key) => key,
            Err(err) => panic!("malformed route {}: {}", self.path(), err),
        }
    }
}
