//! Per-instance middleware attributes.
//!
//! An attribute is a named configuration value bound to one middleware instance
//! when a route's pipeline is assembled (for example `role = "admin"`). Values
//! are a small tagged variant rather than an untyped dictionary, and the typed
//! getters on [`Attributes`] turn a shape mismatch into an [`Error`] at build
//! time instead of a surprise at request time.
//!
//! Attribute maps are read-only once the pipeline is built: middleware receive
//! them through [`AttributeMiddleware::set_attributes`] and keep whatever they
//! need in their own fields.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    middleware::Middleware,
};

/// A single attribute value.
///
/// Serialized untagged, so JSON `"admin"`, `3`, `true`, and `["a", "b"]` map
/// onto [`Str`](Self::Str), [`Int`](Self::Int), [`Bool`](Self::Bool), and
/// [`List`](Self::List) respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl AttributeValue {
    /// Human-readable kind, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "a boolean",
            Self::Int(_) => "an integer",
            Self::Str(_) => "a string",
            Self::List(_) => "a list of strings",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Interprets a raw string from a binding spec such as `auth:role=admin`.
    ///
    /// `true`/`false` become booleans, anything that parses as `i64` becomes an
    /// integer, `a|b|c` becomes a list, and everything else stays a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use onionskin::AttributeValue;
    ///
    /// assert_eq!(AttributeValue::parse("true"), AttributeValue::Bool(true));
    /// assert_eq!(AttributeValue::parse("30"), AttributeValue::Int(30));
    /// assert_eq!(
    ///     AttributeValue::parse("GET|POST"),
    ///     AttributeValue::List(vec!["GET".into(), "POST".into()])
    /// );
    /// assert_eq!(AttributeValue::parse("admin"), AttributeValue::Str("admin".into()));
    /// ```
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Self::Int(n);
        }
        if raw.contains('|') {
            return Self::List(
                raw.split('|')
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect(),
            );
        }
        Self::Str(raw.to_owned())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join("|")),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_owned).collect())
    }
}

/// An ordered map from attribute name to [`AttributeValue`].
///
/// # Examples
///
/// ```
/// use onionskin::Attributes;
///
/// let attrs = Attributes::new().with("role", "admin").with("max_age", 600);
/// assert_eq!(attrs.str("role").unwrap(), "admin");
/// assert_eq!(attrs.int("max_age").unwrap(), 600);
/// assert!(attrs.str("missing").is_err());
/// assert!(!attrs.bool_or("strict", false).unwrap());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    map: BTreeMap<String, AttributeValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a value, returning the one it replaced.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.map.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the string attribute `key`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingAttribute`] when absent, [`Error::AttributeType`] when
    /// present with another kind.
    pub fn str(&self, key: &str) -> Result<&str> {
        let value = self.require(key)?;
        value
            .as_str()
            .ok_or_else(|| mismatch(key, "a string", value))
    }

    /// Returns the integer attribute `key`.
    ///
    /// # Errors
    ///
    /// See [`str`](Self::str).
    pub fn int(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        value
            .as_int()
            .ok_or_else(|| mismatch(key, "an integer", value))
    }

    /// Returns the boolean attribute `key`.
    ///
    /// # Errors
    ///
    /// See [`str`](Self::str).
    pub fn bool(&self, key: &str) -> Result<bool> {
        let value = self.require(key)?;
        value
            .as_bool()
            .ok_or_else(|| mismatch(key, "a boolean", value))
    }

    /// Returns the list attribute `key`.
    ///
    /// A single string is accepted as a one-element list, so `origins=https://a.example`
    /// in a binding spec does not need a trailing `|`.
    ///
    /// # Errors
    ///
    /// See [`str`](Self::str).
    pub fn list(&self, key: &str) -> Result<Vec<String>> {
        let value = self.require(key)?;
        match value {
            AttributeValue::List(items) => Ok(items.clone()),
            AttributeValue::Str(s) => Ok(vec![s.clone()]),
            other => Err(mismatch(key, "a list of strings", other)),
        }
    }

    /// Like [`str`](Self::str) but falls back to `default` when the key is absent.
    ///
    /// # Errors
    ///
    /// [`Error::AttributeType`] when the key is present with another kind.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        if self.contains(key) {
            self.str(key)
        } else {
            Ok(default)
        }
    }

    /// Like [`int`](Self::int) but falls back to `default` when the key is absent.
    ///
    /// # Errors
    ///
    /// [`Error::AttributeType`] when the key is present with another kind.
    pub fn int_or(&self, key: &str, default: i64) -> Result<i64> {
        if self.contains(key) {
            self.int(key)
        } else {
            Ok(default)
        }
    }

    /// Like [`bool`](Self::bool) but falls back to `default` when the key is absent.
    ///
    /// # Errors
    ///
    /// [`Error::AttributeType`] when the key is present with another kind.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        if self.contains(key) {
            self.bool(key)
        } else {
            Ok(default)
        }
    }

    fn require(&self, key: &str) -> Result<&AttributeValue> {
        self.map.get(key).ok_or_else(|| Error::MissingAttribute {
            key: key.to_owned(),
        })
    }
}

fn mismatch(key: &str, expected: &'static str, found: &AttributeValue) -> Error {
    Error::AttributeType {
        key: key.to_owned(),
        expected,
        found: found.kind(),
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Middleware that is parameterized by caller-supplied attributes.
///
/// The composing caller injects the attribute map once, before the pipeline is
/// built. Validation belongs in `set_attributes`: returning an error there makes
/// pipeline construction fail rather than the first request.
///
/// Distinct instances of the same type can carry different attributes on
/// different routes; the pipeline never assumes two instances are interchangeable.
///
/// # Examples
///
/// ```rust
/// use onionskin::{Attributes, AttributeMiddleware, BoxFuture, Middleware, Next, Result};
///
/// #[derive(Default)]
/// struct Prefix {
///     text: String,
/// }
///
/// impl Middleware<String, String> for Prefix {
///     fn handle<'a>(
///         &'a self,
///         request: String,
///         next: Next<'a, String, String>,
///     ) -> BoxFuture<'a, Result<String>> {
///         Box::pin(async move { next.run(format!("{}{request}", self.text)).await })
///     }
/// }
///
/// impl AttributeMiddleware<String, String> for Prefix {
///     fn set_attributes(&mut self, attributes: Attributes) -> Result<()> {
///         self.text = attributes.str("text")?.to_owned();
///         Ok(())
///     }
/// }
/// ```
pub trait AttributeMiddleware<Req, Res>: Middleware<Req, Res> {
    /// Receives this instance's attributes before composition.
    ///
    /// # Errors
    ///
    /// Any error aborts pipeline construction.
    fn set_attributes(&mut self, attributes: Attributes) -> Result<()>;
}
