//! Property Paths
//!
//! A [`PropertyPath`] is a dotted key path such as `"owner.address.city"`,
//! parsed once into its segments. Paths are resolved against host objects
//! through [`PropertyAccess`], one segment at a time.
//!
//! # Resolution
//!
//! Each intermediate step is either a host object (looked up through its own
//! `PropertyAccess`) or a plain JSON value (looked up by object key). Two
//! things can stop a traversal:
//!
//! - a `null` intermediate: [`PathError::NullInChain`]. Observers treat this
//!   as "no value right now" rather than a failure.
//! - a missing member: [`PathError::UnknownSegment`].
//!
//! # Writing
//!
//! [`apply`] sets the final segment. When the parent of that segment is a
//! JSON value owned by a host object, the value is updated and written back
//! through the host, so the host still sees (and announces) the change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::{Property, PropertyAccess};
use crate::error::{PathError, Result};

/// Parsed, non-empty dotted property path.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyPath {
    segments: SmallVec<[String; 4]>,
}

impl PropertyPath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let segments: SmallVec<[String; 4]> = path.split('.').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::Invalid(path.to_owned()));
        }
        Ok(Self { segments })
    }

    /// The segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments. Always at least one.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// The first segment, i.e. the property on the root object.
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// Whether `other` starts with every segment of `self`.
    ///
    /// A path is a prefix of itself.
    pub fn is_prefix_of(&self, other: &PropertyPath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }

    /// `self` followed by every segment of `rest`.
    pub fn join(&self, rest: &PropertyPath) -> PropertyPath {
        let mut segments = self.segments.clone();
        segments.extend(rest.segments.iter().cloned());
        Self { segments }
    }

    fn unknown(&self, segment: &str) -> PathError {
        PathError::UnknownSegment {
            path: self.to_string(),
            segment: segment.to_owned(),
        }
    }

    fn null_at(&self, segment: &str) -> PathError {
        PathError::NullInChain {
            path: self.to_string(),
            segment: segment.to_owned(),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Debug for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyPath({self})")
    }
}

impl FromStr for PropertyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PropertyPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PropertyPath> for String {
    fn from(path: PropertyPath) -> Self {
        path.to_string()
    }
}

/// Resolve `path` against `object` and return the value it points at.
pub fn resolve<A>(object: &A, path: &PropertyPath) -> Result<Value, PathError>
where
    A: PropertyAccess + ?Sized,
{
    let head = path.head();
    let mut current = object.property(head).ok_or_else(|| path.unknown(head))?;
    let mut previous = head;

    for segment in &path.segments()[1..] {
        current = match current {
            Property::Object(child) => child.property(segment),
            Property::Value(Value::Null) => return Err(path.null_at(previous)),
            Property::Value(Value::Object(mut map)) => {
                map.remove(segment.as_str()).map(Property::Value)
            }
            Property::Value(_) => None,
        }
        .ok_or_else(|| path.unknown(segment))?;
        previous = segment;
    }

    Ok(current.into_value())
}

/// Walk `segments` through a plain JSON value.
///
/// Used for values that were captured before a change, when the host object
/// they came from may no longer hold them.
pub(crate) fn lookup(value: &Value, segments: &[String]) -> Option<Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| current.get(segment.as_str()))
        .cloned()
}

/// Set the property `path` points at on `object` to `value`.
pub fn apply<A>(object: &A, path: &PropertyPath, value: Value) -> Result<()>
where
    A: PropertyAccess + ?Sized,
{
    apply_from(object, path, 0, value)
}

fn apply_from<A>(object: &A, path: &PropertyPath, index: usize, value: Value) -> Result<()>
where
    A: PropertyAccess + ?Sized,
{
    let segment = &path.segments()[index];
    if index + 1 == path.len() {
        return match object.set_property(segment, value)? {
            true => Ok(()),
            false => Err(path.unknown(segment).into()),
        };
    }

    match object.property(segment) {
        None => Err(path.unknown(segment).into()),
        Some(Property::Object(child)) => apply_from(child.as_ref(), path, index + 1, value),
        Some(Property::Value(Value::Null)) => Err(path.null_at(segment).into()),
        Some(Property::Value(mut nested @ Value::Object(_))) => {
            set_in_value(&mut nested, path, index + 1, value)?;
            match object.set_property(segment, nested)? {
                true => Ok(()),
                false => Err(path.unknown(segment).into()),
            }
        }
        Some(Property::Value(_)) => Err(path.unknown(&path.segments()[index + 1]).into()),
    }
}

fn set_in_value(
    target: &mut Value,
    path: &PropertyPath,
    index: usize,
    value: Value,
) -> Result<(), PathError> {
    let segment = &path.segments()[index];
    let Value::Object(map) = target else {
        return Err(path.unknown(segment));
    };

    if index + 1 == path.len() {
        map.insert(segment.clone(), value);
        return Ok(());
    }

    match map.get_mut(segment.as_str()) {
        None => Err(path.unknown(segment)),
        Some(Value::Null) => Err(path.null_at(segment)),
        Some(child) => set_in_value(child, path, index + 1, value),
    }
}
