//! Stable multi-key sorting of entity sequences.

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;

/// Direction of a single sort level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest value first.
    #[default]
    Ascending,
    /// Largest value first.
    Descending,
}

/// One level of a multi-key sort: a field name and a direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    /// Name of the entity field to order by.
    pub attribute: String,
    /// Direction applied to this level.
    #[serde(default)]
    pub order: SortOrder,
}

impl SortDescriptor {
    /// Ascending order on `attribute`.
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Descending order on `attribute`.
    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Descending,
        }
    }
}

impl fmt::Display for SortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            SortOrder::Ascending => write!(f, "{}", self.attribute),
            SortOrder::Descending => write!(f, "-{}", self.attribute),
        }
    }
}

/// Error returned when a sort shorthand cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sort descriptor '{0}': attribute name is empty")]
pub struct SortParseError(pub String);

impl FromStr for SortDescriptor {
    type Err = SortParseError;

    /// Parses `name`, `+name` (ascending) or `-name` (descending).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (order, name) = match trimmed.strip_prefix('-') {
            Some(rest) => (SortOrder::Descending, rest),
            None => (
                SortOrder::Ascending,
                trimmed.strip_prefix('+').unwrap_or(trimmed),
            ),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(SortParseError(input.to_string()));
        }
        Ok(Self {
            attribute: name.to_string(),
            order,
        })
    }
}

/// Return a sorted copy of `items`.
///
/// With no descriptors the input order is kept as-is. Otherwise items are ordered
/// by the first descriptor, ties are broken by the next one, and items equal on
/// every level keep their input order.
pub fn sort<T: Entity>(items: &[T], descriptors: &[SortDescriptor]) -> Vec<T> {
    if descriptors.is_empty() {
        return items.to_vec();
    }

    let keys = extract_keys(items, descriptors);

    let mut indices: Vec<usize> = (0..items.len()).collect();
    // slice::sort_by is stable, which the tie-breaking contract relies on.
    indices.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b], descriptors));
    indices.into_iter().map(|idx| items[idx].clone()).collect()
}

/// True when `items` is already in the order [`sort`] would produce.
pub fn is_sorted<T: Entity>(items: &[T], descriptors: &[SortDescriptor]) -> bool {
    let keys = extract_keys(items, descriptors);
    keys.windows(2)
        .all(|pair| compare_keys(&pair[0], &pair[1], descriptors) != Ordering::Greater)
}

fn extract_keys<T: Entity>(items: &[T], descriptors: &[SortDescriptor]) -> Vec<Vec<SortKey>> {
    items
        .iter()
        .map(|item| {
            descriptors
                .iter()
                .map(|descriptor| SortKey::from(item.attribute(&descriptor.attribute)))
                .collect()
        })
        .collect()
}

fn compare_keys(a: &[SortKey], b: &[SortKey], descriptors: &[SortDescriptor]) -> Ordering {
    for ((left, right), descriptor) in a.iter().zip(b).zip(descriptors) {
        let ord = left.cmp(right);
        let ord = match descriptor.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Pre-extracted comparison key for one attribute value.
///
/// Values of different kinds are ranked missing < bool < number < date <
/// other string < array/object. Arrays and objects carry no natural order and
/// compare equal to each other.
#[derive(Debug, Clone)]
enum SortKey {
    Missing,
    Bool(bool),
    Number { approx: f64, exact: Option<i128> },
    Date(DateTime<Utc>),
    Text(String),
    Composite,
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Bool(_) => 1,
            SortKey::Number { .. } => 2,
            SortKey::Date(_) => 3,
            SortKey::Text(_) => 4,
            SortKey::Composite => 5,
        }
    }
}

impl From<Option<Value>> for SortKey {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => SortKey::Missing,
            Some(Value::Bool(flag)) => SortKey::Bool(flag),
            Some(Value::Number(number)) => {
                let exact = number
                    .as_i64()
                    .map(i128::from)
                    .or_else(|| number.as_u64().map(i128::from));
                let approx = number.as_f64().unwrap_or(f64::NAN);
                SortKey::Number { approx, exact }
            }
            Some(Value::String(raw)) => match parse_date(&raw) {
                Some(date) => SortKey::Date(date),
                None => SortKey::Text(raw),
            },
            Some(Value::Array(_)) | Some(Value::Object(_)) => SortKey::Composite,
        }
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            // Integers beyond f64 precision still order exactly through the tie-break.
            (
                SortKey::Number {
                    approx: a,
                    exact: a_exact,
                },
                SortKey::Number {
                    approx: b,
                    exact: b_exact,
                },
            ) => a.total_cmp(b).then_with(|| a_exact.cmp(b_exact)),
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
