//! Named parameters and bound parameter slots.

use tracing::debug;

use crate::value::{ColumnType, Value};

/// Size class of a variable-length parameter.
///
/// Keeping the declared size stable across calls keeps server-side plans stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBucket {
    /// Fits the small fixed ceiling.
    Bounded(usize),
    /// Larger than the ceiling.
    Unbounded,
}

/// Ceilings for the small size buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    /// Characters.
    pub text: usize,
    /// Bytes.
    pub binary: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            text: 4000,
            binary: 8000,
        }
    }
}

impl SizeBucket {
    /// Bucket for a value, or `None` for fixed-size values.
    pub fn for_value(value: &Value, limits: SizeLimits) -> Option<Self> {
        match value {
            // byte length bounds char count from above
            Value::Text(s) if s.len() <= limits.text || s.chars().count() <= limits.text => {
                Some(SizeBucket::Bounded(limits.text))
            }
            Value::Bytes(b) if b.len() <= limits.binary => Some(SizeBucket::Bounded(limits.binary)),
            Value::Text(_) | Value::Bytes(_) => Some(SizeBucket::Unbounded),
            _ => None,
        }
    }
}

/// One parameter slot of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// `@`-prefixed form; the bare form is a slice of it.
    name: Box<str>,
    value: Value,
    param_type: Option<ColumnType>,
    size: Option<SizeBucket>,
}

impl BoundParameter {
    /// Create an unbound slot. `name` may be given with or without `@`.
    pub fn new(name: &str) -> Self {
        let bare = name.strip_prefix('@').unwrap_or(name);
        Self {
            name: format!("@{}", bare).into_boxed_str(),
            value: Value::Null,
            param_type: None,
            size: None,
        }
    }

    /// Name with the `@` prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without the `@` prefix.
    pub fn bare_name(&self) -> &str {
        &self.name[1..]
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Type tag fixed by the first non-null value.
    pub fn param_type(&self) -> Option<ColumnType> {
        self.param_type
    }

    pub fn size(&self) -> Option<SizeBucket> {
        self.size
    }

    /// Whether `name` (prefixed or bare, any ASCII case) names this slot.
    pub fn matches(&self, name: &str) -> bool {
        let bare = name.strip_prefix('@').unwrap_or(name);
        bare.eq_ignore_ascii_case(self.bare_name())
    }

    /// Store a new value.
    ///
    /// The type tag is fixed on the first non-null value and only changes when a
    /// value of another kind arrives. NULL keeps the existing tag. The size bucket
    /// only ever widens.
    pub fn assign(&mut self, value: Value, limits: SizeLimits) {
        if let Some(kind) = value.kind() {
            match self.param_type {
                Some(current) if current == kind => {}
                Some(current) => {
                    debug!(
                        "Parameter {} re-typed from {} to {}",
                        self.name, current, kind
                    );
                    self.param_type = Some(kind);
                    self.size = None;
                }
                None => self.param_type = Some(kind),
            }
            if let Some(bucket) = SizeBucket::for_value(&value, limits) {
                self.widen(bucket);
            }
        }
        self.value = value;
    }

    fn widen(&mut self, bucket: SizeBucket) {
        match (self.size, bucket) {
            (None, _) => self.size = Some(bucket),
            (Some(SizeBucket::Bounded(_)), SizeBucket::Unbounded) => {
                debug!("Parameter {} widened to unbounded size", self.name);
                self.size = Some(SizeBucket::Unbounded);
            }
            _ => {}
        }
    }
}

/// Ordered set of named parameter values for the convenience API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter (builder style).
    pub fn add(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn extend(&mut self, other: Params) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Build a [`Params`] set.
///
/// ```rust
/// use rowforge::params;
///
/// let p = params! { "@DepartmentId" => 2, "Name" => "Employee7" };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::params::Params::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::params::Params::new();
        $( params.push($name, $value); )+
        params
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_forms() {
        let p = BoundParameter::new("DepartmentId");
        assert_eq!(p.name(), "@DepartmentId");
        assert_eq!(p.bare_name(), "DepartmentId");
        assert!(p.matches("@departmentid"));
        assert!(p.matches("DepartmentId"));
        assert!(!p.matches("Department"));
        assert_eq!(BoundParameter::new("@Id").name(), "@Id");
    }

    #[test]
    fn test_type_fixed_on_first_value() {
        let mut p = BoundParameter::new("Id");
        p.assign(Value::Null, SizeLimits::default());
        assert_eq!(p.param_type(), None);
        p.assign(Value::I32(1), SizeLimits::default());
        assert_eq!(p.param_type(), Some(ColumnType::I32));
        p.assign(Value::Null, SizeLimits::default());
        assert_eq!(p.param_type(), Some(ColumnType::I32));
        assert_eq!(p.value(), &Value::Null);
        p.assign(Value::I64(2), SizeLimits::default());
        assert_eq!(p.param_type(), Some(ColumnType::I64));
    }

    #[test]
    fn test_size_bucket_only_widens() {
        let limits = SizeLimits { text: 4, binary: 2 };
        let mut p = BoundParameter::new("Name");
        p.assign(Value::from("abc"), limits);
        assert_eq!(p.size(), Some(SizeBucket::Bounded(4)));
        p.assign(Value::from("abcdef"), limits);
        assert_eq!(p.size(), Some(SizeBucket::Unbounded));
        p.assign(Value::from("a"), limits);
        assert_eq!(p.size(), Some(SizeBucket::Unbounded));

        let mut b = BoundParameter::new("Blob");
        b.assign(Value::Bytes(vec![1, 2]), limits);
        assert_eq!(b.size(), Some(SizeBucket::Bounded(2)));
        b.assign(Value::Bytes(vec![1, 2, 3]), limits);
        assert_eq!(b.size(), Some(SizeBucket::Unbounded));
    }

    #[test]
    fn test_text_bucket_counts_chars() {
        let limits = SizeLimits { text: 3, binary: 8000 };
        // 3 chars, 6 bytes
        assert_eq!(
            SizeBucket::for_value(&Value::from("äöü"), limits),
            Some(SizeBucket::Bounded(3))
        );
        assert_eq!(SizeBucket::for_value(&Value::I32(1), limits), None);
    }

    #[test]
    fn test_params_macro() {
        let p = params! { "@Id" => 1, "Name" => "x" };
        let names: Vec<&str> = p.names().collect();
        assert_eq!(names, vec!["@Id", "Name"]);
        assert!(params! {}.is_empty());
    }
}
