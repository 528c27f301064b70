//! Filter and parameter terms.

use crate::value::SqlValue;

/// Comparators a filter term can use.
///
/// `StartsWith`, `EndsWith` and `Contains` render as `ILIKE` with the value
/// wildcarded at bind time, matching how the repositories wrap the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterComparer {
    Equals,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    StartsWith,
    EndsWith,
    Contains,
    Like,
}

impl FilterComparer {
    /// SQL operator text, or None for comparators that need special
    /// rendering (none today, the variant set is closed).
    pub(crate) fn operator(&self) -> &'static str {
        match self {
            FilterComparer::Equals => "=",
            FilterComparer::NotEqual => "<>",
            FilterComparer::GreaterThan => ">",
            FilterComparer::GreaterThanOrEqual => ">=",
            FilterComparer::LessThan => "<",
            FilterComparer::LessThanOrEqual => "<=",
            FilterComparer::StartsWith
            | FilterComparer::EndsWith
            | FilterComparer::Contains
            | FilterComparer::Like => "ILIKE",
        }
    }

    /// Name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FilterComparer::Equals => "Equals",
            FilterComparer::NotEqual => "NotEqual",
            FilterComparer::GreaterThan => "GreaterThan",
            FilterComparer::GreaterThanOrEqual => "GreaterThanOrEqual",
            FilterComparer::LessThan => "LessThan",
            FilterComparer::LessThanOrEqual => "LessThanOrEqual",
            FilterComparer::StartsWith => "StartsWith",
            FilterComparer::EndsWith => "EndsWith",
            FilterComparer::Contains => "Contains",
            FilterComparer::Like => "Like",
        }
    }
}

/// A single predicate term: property, comparator, value.
#[derive(Debug, Clone)]
pub struct GenericFilter {
    pub property: String,
    pub comparer: FilterComparer,
    pub value: SqlValue,
}

impl GenericFilter {
    /// Equality filter, the overwhelmingly common case.
    pub fn new(property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            property: into_lower(property),
            comparer: FilterComparer::Equals,
            value: value.into(),
        }
    }

    /// Filter with an explicit comparator.
    pub fn with_comparer(
        property: impl Into<String>,
        comparer: FilterComparer,
        value: impl Into<SqlValue>,
    ) -> Self {
        Self {
            property: into_lower(property),
            comparer,
            value: value.into(),
        }
    }

    /// The value as it must be bound: wildcard-wrapped for the pattern
    /// comparators, untouched otherwise.
    pub(crate) fn bind_value(&self) -> SqlValue {
        match (&self.comparer, &self.value) {
            (FilterComparer::StartsWith, SqlValue::Text(s)) => SqlValue::Text(format!("{}%", s)),
            (FilterComparer::EndsWith, SqlValue::Text(s)) => SqlValue::Text(format!("%{}", s)),
            (FilterComparer::Contains, SqlValue::Text(s)) => SqlValue::Text(format!("%{}%", s)),
            _ => self.value.clone(),
        }
    }
}

/// A single write value: property name plus value.
#[derive(Debug, Clone)]
pub struct GenericParameter {
    pub key: String,
    pub value: SqlValue,
}

impl GenericParameter {
    pub fn new(key: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            key: into_lower(key),
            value: value.into(),
        }
    }
}

/// Column and property names are matched case-insensitively everywhere;
/// normalizing once here keeps the rest of the engine comparison-free.
fn into_lower(value: impl Into<String>) -> String {
    let value = value.into();
    if value.chars().any(|c| c.is_ascii_uppercase()) {
        value.to_ascii_lowercase()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_names_normalized() {
        let filter = GenericFilter::new("ProviderId", "x");
        assert_eq!(filter.property, "providerid");

        let param = GenericParameter::new("Name", "x");
        assert_eq!(param.key, "name");
    }

    #[test]
    fn test_pattern_comparators_wrap_value() {
        let contains =
            GenericFilter::with_comparer("name", FilterComparer::Contains, "acme");
        assert_eq!(contains.bind_value(), SqlValue::Text("%acme%".into()));

        let starts =
            GenericFilter::with_comparer("name", FilterComparer::StartsWith, "ac");
        assert_eq!(starts.bind_value(), SqlValue::Text("ac%".into()));

        let ends = GenericFilter::with_comparer("name", FilterComparer::EndsWith, "me");
        assert_eq!(ends.bind_value(), SqlValue::Text("%me".into()));
    }

    #[test]
    fn test_equals_value_untouched() {
        let filter = GenericFilter::new("name", "acme");
        assert_eq!(filter.bind_value(), SqlValue::Text("acme".into()));
    }
}
