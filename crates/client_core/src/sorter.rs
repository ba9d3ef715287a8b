//! Single-column list sorting with tri-state header toggling.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::protocol::{FieldValue, StudentRecord};

use crate::{collation, error::ClientError};

/// A field value as the sorter sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Number(f64),
    Text(String),
    /// Booleans, arrays, objects. Never ordered against anything.
    Other,
}

impl From<&Value> for SortValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SortValue::Text(String::new()),
            Value::Number(number) => number
                .as_f64()
                .map(SortValue::Number)
                .unwrap_or(SortValue::Other),
            Value::String(text) => SortValue::Text(text.clone()),
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => SortValue::Other,
        }
    }
}

impl From<&FieldValue> for SortValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Number(number) => SortValue::Number(*number),
            FieldValue::Text(text) => SortValue::Text(text.clone()),
        }
    }
}

/// Records the sorter can order. `None` means the field is absent or null.
pub trait SortableRecord {
    fn field(&self, name: &str) -> Option<SortValue>;
}

impl SortableRecord for Value {
    fn field(&self, name: &str) -> Option<SortValue> {
        match self.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(SortValue::from(value)),
        }
    }
}

impl SortableRecord for StudentRecord {
    fn field(&self, name: &str) -> Option<SortValue> {
        match name {
            "id" => Some(SortValue::Text(self.id.to_string())),
            "full_name" => Some(SortValue::Text(self.full_name.clone())),
            "grade" => self.grade.as_ref().map(SortValue::from),
            "telegram_contact" => self.telegram_contact.clone().map(SortValue::Text),
            "default_price" => Some(SortValue::Number(self.default_price)),
            "balance" => self.balance.map(SortValue::Number),
            "slug" => self.slug.clone().map(SortValue::Text),
            "parent_name" => self.parent_name.clone().map(SortValue::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(ClientError::Validation(format!(
                "unknown sort direction '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    pub field: String,
    pub direction: SortDirection,
}

impl SortDirective {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }
}

/// Compares one field of two records under `direction`.
///
/// Missing values count as empty text. Number against number is numeric,
/// text against text is collated, anything else is a tie.
pub fn compare_values(
    left: Option<SortValue>,
    right: Option<SortValue>,
    direction: SortDirection,
) -> Ordering {
    let left = left.unwrap_or(SortValue::Text(String::new()));
    let right = right.unwrap_or(SortValue::Text(String::new()));
    let ordering = match (&left, &right) {
        (SortValue::Number(a), SortValue::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (SortValue::Text(a), SortValue::Text(b)) => collation::compare(a, b),
        _ => Ordering::Equal,
    };
    direction.apply(ordering)
}

/// Returns a sorted copy of `records`. The input is left untouched and ties
/// keep their input order.
pub fn sort_records<R>(records: &[R], directive: &SortDirective) -> Vec<R>
where
    R: SortableRecord + Clone,
{
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        compare_values(
            a.field(&directive.field),
            b.field(&directive.field),
            directive.direction,
        )
    });
    sorted
}

/// Header arrow for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortIndicator {
    pub arrow: char,
    pub visible: bool,
}

/// The active directive of a list view. There is no unsorted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortState {
    directive: SortDirective,
}

impl SortState {
    pub fn new(default_field: impl Into<String>) -> Self {
        Self {
            directive: SortDirective::ascending(default_field),
        }
    }

    /// Same column flips direction; another column becomes active ascending.
    pub fn toggle(&mut self, field: &str) -> &SortDirective {
        if self.directive.field == field {
            self.directive.direction = self.directive.direction.flipped();
        } else {
            self.directive = SortDirective::ascending(field);
        }
        &self.directive
    }

    pub fn directive(&self) -> &SortDirective {
        &self.directive
    }

    pub fn indicator(&self, field: &str) -> SortIndicator {
        if self.directive.field != field {
            return SortIndicator {
                arrow: '▲',
                visible: false,
            };
        }
        let arrow = match self.directive.direction {
            SortDirection::Asc => '▲',
            SortDirection::Desc => '▼',
        };
        SortIndicator {
            arrow,
            visible: true,
        }
    }

    pub fn apply<R: SortableRecord + Clone>(&self, records: &[R]) -> Vec<R> {
        sort_records(records, &self.directive)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn names(records: &[Value]) -> Vec<&str> {
        records
            .iter()
            .map(|record| record["full_name"].as_str().unwrap_or("<null>"))
            .collect()
    }

    #[test]
    fn sorts_text_with_ukrainian_collation() {
        let records = vec![
            json!({"full_name": "Олена", "balance": 100}),
            json!({"full_name": "Андрій", "balance": -50}),
        ];

        let sorted = sort_records(&records, &SortDirective::ascending("full_name"));

        assert_eq!(names(&sorted), ["Андрій", "Олена"]);
        assert_eq!(names(&records), ["Олена", "Андрій"]);
    }

    #[test]
    fn sorts_numbers_numerically_in_both_directions() {
        let records = vec![
            json!({"full_name": "a", "balance": 100}),
            json!({"full_name": "b", "balance": -50}),
            json!({"full_name": "c", "balance": 9}),
        ];

        let asc = sort_records(&records, &SortDirective::ascending("balance"));
        assert_eq!(names(&asc), ["b", "c", "a"]);

        let desc = sort_records(&records, &SortDirective::new("balance", SortDirection::Desc));
        assert_eq!(names(&desc), ["a", "c", "b"]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let records = vec![
            json!({"full_name": "Ярослав"}),
            json!({"full_name": "Ґанна"}),
            json!({"full_name": "Ірина"}),
            json!({"full_name": "Богдан"}),
        ];
        let directive = SortDirective::ascending("full_name");

        let once = sort_records(&records, &directive);
        let twice = sort_records(&once, &directive);

        assert_eq!(once, twice);
        assert_eq!(names(&once), ["Богдан", "Ґанна", "Ірина", "Ярослав"]);
    }

    #[test]
    fn descending_reverses_distinct_keys() {
        let records = vec![
            json!({"full_name": "Марія"}),
            json!({"full_name": "Андрій"}),
            json!({"full_name": "Юлія"}),
        ];

        let mut asc = sort_records(&records, &SortDirective::ascending("full_name"));
        let desc = sort_records(&records, &SortDirective::new("full_name", SortDirection::Desc));
        asc.reverse();

        assert_eq!(asc, desc);
    }

    #[test]
    fn missing_and_null_values_sort_as_empty_text() {
        let records = vec![
            json!({"full_name": "Олена", "telegram_contact": "@olena"}),
            json!({"full_name": "Андрій", "telegram_contact": null}),
            json!({"full_name": "Богдан"}),
        ];

        let sorted = sort_records(&records, &SortDirective::ascending("telegram_contact"));

        assert_eq!(names(&sorted), ["Андрій", "Богдан", "Олена"]);
    }

    #[test]
    fn mixed_types_compare_equal_and_keep_input_order() {
        let records = vec![
            json!({"full_name": "a", "grade": "10-Б"}),
            json!({"full_name": "b", "grade": 9}),
            json!({"full_name": "c", "grade": true}),
        ];

        let sorted = sort_records(&records, &SortDirective::ascending("grade"));

        assert_eq!(names(&sorted), ["a", "b", "c"]);
        assert_eq!(
            compare_values(
                Some(SortValue::Number(f64::NAN)),
                Some(SortValue::Number(1.0)),
                SortDirection::Asc
            ),
            Ordering::Equal
        );
    }

    #[test]
    fn toggle_flips_same_field_and_resets_on_new_field() {
        let mut state = SortState::new("full_name");
        assert_eq!(state.directive(), &SortDirective::ascending("full_name"));

        state.toggle("full_name");
        assert_eq!(state.directive().direction, SortDirection::Desc);

        state.toggle("balance");
        assert_eq!(state.directive(), &SortDirective::ascending("balance"));

        state.toggle("balance");
        state.toggle("balance");
        assert_eq!(state.directive().direction, SortDirection::Asc);
    }

    #[test]
    fn indicator_shows_only_active_column() {
        let mut state = SortState::new("full_name");
        assert_eq!(
            state.indicator("full_name"),
            SortIndicator { arrow: '▲', visible: true }
        );

        state.toggle("full_name");
        assert_eq!(state.indicator("full_name").arrow, '▼');

        let inactive = state.indicator("balance");
        assert_eq!(inactive.arrow, '▲');
        assert!(!inactive.visible);
    }

    #[test]
    fn direction_parses_from_text() {
        assert_eq!("DESC".parse::<SortDirection>().ok(), Some(SortDirection::Desc));
        assert_eq!("asc".parse::<SortDirection>().ok(), Some(SortDirection::Asc));
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
