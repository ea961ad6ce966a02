//! Value normalization for diffing local and remote values.
//!
//! Local and remote values arrive with different shapes: the remote side
//! returns numbers as strings, booleans as `true`/`1`, checkbox lists as
//! arrays while the local directory stores them newline-separated. Values
//! are normalized per field kind into a [`Comparable`] before comparing.

use serde_json::Value;

/// How a local attribute stores its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Text,
    /// Multi-valued checkbox list, newline-separated when stored as a string.
    List,
}

impl FieldKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::List => "list",
        }
    }

    /// Parse a stored kind name. Unknown names fall back to text.
    #[must_use]
    pub fn from_name(s: &str) -> Self {
        match s {
            "list" | "checkbox_list" | "checkboxlist" => Self::List,
            _ => Self::Text,
        }
    }
}

/// Free-text choice of a checkbox list; never part of the compared set.
const OTHER_OPTION: &str = "other";

/// A value in canonical comparable form.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparable {
    Empty,
    Number(f64),
    Text(String),
    List(Vec<String>),
}

/// Normalize `value` according to `kind`.
#[must_use]
pub fn normalize(value: &Value, kind: FieldKind) -> Comparable {
    match kind {
        FieldKind::Text => normalize_scalar(value),
        FieldKind::List => normalize_list(value),
    }
}

/// Compare two values after normalization.
#[must_use]
pub fn loosely_equal(a: &Value, b: &Value, kind: FieldKind) -> bool {
    normalize(a, kind) == normalize(b, kind)
}

/// Whether `value` normalizes to empty.
#[must_use]
pub fn is_empty(value: &Value) -> bool {
    matches!(normalize_scalar(value), Comparable::Empty)
}

fn normalize_scalar(value: &Value) -> Comparable {
    match value {
        Value::Null => Comparable::Empty,
        Value::Bool(b) => Comparable::Number(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().map_or(Comparable::Empty, Comparable::Number),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Comparable::Empty
            } else if let Some(n) = trimmed.parse::<f64>().ok().filter(|n| n.is_finite()) {
                Comparable::Number(n)
            } else {
                Comparable::Text(trimmed.to_string())
            }
        }
        Value::Array(_) => normalize_list(value),
        Value::Object(_) => Comparable::Text(value.to_string()),
    }
}

fn normalize_list(value: &Value) -> Comparable {
    let mut items: Vec<String> = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.split(['\r', '\n']).map(str::to_string).collect(),
        Value::Array(a) => a.iter().map(scalar_text).collect(),
        other => vec![scalar_text(other)],
    };
    items = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.as_str() != OTHER_OPTION)
        .collect();
    items.sort();
    items.dedup();

    if items.is_empty() {
        Comparable::Empty
    } else {
        Comparable::List(items)
    }
}

/// Render a scalar as plain text (strings without quotes).
#[must_use]
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(a) => a.iter().map(scalar_text).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_coercion() {
        assert!(loosely_equal(&json!("42"), &json!(42), FieldKind::Text));
        assert!(loosely_equal(&json!(" 1.50 "), &json!(1.5), FieldKind::Text));
        assert!(loosely_equal(&json!(true), &json!("1"), FieldKind::Text));
        assert!(loosely_equal(&json!(false), &json!(0), FieldKind::Text));
        assert!(!loosely_equal(&json!("42"), &json!(43), FieldKind::Text));
    }

    #[test]
    fn test_text_is_trimmed() {
        assert!(loosely_equal(&json!("  Berlin "), &json!("Berlin"), FieldKind::Text));
        assert!(!loosely_equal(&json!("berlin"), &json!("Berlin"), FieldKind::Text));
    }

    #[test]
    fn test_null_and_blank_are_empty() {
        assert!(loosely_equal(&json!(null), &json!(""), FieldKind::Text));
        assert!(loosely_equal(&json!("   "), &json!(null), FieldKind::Text));
        assert!(!loosely_equal(&json!(null), &json!("0"), FieldKind::Text));
        assert!(is_empty(&json!([])));
        assert!(!is_empty(&json!(0)));
    }

    #[test]
    fn test_list_sort_and_dedupe() {
        assert!(loosely_equal(
            &json!("b\n a\n\nb"),
            &json!(["a", "b"]),
            FieldKind::List
        ));
        assert_eq!(
            normalize(&json!(["z", " y", "z"]), FieldKind::List),
            Comparable::List(vec!["y".into(), "z".into()])
        );
        assert!(!loosely_equal(&json!("a"), &json!(["a", "b"]), FieldKind::List));
    }

    #[test]
    fn test_list_drops_other_option() {
        assert!(loosely_equal(&json!("a\r\nother\rb"), &json!(["b", "a"]), FieldKind::List));
        assert!(loosely_equal(&json!(["other"]), &json!(null), FieldKind::List));
    }

    #[test]
    fn test_empty_list_equals_empty() {
        assert!(loosely_equal(&json!([]), &json!(null), FieldKind::List));
        assert!(loosely_equal(&json!("\n \n"), &json!(""), FieldKind::List));
    }

    #[test]
    fn test_non_finite_strings_are_text() {
        assert_eq!(
            normalize(&json!("inf"), FieldKind::Text),
            Comparable::Text("inf".into())
        );
    }

    #[test]
    fn test_field_kind_names() {
        assert_eq!(FieldKind::from_name("checkbox_list"), FieldKind::List);
        assert_eq!(FieldKind::from_name("list"), FieldKind::List);
        assert_eq!(FieldKind::from_name("text"), FieldKind::Text);
        assert_eq!(FieldKind::from_name("select"), FieldKind::Text);
    }
}
