use serde_json::Value;
use uuid::Uuid;

/// A PATCH field: left out, explicitly cleared, or set.
#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue<T> {
    Omitted,
    Null,
    Set(T),
}

impl<T> NullableValue<T> {
    /// `None` leaves the column alone, `Some(None)` clears it.
    pub fn into_change(self) -> Option<Option<T>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::Set(value) => Some(Some(value)),
        }
    }
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue<String>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::Set(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

pub fn classify_nullable_uuid(optional_value: Option<&Value>) -> Result<NullableValue<Uuid>, String> {
    match classify_nullable(optional_value)? {
        NullableValue::Omitted => Ok(NullableValue::Omitted),
        NullableValue::Null => Ok(NullableValue::Null),
        NullableValue::Set(raw) if raw.trim().is_empty() => Ok(NullableValue::Null),
        NullableValue::Set(raw) => Uuid::parse_str(raw.trim())
            .map(NullableValue::Set)
            .map_err(|_| format!("expected a UUID, got {raw}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distinguishes_missing_from_null() {
        let body = json!({ "description": null });
        assert_eq!(
            classify_nullable(body.get("description")).unwrap(),
            NullableValue::Null
        );
        assert_eq!(
            classify_nullable(body.get("title")).unwrap(),
            NullableValue::Omitted
        );
        assert!(classify_nullable(Some(&json!(3))).is_err());
    }

    #[test]
    fn uuid_fields_accept_blank_as_clear() {
        let id = Uuid::new_v4();
        assert_eq!(
            classify_nullable_uuid(Some(&json!(id.to_string()))).unwrap(),
            NullableValue::Set(id)
        );
        assert_eq!(
            classify_nullable_uuid(Some(&json!(""))).unwrap(),
            NullableValue::Null
        );
        assert!(classify_nullable_uuid(Some(&json!("nope"))).is_err());
    }

    #[test]
    fn changes_map_to_nested_options() {
        assert_eq!(NullableValue::<String>::Omitted.into_change(), None);
        assert_eq!(NullableValue::<String>::Null.into_change(), Some(None));
        assert_eq!(
            NullableValue::Set("x".to_string()).into_change(),
            Some(Some("x".to_string()))
        );
    }
}
