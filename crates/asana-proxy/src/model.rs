//! Asana payload shapes used by the response rewrites.
//!
//! Only the parts of a task the rewrites read are typed; everything else is
//! either ignored (task lists) or kept as raw JSON (single tasks).

use serde::{Deserialize, Serialize};

/// Name of the custom field that carries a task's short number.
pub const SHORT_NUMBER_FIELD: &str = "Task short number";

/// Every Asana response wraps its payload in `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Payload.
    pub data: T,
}

/// Reference to another Asana resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRef {
    /// Resource GID.
    #[serde(deserialize_with = "null_as_default")]
    pub gid: String,
    /// Display name.
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    /// Resource type (`user`, `workspace`, ...).
    #[serde(deserialize_with = "null_as_default")]
    pub resource_type: String,
}

/// One option of an enum custom field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumOption {
    /// Option GID.
    #[serde(deserialize_with = "null_as_default")]
    pub gid: String,
    /// Option color.
    #[serde(deserialize_with = "null_as_default")]
    pub color: String,
    /// Whether the option can be selected.
    #[serde(deserialize_with = "null_as_default")]
    pub enabled: bool,
    /// Option label.
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    /// Always `enum_option`.
    #[serde(deserialize_with = "null_as_default")]
    pub resource_type: String,
}

/// A custom field value attached to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomField {
    /// Field GID.
    #[serde(deserialize_with = "null_as_default")]
    pub gid: String,
    /// Field name.
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    /// Whether the field is enabled on the project.
    #[serde(deserialize_with = "null_as_default")]
    pub enabled: bool,
    /// Field type (`text`, `number`, `enum`, ...).
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub field_type: String,
    /// Resource subtype.
    #[serde(deserialize_with = "null_as_default")]
    pub resource_subtype: String,
    /// Value rendered as text by Asana.
    pub display_value: Option<String>,
    /// Value of a text field.
    pub text_value: Option<String>,
    /// Value of a number field.
    pub number_value: Option<serde_json::Number>,
    /// Decimal precision of a number field.
    pub precision: Option<u32>,
    /// Selected option of an enum field.
    pub enum_value: Option<EnumOption>,
    /// Available options of an enum field.
    #[serde(deserialize_with = "null_as_default")]
    pub enum_options: Vec<EnumOption>,
    /// Creator of the field.
    pub created_by: Option<ResourceRef>,
}

impl CustomField {
    /// The short number carried by this field, if it is an enabled
    /// `Task short number` text field with a value.
    pub fn short_number(&self) -> Option<&str> {
        if self.enabled && self.name == SHORT_NUMBER_FIELD {
            self.text_value.as_deref()
        } else {
            None
        }
    }
}

/// First short number among a task's custom fields, in upstream order.
pub fn find_short_number(fields: &[CustomField]) -> Option<&str> {
    fields.iter().find_map(CustomField::short_number)
}

/// Upstream task as returned by the task-list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawTask {
    /// Task GID.
    #[serde(deserialize_with = "null_as_default")]
    pub gid: String,
    /// Task name.
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    /// Assignee, if any.
    pub assignee: Option<ResourceRef>,
    /// Workspace the task lives in.
    pub workspace: Option<ResourceRef>,
    /// Custom field values.
    #[serde(deserialize_with = "null_as_default")]
    pub custom_fields: Vec<CustomField>,
}

impl RawTask {
    /// Map the task to its outward shape, if it carries a short number.
    pub fn to_record(&self) -> Option<TaskRecord> {
        find_short_number(&self.custom_fields).map(|key| TaskRecord {
            id: self.gid.clone(),
            name: self.name.clone(),
            key: key.to_string(),
        })
    }
}

/// Minimal task shape returned to callers of the task-list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Upstream task GID.
    pub id: String,
    /// Task name.
    pub name: String,
    /// Task short number.
    pub key: String,
}

/// Upstream task-list body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskList {
    /// Tasks, `null` decoding as empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<RawTask>,
}

/// Upstream sends `null` for unset strings, flags and lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_field(name: &str, enabled: bool, value: Option<&str>) -> CustomField {
        CustomField {
            name: name.to_string(),
            enabled,
            text_value: value.map(str::to_string),
            field_type: "text".to_string(),
            ..CustomField::default()
        }
    }

    #[test]
    fn test_short_number_requires_all_conditions() {
        assert_eq!(
            text_field(SHORT_NUMBER_FIELD, true, Some("T-1")).short_number(),
            Some("T-1")
        );
        assert_eq!(text_field(SHORT_NUMBER_FIELD, false, Some("T-1")).short_number(), None);
        assert_eq!(text_field("Priority", true, Some("T-1")).short_number(), None);
        assert_eq!(text_field(SHORT_NUMBER_FIELD, true, None).short_number(), None);
    }

    #[test]
    fn test_find_short_number_first_match_wins() {
        let fields = vec![
            text_field(SHORT_NUMBER_FIELD, false, Some("disabled")),
            text_field(SHORT_NUMBER_FIELD, true, Some("first")),
            text_field(SHORT_NUMBER_FIELD, true, Some("second")),
        ];
        assert_eq!(find_short_number(&fields), Some("first"));
        assert_eq!(find_short_number(&[]), None);
    }

    #[test]
    fn test_custom_field_decodes_typed_slots() {
        let field: CustomField = serde_json::from_value(json!({
            "gid": "1",
            "name": "Estimate",
            "enabled": true,
            "type": "number",
            "number_value": 3.5,
            "precision": 1,
            "enum_value": null,
            "created_by": {"gid": "9", "name": "Ann", "resource_type": "user"}
        }))
        .unwrap();

        assert_eq!(field.field_type, "number");
        assert_eq!(field.number_value.unwrap().as_f64(), Some(3.5));
        assert!(field.text_value.is_none());
        assert_eq!(field.created_by.unwrap().name, "Ann");
    }

    #[test]
    fn test_task_list_null_collections() {
        let list: TaskList = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(list.data.is_empty());

        let list: TaskList =
            serde_json::from_str(r#"{"data": [{"gid": "1", "name": "a", "custom_fields": null}]}"#)
                .unwrap();
        assert!(list.data[0].custom_fields.is_empty());
        assert!(list.data[0].to_record().is_none());
    }

    #[test]
    fn test_to_record() {
        let task = RawTask {
            gid: "1201".to_string(),
            name: "Fix login".to_string(),
            custom_fields: vec![text_field(SHORT_NUMBER_FIELD, true, Some("T-42"))],
            ..RawTask::default()
        };

        assert_eq!(
            task.to_record(),
            Some(TaskRecord {
                id: "1201".to_string(),
                name: "Fix login".to_string(),
                key: "T-42".to_string(),
            })
        );
    }
}
