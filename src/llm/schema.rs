//! Typed responses requested from the model, each with its JSON schema.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::ResponseFormat;

/// A response type the model can be asked to produce.
pub trait ResponseSchema: DeserializeOwned + Serialize + JsonSchema + Send {
    /// Schema name sent with the request.
    const NAME: &'static str;

    /// Strict JSON schema derived from the type's serde shape.
    fn json_schema() -> Value {
        strict_schema::<Self>()
    }

    /// Name and schema bundled for a request.
    fn response_format() -> ResponseFormat {
        ResponseFormat {
            name: Self::NAME.to_string(),
            schema: <Self as ResponseSchema>::json_schema(),
        }
    }
}

/// Generate the schema for `T` in the form strict structured output accepts.
///
/// Every object lists all of its properties as required and forbids extra
/// ones. Defaults are dropped and `oneOf` becomes `anyOf`.
pub fn strict_schema<T: JsonSchema>() -> Value {
    let mut schema = schemars::schema_for!(T).to_value();
    if let Some(root) = schema.as_object_mut() {
        root.remove("$schema");
        root.remove("title");
    }
    make_strict(&mut schema);
    schema
}

fn make_strict(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let required: Option<Vec<Value>> = match map.get("properties") {
                Some(Value::Object(properties)) => {
                    Some(properties.keys().cloned().map(Value::String).collect())
                }
                _ => None,
            };
            if let Some(required) = required {
                map.insert("required".to_string(), Value::Array(required));
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            if map.contains_key("type") || map.contains_key("$ref") {
                map.remove("default");
            }
            if let Some(variants) = map.remove("oneOf") {
                map.insert("anyOf".to_string(), variants);
            }
            for child in map.values_mut() {
                make_strict(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                make_strict(item);
            }
        }
        _ => {}
    }
}

/// First round: which files the model wants to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    /// Repository-relative paths.
    pub file_list: Vec<String>,
}

impl ResponseSchema for FilesResponse {
    const NAME: &'static str = "files_response";
}

/// Kind of change applied to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// Add a file that does not exist yet.
    Create,
    /// Replace the contents of an existing file.
    Modify,
    /// Remove an existing file.
    Delete,
}

impl ChangeType {
    /// Lowercase verb used in messages.
    pub fn verb(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Create => write!(f, "CREATE"),
            ChangeType::Modify => write!(f, "MODIFY"),
            ChangeType::Delete => write!(f, "DELETE"),
        }
    }
}

/// One file edit in a pull request plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// What to do with the file.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Repository-relative path.
    pub file_path: String,
    /// Full new contents; empty for deletions.
    #[serde(default)]
    pub new_contents: String,
}

/// Second round: the pull request to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestPlan {
    /// Pull request title, also used as the commit message.
    pub pull_request_title: String,
    /// Pull request body.
    pub pull_request_body: String,
    /// Ordered file edits.
    pub updated_files: Vec<FileChange>,
}

impl ResponseSchema for PullRequestPlan {
    const NAME: &'static str = "pull_request_plan";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Follow a local `$ref` into `$defs`, or return the node itself.
    fn resolve<'a>(root: &'a Value, node: &'a Value) -> &'a Value {
        match node["$ref"].as_str() {
            Some(reference) => {
                let name = reference.trim_start_matches("#/$defs/");
                &root["$defs"][name]
            }
            None => node,
        }
    }

    /// String values allowed by an enum schema, whichever form it takes.
    fn enum_values(node: &Value) -> Vec<&str> {
        if let Some(values) = node["enum"].as_array() {
            return values.iter().map(|v| v.as_str().unwrap()).collect();
        }
        node["anyOf"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|variant| match variant["const"].as_str() {
                Some(value) => vec![value],
                None => enum_values(variant),
            })
            .collect()
    }

    fn required(node: &Value) -> Vec<&str> {
        let mut names: Vec<&str> = node["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_plan_deserializes_wire_names() {
        let plan: PullRequestPlan = serde_json::from_value(json!({
            "pullRequestTitle": "Add readme",
            "pullRequestBody": "Adds a readme",
            "updatedFiles": [
                { "type": "CREATE", "filePath": "README.md", "newContents": "# Hi" },
                { "type": "DELETE", "filePath": "old.txt" }
            ]
        }))
        .unwrap();

        assert_eq!(plan.updated_files.len(), 2);
        assert_eq!(plan.updated_files[0].change_type, ChangeType::Create);
        assert_eq!(plan.updated_files[1].new_contents, "");
    }

    #[test]
    fn test_unknown_change_type_rejected() {
        let result: Result<FileChange, _> = serde_json::from_value(json!({
            "type": "RENAME", "filePath": "a", "newContents": ""
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_response_format_names() {
        assert_eq!(FilesResponse::response_format().name, "files_response");
        assert_eq!(PullRequestPlan::response_format().name, "pull_request_plan");
    }

    #[test]
    fn test_files_schema_uses_wire_names() {
        let schema = <FilesResponse as ResponseSchema>::json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(required(&schema), vec!["fileList"]);
        assert_eq!(schema["properties"]["fileList"]["type"], "array");
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_plan_schema_follows_serde_shape() {
        let schema = <PullRequestPlan as ResponseSchema>::json_schema();
        assert_eq!(
            required(&schema),
            vec!["pullRequestBody", "pullRequestTitle", "updatedFiles"]
        );
        assert_eq!(schema["additionalProperties"], false);

        let item = resolve(&schema, &schema["properties"]["updatedFiles"]["items"]);
        assert_eq!(required(item), vec!["filePath", "newContents", "type"]);
        assert_eq!(item["additionalProperties"], false);
        assert!(item["properties"]["newContents"].get("default").is_none());

        let change_type = resolve(&schema, &item["properties"]["type"]);
        assert_eq!(enum_values(change_type), vec!["CREATE", "MODIFY", "DELETE"]);
        assert!(change_type.get("oneOf").is_none());
    }

    #[test]
    fn test_every_object_in_schema_is_closed() {
        fn walk(node: &Value) {
            match node {
                Value::Object(map) => {
                    if let Some(Value::Object(properties)) = map.get("properties") {
                        assert_eq!(map["additionalProperties"], false);
                        assert_eq!(
                            map["required"].as_array().unwrap().len(),
                            properties.len()
                        );
                    }
                    map.values().for_each(walk);
                }
                Value::Array(items) => items.iter().for_each(walk),
                _ => {}
            }
        }
        walk(&<PullRequestPlan as ResponseSchema>::json_schema());
        walk(&<FilesResponse as ResponseSchema>::json_schema());
    }

    #[test]
    fn test_files_response_serializes_camel_case() {
        let response = FilesResponse {
            file_list: vec!["src/main.rs".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "fileList": ["src/main.rs"] })
        );
    }
}
