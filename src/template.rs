use serde_json::{json, Map, Value};

use crate::naming::Tag;
use crate::resource::{DeletionPolicy, Output, Resource, Stack, TagFormat};

pub const FORMAT_VERSION: &str = "2010-09-09";

fn tags(format: TagFormat, tags: &[Tag]) -> Option<Value> {
    if tags.is_empty() {
        return None;
    }

    return match format {
        TagFormat::List => Some(json!(tags)),
        TagFormat::Map => Some(Value::Object(
            tags.iter()
                .map(|tag| (tag.key.clone(), json!(tag.value)))
                .collect(),
        )),
        TagFormat::Unsupported => None,
    };
}

fn policy_name(policy: DeletionPolicy) -> &'static str {
    return match policy {
        DeletionPolicy::Delete => "Delete",
        DeletionPolicy::Retain => "Retain",
        DeletionPolicy::Snapshot => "Snapshot",
    };
}

fn resource(resource: &Resource) -> Value {
    let mut properties = resource.properties.clone();
    if let Some(tags) = tags(resource.kind.tag_format(), &resource.tags) {
        properties.insert(String::from("Tags"), tags);
    }

    let mut body = Map::new();
    body.insert(String::from("Type"), json!(resource.kind.type_name()));
    if !properties.is_empty() {
        body.insert(String::from("Properties"), Value::Object(properties));
    }
    if !resource.depends_on.is_empty() {
        body.insert(String::from("DependsOn"), json!(resource.depends_on));
    }
    if let Some(policy) = resource.deletion_policy {
        body.insert(String::from("DeletionPolicy"), json!(policy_name(policy)));
        body.insert(String::from("UpdateReplacePolicy"), json!(policy_name(policy)));
    }
    body.insert(String::from("Metadata"), json!({ "Name": resource.name }));

    return Value::Object(body);
}

fn output(output: &Output) -> Value {
    let mut body = Map::new();
    body.insert(String::from("Value"), output.value.clone());
    if let Some(description) = &output.description {
        body.insert(String::from("Description"), json!(description));
    }
    if let Some(export) = &output.export {
        body.insert(String::from("Export"), json!({ "Name": export }));
    }

    return Value::Object(body);
}

/// Renders `stack` as a CloudFormation template. Resources keep the order they
/// were added in; `DependsOn` carries the declared edges only, reference edges
/// are left to the intrinsics.
pub fn synthesize(stack: &Stack) -> Value {
    let resources: Map<String, Value> = stack
        .resources()
        .iter()
        .map(|r| (r.id.clone(), resource(r)))
        .collect();
    let outputs: Map<String, Value> = stack
        .outputs()
        .iter()
        .map(|(key, value)| (key.clone(), output(value)))
        .collect();

    let mut template = Map::new();
    template.insert(String::from("AWSTemplateFormatVersion"), json!(FORMAT_VERSION));
    template.insert(String::from("Description"), json!(stack.description));
    template.insert(String::from("Resources"), Value::Object(resources));
    if !outputs.is_empty() {
        template.insert(String::from("Outputs"), Value::Object(outputs));
    }

    return Value::Object(template);
}
