use serde_json::{json, Value};

use crate::environment::Environment;
use crate::iam::{self, PolicyStatement, Role, ServicePrincipal};
use crate::naming;
use crate::resource::{self, teardown_policy, Export, Resource, ResourceKind, ResourceRef, Stack};

pub const SSE_ALGORITHM: &str = "AES256";

const CLEANER_RUNTIME: &str = "python3.12";

// Deletes every object version once CloudFormation deletes the custom resource.
const CLEANER_HANDLER: &str = r#"import boto3
import cfnresponse


def handler(event, context):
    try:
        if event["RequestType"] == "Delete":
            name = event["ResourceProperties"]["BucketName"]
            boto3.resource("s3").Bucket(name).object_versions.delete()
        cfnresponse.send(event, context, cfnresponse.SUCCESS, {})
    except Exception as error:
        cfnresponse.send(event, context, cfnresponse.FAILED, {"Error": str(error)})
"#;

/// Builds a bucket descriptor. This is the only place buckets are made, so
/// every bucket gets versioning, server-side encryption and a full public
/// access block.
pub fn bucket(
    prefix: &str,
    environment: Environment,
    purpose: &str,
    account: &str,
) -> Result<Resource, naming::Error> {
    let physical_name = naming::bucket_name(prefix, environment, purpose, account)?;
    let logical_name = naming::bucket_base_name(prefix, environment, purpose);

    let resource = Resource::new(ResourceKind::Bucket, &logical_name)
        .property("BucketName", json!(physical_name))
        .property("VersioningConfiguration", json!({ "Status": "Enabled" }))
        .property(
            "BucketEncryption",
            json!({
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": { "SSEAlgorithm": SSE_ALGORITHM }
                }]
            }),
        )
        .property(
            "PublicAccessBlockConfiguration",
            json!({
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true
            }),
        )
        .deletion_policy(teardown_policy(environment));

    return Ok(resource);
}

/// `s3://<bucket><path>`, with the bucket name resolved at deploy time.
pub fn s3_uri(bucket_name: &Value, path: &str) -> Value {
    return json!({ "Fn::Join": ["", ["s3://", bucket_name, path]] });
}

const SSE_ALGORITHM_POINTER: &str =
    "/ServerSideEncryptionConfiguration/0/ServerSideEncryptionByDefault/SSEAlgorithm";

pub fn has_baseline(resource: &Resource) -> bool {
    if resource.kind != ResourceKind::Bucket {
        return false;
    }

    let properties = &resource.properties;
    let versioned = properties
        .get("VersioningConfiguration")
        .and_then(|v| v.get("Status"))
        == Some(&json!("Enabled"));
    let encrypted = properties
        .get("BucketEncryption")
        .and_then(|v| v.pointer(SSE_ALGORITHM_POINTER))
        .is_some();
    let blocked = properties
        .get("PublicAccessBlockConfiguration")
        .and_then(Value::as_object)
        .map_or(false, |block| {
            [
                "BlockPublicAcls",
                "BlockPublicPolicy",
                "IgnorePublicAcls",
                "RestrictPublicBuckets",
            ]
            .iter()
            .all(|key| block.get(*key) == Some(&Value::Bool(true)))
        });

    return versioned && encrypted && blocked;
}

/// The function emptying the buckets of `stack`, added on first use. A
/// versioned bucket can only be deleted once it holds no object versions.
pub fn bucket_cleaner(stack: &mut Stack, account: &str) -> Result<ResourceRef, resource::Error> {
    let environment = stack.environment;
    let function_name =
        naming::scoped_name("lambda", environment, &format!("{}-bucket-cleaner", stack.kind));
    let id = naming::logical_id(&function_name);
    if stack.resource(&id).is_some() {
        return Ok(ResourceRef { id });
    }

    let buckets = json!({
        "Fn::Sub": format!("arn:${{AWS::Partition}}:s3:::*-{environment}-*-{account}")
    });
    let role = Role::new(
        &naming::scoped_name("iam", environment, &format!("{}-bucket-cleaner-role", stack.kind)),
        "Empties the buckets of the stack before they are deleted",
        &[ServicePrincipal::Lambda],
    )
    .managed_policy("service-role/AWSLambdaBasicExecutionRole")
    .inline_policy(
        &naming::scoped_name("iam", environment, &format!("{}-bucket-cleaner-policy", stack.kind)),
        vec![PolicyStatement::allow(
            &[
                "s3:ListBucket",
                "s3:ListBucketVersions",
                "s3:DeleteObject",
                "s3:DeleteObjectVersion",
            ],
            iam::bucket_and_objects(&buckets),
        )],
    );
    let role = stack.add(role.to_resource())?;

    return stack.add(
        Resource::new(ResourceKind::LambdaFunction, &function_name)
            .property("Runtime", json!(CLEANER_RUNTIME))
            .property("Handler", json!("index.handler"))
            .property("Timeout", json!(900))
            .property("Role", role.attribute("Arn"))
            .property("Code", json!({ "ZipFile": CLEANER_HANDLER })),
    );
}

/// Custom resource that references `bucket`, so CloudFormation deletes it,
/// and with it the bucket's contents, before the bucket itself.
pub fn empty_on_delete(name: &str, bucket: &ResourceRef, cleaner: &ResourceRef) -> Resource {
    return Resource::new(ResourceKind::EmptyBucket, name)
        .property("ServiceToken", cleaner.attribute("Arn"))
        .property("BucketName", bucket.reference());
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketHandle {
    pub purpose: String,
    pub physical_name: String,
    pub resource: ResourceRef,
    pub name: Export,
    pub arn: Export,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::resource::{DeletionPolicy, StackKind};
    use crate::stacks::{fixtures, Context};

    #[test]
    fn applies_the_baseline() {
        let resource = bucket("datalake", Environment::Develop, "scripts", "123456789012").unwrap();

        assert!(has_baseline(&resource));
        assert_eq!("DatalakeDevelopScripts", resource.id);
        assert_eq!(
            json!("datalake-develop-scripts-123456789012"),
            resource.properties["BucketName"]
        );
        assert_eq!(Some(DeletionPolicy::Delete), resource.deletion_policy);
    }

    #[test]
    fn production_buckets_are_retained() {
        let resource =
            bucket("datalake", Environment::Production, "gold", "123456789012").unwrap();
        assert_eq!(Some(DeletionPolicy::Retain), resource.deletion_policy);
    }

    #[test]
    fn s3_uris_join_bucket_and_path() {
        let name = json!({ "Fn::ImportValue": "develop-common-stack-logs-bucket-name" });
        assert_eq!(
            json!({ "Fn::Join": ["", ["s3://", name.clone(), "/elasticmapreduce/"]] }),
            s3_uri(&name, "/elasticmapreduce/")
        );
    }

    #[test]
    fn non_production_buckets_are_emptied_before_deletion() {
        let config = fixtures::config();
        let ctx = Context::new(Environment::Develop, &config);
        let mut stack = ctx.stack(StackKind::Common, "test");
        let scripts = ctx.add_bucket(&mut stack, "datalake", "scripts").unwrap();
        ctx.add_bucket(&mut stack, "datalake", "logs").unwrap();

        assert_eq!(1, stack.resources_of(ResourceKind::LambdaFunction).count());
        assert_eq!(2, stack.resources_of(ResourceKind::EmptyBucket).count());

        let cleaner = stack
            .resource("DatalakeDevelopScriptsEmptyOnDelete")
            .unwrap();
        assert_eq!(scripts.resource.reference(), cleaner.properties["BucketName"]);
        assert_eq!(
            json!({ "Fn::GetAtt": ["LambdaDevelopCommonBucketCleaner", "Arn"] }),
            cleaner.properties["ServiceToken"]
        );

        let order: Vec<&str> = stack
            .creation_order()
            .unwrap()
            .iter()
            .map(|resource| resource.id.as_str())
            .collect();
        let position = |id: &str| order.iter().position(|other| *other == id).unwrap();
        assert!(position("DatalakeDevelopScripts") < position(&cleaner.id));
        assert!(position("LambdaDevelopCommonBucketCleaner") < position(&cleaner.id));
    }

    #[test]
    fn retained_buckets_keep_their_contents() {
        let config = fixtures::config();
        let ctx = Context::new(Environment::Production, &config);
        let mut stack = ctx.stack(StackKind::Common, "test");
        ctx.add_bucket(&mut stack, "datalake", "scripts").unwrap();

        assert_eq!(1, stack.resources().len());
    }

    #[test]
    fn detects_missing_baseline() {
        let mut resource =
            bucket("datalake", Environment::Develop, "logs", "123456789012").unwrap();
        resource.properties.insert(
            String::from("VersioningConfiguration"),
            json!({ "Status": "Suspended" }),
        );
        assert!(!has_baseline(&resource));

        let mut resource =
            bucket("datalake", Environment::Develop, "logs", "123456789012").unwrap();
        resource.properties["PublicAccessBlockConfiguration"]["BlockPublicPolicy"] = json!(false);
        assert!(!has_baseline(&resource));
    }
}
