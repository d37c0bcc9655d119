use serde::Serialize;
use serde_json::{json, Value};

use crate::resource::{Resource, ResourceKind, ResourceRef};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePrincipal {
    Dms,
    Glue,
    Ec2,
    ElasticMapReduce,
    Airflow,
    AirflowEnv,
    Lambda,
}

impl ServicePrincipal {
    pub fn as_str(&self) -> &'static str {
        return match self {
            ServicePrincipal::Dms => "dms.amazonaws.com",
            ServicePrincipal::Glue => "glue.amazonaws.com",
            ServicePrincipal::Ec2 => "ec2.amazonaws.com",
            ServicePrincipal::ElasticMapReduce => "elasticmapreduce.amazonaws.com",
            ServicePrincipal::Airflow => "airflow.amazonaws.com",
            ServicePrincipal::AirflowEnv => "airflow-env.amazonaws.com",
            ServicePrincipal::Lambda => "lambda.amazonaws.com",
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: &'static str,
    pub action: Vec<String>,
    pub resource: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<Value>) -> Self {
        return Self {
            effect: "Allow",
            action: actions.iter().map(|action| action.to_string()).collect(),
            resource: resources,
        };
    }

    pub fn allows(&self, action: &str) -> bool {
        return self.action.iter().any(|granted| {
            granted == action
                || granted
                    .strip_suffix('*')
                    .map_or(false, |prefix| action.starts_with(prefix))
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: &'static str,
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        return Self {
            version: POLICY_VERSION,
            statement: statements,
        };
    }
}

pub fn bucket_and_objects(bucket_arn: &Value) -> Vec<Value> {
    return vec![
        bucket_arn.clone(),
        json!({ "Fn::Join": ["", [bucket_arn, "/*"]] }),
    ];
}

pub fn managed_policy_arn(name: &str) -> Value {
    return json!({ "Fn::Sub": format!("arn:${{AWS::Partition}}:iam::aws:policy/{name}") });
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub name: String,
    pub role_name: Option<String>,
    pub description: String,
    pub trusted: Vec<ServicePrincipal>,
    pub managed_policies: Vec<String>,
    pub inline_policies: Vec<(String, PolicyDocument)>,
}

impl Role {
    pub fn new(name: &str, description: &str, trusted: &[ServicePrincipal]) -> Self {
        return Self {
            name: name.to_string(),
            role_name: None,
            description: description.to_string(),
            trusted: trusted.to_vec(),
            managed_policies: Vec::new(),
            inline_policies: Vec::new(),
        };
    }

    /// Pins the physical role name; only for roles a service looks up by name.
    pub fn fixed_name(mut self, role_name: &str) -> Self {
        self.role_name = Some(role_name.to_string());
        return self;
    }

    pub fn managed_policy(mut self, name: &str) -> Self {
        self.managed_policies.push(name.to_string());
        return self;
    }

    pub fn inline_policy(mut self, name: &str, statements: Vec<PolicyStatement>) -> Self {
        self.inline_policies
            .push((name.to_string(), PolicyDocument::new(statements)));
        return self;
    }

    pub fn statements(&self) -> impl Iterator<Item = &PolicyStatement> {
        return self.inline_policies
            .iter()
            .flat_map(|(_, document)| document.statement.iter());
    }

    pub fn trust_policy(&self) -> Value {
        let services: Vec<&str> = self.trusted.iter().map(|p| p.as_str()).collect();
        return json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": services },
                "Action": "sts:AssumeRole"
            }]
        });
    }

    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(ResourceKind::Role, &self.name)
            .property("Description", json!(self.description))
            .property("AssumeRolePolicyDocument", self.trust_policy());

        if let Some(role_name) = &self.role_name {
            resource = resource.property("RoleName", json!(role_name));
        }
        if !self.managed_policies.is_empty() {
            let arns: Vec<Value> = self
                .managed_policies
                .iter()
                .map(|name| managed_policy_arn(name))
                .collect();
            resource = resource.property("ManagedPolicyArns", Value::Array(arns));
        }
        if !self.inline_policies.is_empty() {
            let policies: Vec<Value> = self
                .inline_policies
                .iter()
                .map(|(name, document)| json!({ "PolicyName": name, "PolicyDocument": document }))
                .collect();
            resource = resource.property("Policies", Value::Array(policies));
        }

        return resource;
    }
}

pub fn instance_profile(name: &str, role: &ResourceRef) -> Resource {
    return Resource::new(ResourceKind::InstanceProfile, name)
        .property("InstanceProfileName", json!(name))
        .property("Roles", json!([role.reference()]));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wildcard_actions_cover_specific_ones() {
        let statement = PolicyStatement::allow(&["glue:*", "s3:GetObject"], vec![json!("*")]);
        assert!(statement.allows("glue:CreateTable"));
        assert!(statement.allows("s3:GetObject"));
        assert!(!statement.allows("s3:PutObject"));
    }

    #[test]
    fn role_resource_carries_trust_and_policies() {
        let role = Role::new(
            "iam-develop-airflow-role",
            "Airflow execution",
            &[ServicePrincipal::Airflow, ServicePrincipal::AirflowEnv],
        )
        .managed_policy("AmazonElasticMapReduceFullAccess")
        .inline_policy(
            "iam-develop-airflow-policy",
            vec![PolicyStatement::allow(&["logs:DescribeLogGroups"], vec![json!("*")])],
        );

        let resource = role.to_resource();
        assert_eq!(ResourceKind::Role, resource.kind);
        assert_eq!(
            json!(["airflow.amazonaws.com", "airflow-env.amazonaws.com"]),
            resource.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"]
        );
        assert_eq!(
            json!("logs:DescribeLogGroups"),
            resource.properties["Policies"][0]["PolicyDocument"]["Statement"][0]["Action"][0]
        );
        assert!(resource.properties.get("RoleName").is_none());
    }

    #[test]
    fn bucket_resources_include_objects() {
        let arn = json!({ "Fn::GetAtt": ["Bronze", "Arn"] });
        let resources = bucket_and_objects(&arn);
        assert_eq!(2, resources.len());
        assert_eq!(arn, resources[0]);
    }
}
