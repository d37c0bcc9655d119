use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::environment::Environment;
use crate::graph::{self, DependencyGraph};
use crate::naming::{self, Tag};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Stack {stack} already holds a resource with logical id {id}")]
    DuplicateResource { stack: String, id: String },

    #[error("Stack {stack} already exports {name}")]
    DuplicateExport { stack: String, name: String },

    #[error("{id} in stack {stack} references unknown resource {target}")]
    DanglingReference {
        stack: String,
        id: String,
        target: String,
    },

    #[error("Stack {stack} cannot depend on itself")]
    SelfDependency { stack: String },

    #[error("Resource ordering failed in stack {stack}: {source}")]
    Ordering { stack: String, source: graph::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackKind {
    Network,
    Common,
    DataLake,
    Database,
    Replication,
    Catalog,
    Compute,
    Orchestration,
}

impl StackKind {
    pub const ALL: [StackKind; 8] = [
        StackKind::Network,
        StackKind::Common,
        StackKind::DataLake,
        StackKind::Database,
        StackKind::Replication,
        StackKind::Catalog,
        StackKind::Compute,
        StackKind::Orchestration,
    ];

    pub fn as_str(&self) -> &'static str {
        return match self {
            StackKind::Network => "network",
            StackKind::Common => "common",
            StackKind::DataLake => "data-lake",
            StackKind::Database => "rds",
            StackKind::Replication => "dms",
            StackKind::Catalog => "glue-catalog",
            StackKind::Compute => "emr",
            StackKind::Orchestration => "airflow",
        };
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    List,
    Map,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    Vpc,
    Subnet,
    InternetGateway,
    VpcGatewayAttachment,
    RouteTable,
    Route,
    SubnetRouteTableAssociation,
    SecurityGroup,
    SecurityGroupIngress,
    Bucket,
    Role,
    InstanceProfile,
    DbParameterGroup,
    DbSubnetGroup,
    DbInstance,
    DmsEndpoint,
    DmsReplicationSubnetGroup,
    DmsReplicationInstance,
    DmsReplicationTask,
    GlueDatabase,
    GlueCrawler,
    EmrCluster,
    LogGroup,
    MwaaEnvironment,
    LambdaFunction,
    EmptyBucket,
}

impl ResourceKind {
    pub fn type_name(&self) -> &'static str {
        return match self {
            ResourceKind::Vpc => "AWS::EC2::VPC",
            ResourceKind::Subnet => "AWS::EC2::Subnet",
            ResourceKind::InternetGateway => "AWS::EC2::InternetGateway",
            ResourceKind::VpcGatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
            ResourceKind::RouteTable => "AWS::EC2::RouteTable",
            ResourceKind::Route => "AWS::EC2::Route",
            ResourceKind::SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
            ResourceKind::SecurityGroup => "AWS::EC2::SecurityGroup",
            ResourceKind::SecurityGroupIngress => "AWS::EC2::SecurityGroupIngress",
            ResourceKind::Bucket => "AWS::S3::Bucket",
            ResourceKind::Role => "AWS::IAM::Role",
            ResourceKind::InstanceProfile => "AWS::IAM::InstanceProfile",
            ResourceKind::DbParameterGroup => "AWS::RDS::DBParameterGroup",
            ResourceKind::DbSubnetGroup => "AWS::RDS::DBSubnetGroup",
            ResourceKind::DbInstance => "AWS::RDS::DBInstance",
            ResourceKind::DmsEndpoint => "AWS::DMS::Endpoint",
            ResourceKind::DmsReplicationSubnetGroup => "AWS::DMS::ReplicationSubnetGroup",
            ResourceKind::DmsReplicationInstance => "AWS::DMS::ReplicationInstance",
            ResourceKind::DmsReplicationTask => "AWS::DMS::ReplicationTask",
            ResourceKind::GlueDatabase => "AWS::Glue::Database",
            ResourceKind::GlueCrawler => "AWS::Glue::Crawler",
            ResourceKind::EmrCluster => "AWS::EMR::Cluster",
            ResourceKind::LogGroup => "AWS::Logs::LogGroup",
            ResourceKind::MwaaEnvironment => "AWS::MWAA::Environment",
            ResourceKind::LambdaFunction => "AWS::Lambda::Function",
            ResourceKind::EmptyBucket => "Custom::EmptyBucket",
        };
    }

    pub fn tag_format(&self) -> TagFormat {
        return match self {
            ResourceKind::GlueCrawler | ResourceKind::MwaaEnvironment => TagFormat::Map,
            ResourceKind::VpcGatewayAttachment
            | ResourceKind::Route
            | ResourceKind::SubnetRouteTableAssociation
            | ResourceKind::SecurityGroupIngress
            | ResourceKind::InstanceProfile
            | ResourceKind::GlueDatabase
            | ResourceKind::EmptyBucket => TagFormat::Unsupported,
            _ => TagFormat::List,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// Non-production resources go away with their stack; production keeps them.
pub fn teardown_policy(environment: Environment) -> DeletionPolicy {
    if environment.is_production() {
        return DeletionPolicy::Retain;
    }
    return DeletionPolicy::Delete;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceRef {
    pub id: String,
}

impl ResourceRef {
    pub fn reference(&self) -> Value {
        return json!({ "Ref": self.id });
    }

    pub fn attribute(&self, attribute: &str) -> Value {
        return json!({ "Fn::GetAtt": [self.id, attribute] });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Export {
    pub stack: StackKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Value,
    pub export: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub properties: Map<String, Value>,
    pub depends_on: BTreeSet<String>,
    pub deletion_policy: Option<DeletionPolicy>,
    pub tags: Vec<Tag>,
}

impl Resource {
    /// `name` is the deterministic name of the resource; the logical id is
    /// derived from it.
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        return Self {
            id: naming::logical_id(name),
            name: name.to_string(),
            kind,
            properties: Map::new(),
            depends_on: BTreeSet::new(),
            deletion_policy: None,
            tags: Vec::new(),
        };
    }

    pub fn property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        return self;
    }

    pub fn depends_on(mut self, other: &ResourceRef) -> Self {
        self.depends_on.insert(other.id.clone());
        return self;
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        return self;
    }

    /// Logical ids this resource reaches through `Ref`, `Fn::GetAtt` or
    /// `${...}` placeholders of `Fn::Sub`.
    pub fn references(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for value in self.properties.values() {
            collect_references(value, &mut found);
        }
        return found;
    }

    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut all = self.depends_on.clone();
        all.extend(self.references());
        return all;
    }
}

fn collect_references(value: &Value, found: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !target.starts_with("AWS::") {
                    found.insert(target.clone());
                }
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(target)) = parts.first() {
                    found.insert(target.clone());
                }
            }
            if let Some(Value::String(template)) = map.get("Fn::Sub") {
                collect_sub_references(template, found);
            }
            for nested in map.values() {
                collect_references(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

fn collect_sub_references(template: &str, found: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return;
        };
        let placeholder = &after[..end];
        let target = placeholder.split('.').next().unwrap_or(placeholder);
        if !target.starts_with("AWS::") && !target.is_empty() {
            found.insert(target.to_string());
        }
        rest = &after[end + 1..];
    }
}

/// One deployable unit: its resources, the values it exports and the exports
/// it imports from upstream stacks.
#[derive(Debug, Clone)]
pub struct Stack {
    pub kind: StackKind,
    pub name: String,
    pub environment: Environment,
    pub description: String,
    resources: Vec<Resource>,
    outputs: BTreeMap<String, Output>,
    imports: BTreeSet<Export>,
    dependencies: BTreeSet<StackKind>,
    tags: Vec<Tag>,
}

impl Stack {
    pub fn new(
        kind: StackKind,
        environment: Environment,
        project: &str,
        description: &str,
    ) -> Self {
        return Self {
            kind,
            name: naming::stack_name(environment, kind),
            environment,
            description: description.to_string(),
            resources: Vec::new(),
            outputs: BTreeMap::new(),
            imports: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            tags: naming::tags(project, environment, kind),
        };
    }

    pub fn add(&mut self, mut resource: Resource) -> Result<ResourceRef, Error> {
        if self.resources.iter().any(|existing| existing.id == resource.id) {
            return Err(Error::DuplicateResource {
                stack: self.name.clone(),
                id: resource.id,
            });
        }
        if resource.kind.tag_format() != TagFormat::Unsupported {
            resource.tags = self.tags.clone();
        }

        let handle = ResourceRef {
            id: resource.id.clone(),
        };
        self.resources.push(resource);
        return Ok(handle);
    }

    pub fn output(&mut self, key: &str, value: Value, description: &str) {
        self.outputs.insert(
            naming::logical_id(key),
            Output {
                value,
                export: None,
                description: Some(description.to_string()),
            },
        );
    }

    /// Publishes `value` under `<stack name>-<key>` and hands back the handle
    /// dependents import it with.
    pub fn export(&mut self, key: &str, value: Value) -> Result<Export, Error> {
        let name = naming::export_name(&self.name, key);
        let logical = naming::logical_id(key);
        if self.outputs.contains_key(&logical) {
            return Err(Error::DuplicateExport {
                stack: self.name.clone(),
                name,
            });
        }

        self.outputs.insert(
            logical,
            Output {
                value,
                export: Some(name.clone()),
                description: None,
            },
        );
        return Ok(Export {
            stack: self.kind,
            name,
        });
    }

    /// Imports an upstream export; the producing stack becomes a dependency.
    pub fn import(&mut self, export: &Export) -> Result<Value, Error> {
        self.depends_on(export.stack)?;
        self.imports.insert(export.clone());
        return Ok(json!({ "Fn::ImportValue": export.name }));
    }

    pub fn depends_on(&mut self, kind: StackKind) -> Result<(), Error> {
        if kind == self.kind {
            return Err(Error::SelfDependency {
                stack: self.name.clone(),
            });
        }
        self.dependencies.insert(kind);
        return Ok(());
    }

    pub fn resources(&self) -> &[Resource] {
        return &self.resources;
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        return self.resources.iter().find(|resource| resource.id == id);
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        return self.resources
            .iter()
            .filter(move |resource| resource.kind == kind);
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        return &self.outputs;
    }

    pub fn exports(&self) -> impl Iterator<Item = &str> {
        return self.outputs
            .values()
            .filter_map(|output| output.export.as_deref());
    }

    pub fn imports(&self) -> &BTreeSet<Export> {
        return &self.imports;
    }

    pub fn dependencies(&self) -> &BTreeSet<StackKind> {
        return &self.dependencies;
    }

    pub fn validate(&self) -> Result<(), Error> {
        for resource in &self.resources {
            for target in resource.dependencies() {
                if self.resource(&target).is_none() {
                    return Err(Error::DanglingReference {
                        stack: self.name.clone(),
                        id: resource.id.clone(),
                        target,
                    });
                }
            }
        }
        for output in self.outputs.values() {
            let mut found = BTreeSet::new();
            collect_references(&output.value, &mut found);
            if let Some(target) = found.into_iter().find(|t| self.resource(t).is_none()) {
                return Err(Error::DanglingReference {
                    stack: self.name.clone(),
                    id: String::from("Outputs"),
                    target,
                });
            }
        }

        return Ok(());
    }

    pub fn resource_graph(&self) -> DependencyGraph<String> {
        let mut graph = DependencyGraph::new();
        for resource in &self.resources {
            graph.add_node(resource.id.clone());
            for dependency in resource.dependencies() {
                graph.add_edge(resource.id.clone(), dependency);
            }
        }
        return graph;
    }

    pub fn creation_order(&self) -> Result<Vec<&Resource>, Error> {
        self.validate()?;
        let order = self
            .resource_graph()
            .topological_order()
            .map_err(|source| Error::Ordering {
                stack: self.name.clone(),
                source,
            })?;

        return Ok(order
            .iter()
            .filter_map(|id| self.resource(id))
            .collect());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stack() -> Stack {
        Stack::new(
            StackKind::Replication,
            Environment::Develop,
            "ecommerce",
            "test",
        )
    }

    #[test]
    fn finds_references_in_intrinsics() {
        let resource = Resource::new(ResourceKind::DmsReplicationTask, "task")
            .property("A", json!({ "Ref": "Instance" }))
            .property("B", json!({ "Fn::GetAtt": ["Role", "Arn"] }))
            .property("C", json!([{ "Fn::Sub": "arn:${AWS::Partition}:s3:::${Bucket}/*" }]))
            .property("D", json!({ "Ref": "AWS::Region" }));

        let references: Vec<String> = resource.references().into_iter().collect();
        assert_eq!(vec!["Bucket", "Instance", "Role"], references);
    }

    #[test]
    fn rejects_duplicate_logical_ids() {
        let mut stack = stack();
        stack
            .add(Resource::new(ResourceKind::SecurityGroup, "dms-develop-sg"))
            .unwrap();
        let result = stack.add(Resource::new(ResourceKind::SecurityGroup, "dms-develop-sg"));

        match result.err().unwrap() {
            Error::DuplicateResource { id, .. } => assert_eq!("DmsDevelopSg", id),
            _ => panic!("Expected `DuplicateResource` error"),
        }
    }

    #[test]
    fn rejects_dangling_references() {
        let mut stack = stack();
        stack
            .add(
                Resource::new(ResourceKind::DmsReplicationTask, "task")
                    .property("ReplicationInstanceArn", json!({ "Ref": "Missing" })),
            )
            .unwrap();

        assert_eq!(
            Err(Error::DanglingReference {
                stack: String::from("develop-dms-stack"),
                id: String::from("Task"),
                target: String::from("Missing"),
            }),
            stack.validate()
        );
    }

    #[test]
    fn orders_resources_by_dependency() {
        let mut stack = stack();
        let task = Resource::new(ResourceKind::DmsReplicationTask, "task");
        let instance = stack
            .add(Resource::new(ResourceKind::DmsReplicationInstance, "instance"))
            .unwrap();
        stack.add(task.depends_on(&instance)).unwrap();

        let order: Vec<&str> = stack
            .creation_order()
            .unwrap()
            .iter()
            .map(|resource| resource.id.as_str())
            .collect();
        assert_eq!(vec!["Instance", "Task"], order);
    }

    #[test]
    fn import_records_the_upstream_stack() {
        let mut upstream = Stack::new(
            StackKind::DataLake,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        let export = upstream.export("bronze-bucket-name", json!("b")).unwrap();
        assert_eq!("develop-data-lake-stack-bronze-bucket-name", export.name);

        let mut stack = stack();
        let value = stack.import(&export).unwrap();
        assert_eq!(
            json!({ "Fn::ImportValue": "develop-data-lake-stack-bronze-bucket-name" }),
            value
        );
        assert!(stack.dependencies().contains(&StackKind::DataLake));

        match upstream.export("bronze-bucket-name", json!("c")) {
            Err(Error::DuplicateExport { .. }) => {}
            _ => panic!("Expected `DuplicateExport` error"),
        }
    }

    #[test]
    fn stack_cannot_depend_on_itself() {
        let mut stack = stack();
        assert_eq!(
            Err(Error::SelfDependency {
                stack: String::from("develop-dms-stack")
            }),
            stack.depends_on(StackKind::Replication)
        );
    }

    #[test]
    fn taggable_resources_inherit_stack_tags() {
        let mut stack = stack();
        let sg = stack
            .add(Resource::new(ResourceKind::SecurityGroup, "sg"))
            .unwrap();
        let ingress = stack
            .add(Resource::new(ResourceKind::SecurityGroupIngress, "ingress"))
            .unwrap();

        assert_eq!(3, stack.resource(&sg.id).unwrap().tags.len());
        assert!(stack.resource(&ingress.id).unwrap().tags.is_empty());
    }
}
