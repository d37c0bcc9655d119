//! Assembles the stacks of one environment and checks the whole graph before
//! anything reaches the provider.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::bucket::has_baseline;
use crate::config::Config;
use crate::environment::Environment;
use crate::graph::{self, DependencyGraph};
use crate::resource::{self, ResourceKind, Stack, StackKind};
use crate::stacks::{
    self, catalog, common, compute, data_lake, database, network, orchestration, replication,
    Context,
};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Stack(#[from] stacks::Error),

    #[error(transparent)]
    Resource(#[from] resource::Error),

    #[error("Stack dependency error: {0}")]
    Graph(#[from] graph::Error),

    #[error("{stack} depends on {dependency}, which is not part of the platform")]
    MissingStack {
        stack: String,
        dependency: StackKind,
    },

    #[error("{stack} imports {export}, which {producer} does not export")]
    UnknownExport {
        stack: String,
        producer: String,
        export: String,
    },

    #[error("Bucket {bucket} in {stack} lacks versioning, encryption or a public access block")]
    MissingBaseline { stack: String, bucket: String },
}

#[derive(Debug, Clone)]
pub struct Platform {
    pub environment: Environment,
    stacks: BTreeMap<StackKind, Stack>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStack {
    pub name: String,
    pub kind: StackKind,
    pub depends_on: Vec<String>,
    pub resources: Vec<String>,
}

/// The provisioning plan: stacks grouped into waves that may be deployed
/// concurrently, each with its resources in creation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub environment: Environment,
    pub waves: Vec<Vec<String>>,
    pub stacks: Vec<PlannedStack>,
}

impl Plan {
    pub fn order(&self) -> impl Iterator<Item = &PlannedStack> {
        return self.stacks.iter();
    }
}

/// Builds every stack for `environment`. Upstream handles are passed to
/// dependents explicitly, in dependency order.
pub fn assemble(environment: Environment, config: &Config) -> Result<Platform, Error> {
    let ctx = Context::new(environment, config);

    let network = network::build(&ctx)?;
    let common = common::build(&ctx, &network.handle)?;
    let data_lake = data_lake::build(&ctx)?;
    let database = database::build(&ctx, &network.handle)?;
    let replication =
        replication::build(&ctx, &network.handle, &common, &data_lake, &database.handle)?;
    let catalog = catalog::build(&ctx, &data_lake)?;
    let compute = compute::build(&ctx, &network.handle, &common, &data_lake)?;
    let orchestration = orchestration::build(&ctx, &network.handle, &common, &data_lake)?;

    let platform = Platform::new(
        environment,
        vec![
            network.stack,
            common.stack,
            data_lake.stack,
            database.stack,
            replication.stack,
            catalog.stack,
            compute.stack,
            orchestration.stack,
        ],
    );
    platform.validate()?;

    info!(
        environment = %environment,
        stacks = platform.stacks.len(),
        "platform assembled"
    );
    return Ok(platform);
}

impl Platform {
    pub fn new(environment: Environment, stacks: Vec<Stack>) -> Self {
        return Self {
            environment,
            stacks: stacks.into_iter().map(|stack| (stack.kind, stack)).collect(),
        };
    }

    pub fn stack(&self, kind: StackKind) -> Option<&Stack> {
        return self.stacks.get(&kind);
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        return self.stacks.values();
    }

    /// Checks every stack, every import and every bucket, then the stack graph
    /// for cycles.
    pub fn validate(&self) -> Result<(), Error> {
        for stack in self.stacks.values() {
            stack.validate()?;

            for dependency in stack.dependencies() {
                if !self.stacks.contains_key(dependency) {
                    return Err(Error::MissingStack {
                        stack: stack.name.clone(),
                        dependency: *dependency,
                    });
                }
            }

            for import in stack.imports() {
                let producer = self.stacks.get(&import.stack).ok_or(Error::MissingStack {
                    stack: stack.name.clone(),
                    dependency: import.stack,
                })?;
                if !producer.exports().any(|name| name == import.name) {
                    return Err(Error::UnknownExport {
                        stack: stack.name.clone(),
                        producer: producer.name.clone(),
                        export: import.name.clone(),
                    });
                }
            }

            if let Some(bucket) = stack
                .resources_of(ResourceKind::Bucket)
                .find(|bucket| !has_baseline(bucket))
            {
                return Err(Error::MissingBaseline {
                    stack: stack.name.clone(),
                    bucket: bucket.name.clone(),
                });
            }
        }

        self.stack_graph().waves()?;
        return Ok(());
    }

    pub fn stack_graph(&self) -> DependencyGraph<StackKind> {
        let mut graph = DependencyGraph::new();
        for stack in self.stacks.values() {
            graph.add_node(stack.kind);
            for dependency in stack.dependencies() {
                graph.add_edge(stack.kind, *dependency);
            }
        }
        return graph;
    }

    pub fn plan(&self) -> Result<Plan, Error> {
        let waves = self.stack_graph().waves()?;

        let mut planned = Vec::new();
        for kind in waves.iter().flatten() {
            let Some(stack) = self.stacks.get(kind) else {
                continue;
            };
            let resources = stack
                .creation_order()?
                .iter()
                .map(|resource| resource.id.clone())
                .collect();
            planned.push(PlannedStack {
                name: stack.name.clone(),
                kind: stack.kind,
                depends_on: stack
                    .dependencies()
                    .iter()
                    .filter_map(|kind| self.stacks.get(kind))
                    .map(|dependency| dependency.name.clone())
                    .collect(),
                resources,
            });
        }

        let waves: Vec<Vec<String>> = waves
            .iter()
            .map(|wave| {
                wave.iter()
                    .filter_map(|kind| self.stacks.get(kind))
                    .map(|stack| stack.name.clone())
                    .collect()
            })
            .collect();
        debug!(waves = waves.len(), "provisioning plan resolved");

        return Ok(Plan {
            environment: self.environment,
            waves,
            stacks: planned,
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::resource::{Resource, Stack};
    use crate::stacks::fixtures;

    fn platform(environment: Environment) -> Platform {
        assemble(environment, &fixtures::config()).unwrap()
    }

    #[test]
    fn provisions_in_dependency_waves() {
        let plan = platform(Environment::Develop).plan().unwrap();

        assert_eq!(
            vec![
                vec!["develop-network-stack", "develop-data-lake-stack"],
                vec!["develop-common-stack", "develop-rds-stack", "develop-glue-catalog-stack"],
                vec!["develop-dms-stack", "develop-emr-stack", "develop-airflow-stack"],
            ],
            plan.waves
        );

        let position = |name: &str| plan.order().position(|stack| stack.name == name).unwrap();
        for stack in plan.order() {
            for dependency in &stack.depends_on {
                assert!(position(dependency) < position(&stack.name));
            }
        }
    }

    #[test]
    fn stack_graph_is_acyclic_with_every_stack() {
        let platform = platform(Environment::Production);
        let graph = platform.stack_graph();

        assert_eq!(8, graph.len());
        assert!(graph.waves().is_ok());
        let replication_needs = graph.transitive_dependencies(&StackKind::Replication);
        for kind in [
            StackKind::Network,
            StackKind::Common,
            StackKind::DataLake,
            StackKind::Database,
        ] {
            assert!(replication_needs.contains(&kind));
        }
    }

    #[test]
    fn names_are_identical_across_runs() {
        let first = platform(Environment::Staging).plan().unwrap();
        let second = platform(Environment::Staging).plan().unwrap();
        assert_eq!(first, second);
    }

    const PHYSICAL_NAME_KEYS: [&str; 13] = [
        "RoleName",
        "InstanceProfileName",
        "BucketName",
        "GroupName",
        "LogGroupName",
        "Name",
        "DBInstanceIdentifier",
        "DBParameterGroupName",
        "DBSubnetGroupName",
        "EndpointIdentifier",
        "ReplicationInstanceIdentifier",
        "ReplicationSubnetGroupIdentifier",
        "ReplicationTaskIdentifier",
    ];

    fn physical_names(platform: &Platform) -> Vec<String> {
        let mut names = Vec::new();
        for resource in platform.stacks().flat_map(|stack| stack.resources()) {
            let properties = &resource.properties;
            let nested = properties.get("DatabaseInput").and_then(|input| input.get("Name"));
            let values = PHYSICAL_NAME_KEYS
                .iter()
                .filter_map(|key| properties.get(*key))
                .chain(nested);
            for value in values {
                if let Some(name) = value.as_str() {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    #[test]
    fn physical_names_are_unique_across_environments_of_one_account() {
        let develop = assemble(Environment::Develop, &fixtures::config()).unwrap();
        let mut shared = fixtures::config();
        shared.common.create_dms_vpc_role = false;
        let staging = assemble(Environment::Staging, &shared).unwrap();

        let mut names = physical_names(&develop);
        names.extend(physical_names(&staging));
        assert!(names.len() > 40);

        let mut seen = std::collections::BTreeSet::new();
        for name in &names {
            assert!(seen.insert(name.clone()), "{name} is not unique");
        }
        assert_eq!(
            1,
            names.iter().filter(|name| *name == "dms-vpc-role").count()
        );
    }

    #[test]
    fn every_bucket_has_the_baseline() {
        let platform = platform(Environment::Develop);
        let buckets: Vec<_> = platform
            .stacks()
            .flat_map(|stack| stack.resources_of(ResourceKind::Bucket))
            .collect();

        assert_eq!(6, buckets.len());
        assert!(buckets.iter().all(|bucket| has_baseline(bucket)));
    }

    #[test]
    fn rejects_a_bucket_without_baseline() {
        let mut stack = Stack::new(
            StackKind::DataLake,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        stack
            .add(
                Resource::new(ResourceKind::Bucket, "datalake-develop-raw")
                    .property("BucketName", json!("datalake-develop-raw-123456789012")),
            )
            .unwrap();

        assert_eq!(
            Err(Error::MissingBaseline {
                stack: String::from("develop-data-lake-stack"),
                bucket: String::from("datalake-develop-raw"),
            }),
            Platform::new(Environment::Develop, vec![stack]).validate()
        );
    }

    #[test]
    fn rejects_imports_of_unknown_exports() {
        let mut producer = Stack::new(
            StackKind::DataLake,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        let export = producer.export("bronze-bucket-name", json!("bronze")).unwrap();
        let mut forged = export.clone();
        forged.name = String::from("develop-data-lake-stack-platinum-bucket-name");

        let mut consumer = Stack::new(
            StackKind::Catalog,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        consumer.import(&export).unwrap();
        consumer.import(&forged).unwrap();

        match Platform::new(Environment::Develop, vec![producer, consumer]).validate() {
            Err(Error::UnknownExport { export, .. }) => {
                assert_eq!("develop-data-lake-stack-platinum-bucket-name", export)
            }
            other => panic!("Expected `UnknownExport` error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_imports_from_absent_stacks() {
        let mut producer = Stack::new(
            StackKind::DataLake,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        let export = producer.export("bronze-bucket-name", json!("bronze")).unwrap();
        let mut consumer = Stack::new(
            StackKind::Catalog,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        consumer.import(&export).unwrap();

        assert_eq!(
            Err(Error::MissingStack {
                stack: String::from("develop-glue-catalog-stack"),
                dependency: StackKind::DataLake,
            }),
            Platform::new(Environment::Develop, vec![consumer]).validate()
        );
    }

    #[test]
    fn rejects_stack_cycles() {
        let mut network = Stack::new(
            StackKind::Network,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        let mut common = Stack::new(
            StackKind::Common,
            Environment::Develop,
            "ecommerce",
            "test",
        );
        common.depends_on(StackKind::Network).unwrap();
        network.depends_on(StackKind::Common).unwrap();

        match Platform::new(Environment::Develop, vec![network, common]).validate() {
            Err(Error::Graph(graph::Error::Cycle(nodes))) => assert_eq!(2, nodes.len()),
            other => panic!("Expected `Cycle` error, got {:?}", other),
        }
    }
}
