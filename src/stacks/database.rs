use serde_json::{json, Value};
use tracing::warn;

use super::network::{NetworkHandle, SubnetKind};
use super::{Context, Error};
use crate::resource::{DeletionPolicy, Export, Resource, ResourceKind, Stack, StackKind};

pub const POSTGRES_PORT: u16 = 5432;

/// Pointer to a Secrets Manager secret, resolved by CloudFormation at deploy
/// time. The descriptor graph only ever holds the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub secret_id: String,
}

impl SecretRef {
    pub fn new(secret_id: &str) -> Self {
        return Self {
            secret_id: secret_id.to_string(),
        };
    }

    pub fn dynamic_reference(&self, key: &str) -> String {
        return format!(
            "{{{{resolve:secretsmanager:{}:SecretString:{}}}}}",
            self.secret_id, key
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseHandle {
    pub address: Export,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: SecretRef,
}

#[derive(Debug, Clone)]
pub struct DatabaseStack {
    pub stack: Stack,
    pub handle: DatabaseHandle,
}

fn parameter_group_family(engine_version: &str) -> String {
    let major = engine_version.split('.').next().unwrap_or(engine_version);
    return format!("postgres{major}");
}

fn ingress(group: &Value, cidr: &str, description: &str) -> Vec<(&'static str, Value)> {
    return vec![
        ("GroupId", group.clone()),
        ("IpProtocol", json!("tcp")),
        ("FromPort", json!(POSTGRES_PORT)),
        ("ToPort", json!(POSTGRES_PORT)),
        ("CidrIp", json!(cidr)),
        ("Description", json!(description)),
    ];
}

pub fn build(ctx: &Context, network: &NetworkHandle) -> Result<DatabaseStack, Error> {
    let config = &ctx.config.database;
    let project = &ctx.config.project;
    let mut stack = ctx.stack(
        StackKind::Database,
        "Source relational database of the e-commerce platform",
    );

    let vpc_id = stack.import(&network.vpc_id)?;
    let group = stack.add(
        Resource::new(
            ResourceKind::SecurityGroup,
            &ctx.name("rds", &format!("{project}-sg")),
        )
        .property("GroupName", json!(ctx.name("rds", &format!("{project}-sg"))))
        .property("GroupDescription", json!("Access to the source database"))
        .property("VpcId", vpc_id),
    )?;
    let group_id = group.attribute("GroupId");

    let mut rules = Vec::new();
    if config.public_access {
        warn!(
            environment = %ctx.environment,
            "source database accepts connections on {} from 0.0.0.0/0",
            POSTGRES_PORT
        );
        rules.push(("public", ingress(&group_id, "0.0.0.0/0", "Public access")));
    }
    for (index, subnet) in network.private_subnets.iter().enumerate() {
        rules.push((
            "private",
            ingress(&group_id, &subnet.cidr, &format!("Private subnet {}", index + 1)),
        ));
    }
    for (position, (scope, properties)) in rules.into_iter().enumerate() {
        let mut rule = Resource::new(
            ResourceKind::SecurityGroupIngress,
            &ctx.name("rds", &format!("{project}-sg-{scope}-ingress-{}", position + 1)),
        );
        for (key, value) in properties {
            rule = rule.property(key, value);
        }
        stack.add(rule)?;
    }

    let parameter_group = stack.add(
        Resource::new(
            ResourceKind::DbParameterGroup,
            &ctx.name(project, "rds-parameter-group"),
        )
        .property(
            "Description",
            json!("Parameter group to allow CDC from RDS using DMS."),
        )
        .property("Family", json!(parameter_group_family(&config.engine_version)))
        .property(
            "Parameters",
            json!({ "rds.logical_replication": "1", "wal_sender_timeout": "0" }),
        ),
    )?;

    let public_subnets = network.require(SubnetKind::Public, 1, StackKind::Database)?;
    let mut subnet_ids = Vec::new();
    for subnet in public_subnets {
        subnet_ids.push(stack.import(&subnet.id)?);
    }
    let subnet_group = stack.add(
        Resource::new(ResourceKind::DbSubnetGroup, &ctx.name("rds", "subnet"))
            .property("DBSubnetGroupDescription", json!("place RDS on public subnet"))
            .property("SubnetIds", Value::Array(subnet_ids)),
    )?;

    let instance_deletion = if ctx.environment.is_production() {
        DeletionPolicy::Snapshot
    } else {
        DeletionPolicy::Delete
    };
    let password = SecretRef::new(&config.password_secret);
    let instance = stack.add(
        Resource::new(
            ResourceKind::DbInstance,
            &ctx.name("rds", &format!("{project}-db")),
        )
        .property(
            "DBInstanceIdentifier",
            json!(ctx.name("rds", &format!("{project}-db"))),
        )
        .property("DBName", json!(config.name))
        .property("Engine", json!("postgres"))
        .property("EngineVersion", json!(config.engine_version))
        .property("DBInstanceClass", json!(config.instance_class))
        .property("AllocatedStorage", json!(config.allocated_storage.to_string()))
        .property("MasterUsername", json!(config.username))
        .property("MasterUserPassword", json!(password.dynamic_reference("password")))
        .property("Port", json!(POSTGRES_PORT.to_string()))
        .property("PubliclyAccessible", json!(config.public_access))
        .property("DBSubnetGroupName", subnet_group.reference())
        .property("DBParameterGroupName", parameter_group.reference())
        .property("VPCSecurityGroups", json!([group_id]))
        .deletion_policy(instance_deletion),
    )?;

    let address = stack.export("endpoint-address", instance.attribute("Endpoint.Address"))?;
    stack.export("endpoint-port", instance.attribute("Endpoint.Port"))?;

    return Ok(DatabaseStack {
        stack,
        handle: DatabaseHandle {
            address,
            port: POSTGRES_PORT,
            database_name: config.name.clone(),
            username: config.username.clone(),
            password,
        },
    });
}
