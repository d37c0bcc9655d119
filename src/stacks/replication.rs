use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

use super::common::CommonStack;
use super::data_lake::{DataLakeStack, Zone};
use super::database::DatabaseHandle;
use super::network::{NetworkHandle, SubnetKind};
use super::{Context, Error};
use crate::cdc::ReplicationTask;
use crate::iam::{self, PolicyStatement, Role, ServicePrincipal};
use crate::resource::{Resource, ResourceKind, Stack, StackKind};
use crate::table_mapping::TableMappings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFormat {
    pub data_format: &'static str,
    pub max_file_size_kb: u32,
    pub timestamp_column: &'static str,
    pub include_op_for_full_load: bool,
    pub cdc_max_batch_interval_secs: u32,
}

impl Default for TargetFormat {
    fn default() -> Self {
        return Self {
            data_format: "parquet",
            max_file_size_kb: 131072,
            timestamp_column: "extracted_at",
            include_op_for_full_load: true,
            cdc_max_batch_interval_secs: 120,
        };
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(
            f,
            "DataFormat={};maxFileSize={};timestampColumnName={};includeOpForFullLoad={};cdcMaxBatchInterval={}",
            self.data_format,
            self.max_file_size_kb,
            self.timestamp_column,
            self.include_op_for_full_load,
            self.cdc_max_batch_interval_secs
        );
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationStack {
    pub stack: Stack,
    pub task_identifier: String,
    pub task: ReplicationTask,
}

/// Change-data-capture from the source database into the bronze zone.
///
/// The task waits on the instance and both endpoints through explicit
/// `DependsOn` edges, on top of the ones its references already imply.
pub fn build(
    ctx: &Context,
    network: &NetworkHandle,
    common: &CommonStack,
    data_lake: &DataLakeStack,
    database: &DatabaseHandle,
) -> Result<ReplicationStack, Error> {
    let config = &ctx.config.replication;
    let project = &ctx.config.project;
    let mut stack = ctx.stack(
        StackKind::Replication,
        "Change-data-capture from the source database into the bronze zone",
    );
    // DMS only creates replication subnet groups once `dms-vpc-role` exists.
    stack.depends_on(common.stack.kind)?;

    let bronze = data_lake.bucket(Zone::Bronze)?;
    let bronze_name = stack.import(&bronze.name)?;
    let bronze_arn = stack.import(&bronze.arn)?;

    let role = Role::new(
        &ctx.name("iam", "data-lake-raw-dms-role"),
        "Role to allow DMS to save data to data lake raw",
        &[ServicePrincipal::Dms],
    )
    .inline_policy(
        &ctx.name("iam", "data-lake-raw-dms-policy"),
        vec![PolicyStatement::allow(
            &["s3:PutObject", "s3:DeleteObject", "s3:ListBucket"],
            iam::bucket_and_objects(&bronze_arn),
        )],
    )
    .managed_policy("service-role/AmazonDMSVPCManagementRole");
    let role = stack.add(role.to_resource())?;

    let server_name = stack.import(&database.address)?;
    let source = stack.add(
        Resource::new(
            ResourceKind::DmsEndpoint,
            &ctx.name("dms-source", &format!("{project}-rds-endpoint")),
        )
        .property(
            "EndpointIdentifier",
            json!(ctx.name("dms-source", &format!("{project}-rds-endpoint"))),
        )
        .property("EndpointType", json!("source"))
        .property("EngineName", json!("postgres"))
        .property("ServerName", server_name)
        .property("Port", json!(database.port))
        .property("DatabaseName", json!(database.database_name))
        .property("Username", json!(database.username))
        .property(
            "Password",
            json!(database.password.dynamic_reference("password")),
        )
        .property("ExtraConnectionAttributes", json!("captureDDLs=Y")),
    )?;

    let target = stack.add(
        Resource::new(
            ResourceKind::DmsEndpoint,
            &ctx.name("dms-target", &format!("{project}-s3-endpoint")),
        )
        .property(
            "EndpointIdentifier",
            json!(ctx.name("dms-target", &format!("{project}-s3-endpoint"))),
        )
        .property("EndpointType", json!("target"))
        .property("EngineName", json!("s3"))
        .property(
            "ExtraConnectionAttributes",
            json!(TargetFormat::default().to_string()),
        )
        .property(
            "S3Settings",
            json!({
                "BucketName": bronze_name,
                "BucketFolder": config.bucket_folder,
                "CompressionType": "GZIP",
                "CsvDelimiter": ",",
                "CsvRowDelimiter": "\n",
                "ServiceAccessRoleArn": role.attribute("Arn"),
            }),
        ),
    )?;

    let vpc_id = stack.import(&network.vpc_id)?;
    let group = stack.add(
        Resource::new(ResourceKind::SecurityGroup, &ctx.name("dms", "sg"))
            .property("GroupName", json!(ctx.name("dms", "sg")))
            .property("GroupDescription", json!("dms replication instance"))
            .property("VpcId", vpc_id),
    )?;

    // Public subnets keep the instance off a paid NAT path.
    let mut subnet_ids = Vec::new();
    for subnet in network.require(SubnetKind::Public, 2, StackKind::Replication)? {
        subnet_ids.push(stack.import(&subnet.id)?);
    }
    let subnet_group = stack.add(
        Resource::new(
            ResourceKind::DmsReplicationSubnetGroup,
            &ctx.name("dms", "replication-subnet"),
        )
        .property(
            "ReplicationSubnetGroupIdentifier",
            json!(ctx.name("dms", "replication-subnet")),
        )
        .property(
            "ReplicationSubnetGroupDescription",
            json!("dms replication instance subnet group"),
        )
        .property("SubnetIds", Value::Array(subnet_ids)),
    )?;

    let instance = stack.add(
        Resource::new(
            ResourceKind::DmsReplicationInstance,
            &ctx.name("dms", "replication-instance"),
        )
        .property(
            "ReplicationInstanceIdentifier",
            json!(ctx.name("dms", "replication-instance")),
        )
        .property("ReplicationInstanceClass", json!(config.instance_class))
        .property("EngineVersion", json!(config.engine_version))
        .property("AllocatedStorage", json!(config.allocated_storage))
        .property("PubliclyAccessible", json!(false))
        .property("VpcSecurityGroupIds", json!([group.attribute("GroupId")]))
        .property("ReplicationSubnetGroupIdentifier", subnet_group.reference())
        .depends_on(&group)
        .depends_on(&subnet_group),
    )?;

    let mappings = TableMappings::from_rules(&config.table_rules)?;
    let document = mappings
        .to_document()
        .map_err(|error| Error::Serialization(error.to_string()))?;
    let task_identifier = format!("{}-dms-task-{}-rds", ctx.environment, project);
    stack.add(
        Resource::new(ResourceKind::DmsReplicationTask, &task_identifier)
            .property("ReplicationTaskIdentifier", json!(task_identifier))
            .property("MigrationType", json!(config.migration_type.as_str()))
            .property("ReplicationInstanceArn", instance.reference())
            .property("SourceEndpointArn", source.reference())
            .property("TargetEndpointArn", target.reference())
            .property("TableMappings", json!(document))
            .depends_on(&instance)
            .depends_on(&source)
            .depends_on(&target),
    )?;
    stack.output(
        "replication-task-identifier",
        json!(task_identifier),
        "Identifier used to start the replication task",
    );

    debug!(
        stack = %stack.name,
        task = %task_identifier,
        rules = mappings.rules.len(),
        "replication wired"
    );

    return Ok(ReplicationStack {
        stack,
        task: ReplicationTask::new(config.migration_type),
        task_identifier,
    });
}
