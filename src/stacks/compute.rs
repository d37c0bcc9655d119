use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::common::CommonStack;
use super::data_lake::{DataLakeStack, Zone};
use super::network::{NetworkHandle, SubnetKind};
use super::{Context, Error};
use crate::bucket::s3_uri;
use crate::iam::{self, PolicyStatement, Role, ServicePrincipal};
use crate::resource::{Resource, ResourceKind, Stack, StackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeLayer {
    BronzeSilver,
    SilverGold,
}

impl ComputeLayer {
    pub fn as_str(&self) -> &'static str {
        return match self {
            ComputeLayer::BronzeSilver => "bronze_silver",
            ComputeLayer::SilverGold => "silver_gold",
        };
    }

    pub fn source(&self) -> Zone {
        return match self {
            ComputeLayer::BronzeSilver => Zone::Bronze,
            ComputeLayer::SilverGold => Zone::Silver,
        };
    }

    pub fn target(&self) -> Zone {
        return match self {
            ComputeLayer::BronzeSilver => Zone::Silver,
            ComputeLayer::SilverGold => Zone::Gold,
        };
    }
}

#[derive(Debug, Clone)]
pub struct ComputeStack {
    pub stack: Stack,
    pub layer: ComputeLayer,
    pub cluster_name: String,
}

/// Transient Spark cluster moving data one hop up the lake: it runs the
/// configured script once and shuts down.
pub fn build(
    ctx: &Context,
    network: &NetworkHandle,
    common: &CommonStack,
    data_lake: &DataLakeStack,
) -> Result<ComputeStack, Error> {
    let config = &ctx.config.compute;
    let layer = config.layer;
    let layer_name = layer.as_str().replace('_', "-");
    let mut stack = ctx.stack(
        StackKind::Compute,
        "Batch processing cluster between data lake zones",
    );

    let source = data_lake.bucket(layer.source())?;
    let target = data_lake.bucket(layer.target())?;
    let source_arn = stack.import(&source.arn)?;
    let target_arn = stack.import(&target.arn)?;
    let scripts_name = stack.import(&common.scripts.name)?;
    let scripts_arn = stack.import(&common.scripts.arn)?;
    let logs_name = stack.import(&common.logs.name)?;

    let read_scripts = PolicyStatement::allow(
        &["s3:GetObject", "s3:ListBucket"],
        iam::bucket_and_objects(&scripts_arn),
    );

    let service_role = Role::new(
        &ctx.name("iam", "emr-role"),
        "Role EMR",
        &[ServicePrincipal::ElasticMapReduce],
    )
    .managed_policy("service-role/AmazonElasticMapReduceRole")
    .inline_policy(&ctx.name("iam", "emr-read-scripts-policy"), vec![read_scripts.clone()]);
    let service_role = stack.add(service_role.to_resource())?;

    let instance_role = Role::new(
        &ctx.name("iam", "emr-ec2-role"),
        "Role EC2 for EMR",
        &[ServicePrincipal::Ec2],
    )
    .managed_policy("service-role/AmazonElasticMapReduceforEC2Role")
    .inline_policy(
        &ctx.name("iam", "emr-ec2-data-lake-policy"),
        vec![
            PolicyStatement::allow(
                &["s3:GetObject", "s3:ListBucket"],
                iam::bucket_and_objects(&source_arn),
            ),
            PolicyStatement::allow(
                &["s3:GetObject", "s3:ListBucket", "s3:PutObject", "s3:DeleteObject"],
                iam::bucket_and_objects(&target_arn),
            ),
            read_scripts,
        ],
    );
    let instance_role = stack.add(instance_role.to_resource())?;
    let profile = stack.add(iam::instance_profile(
        &ctx.name("iam", "emr-ec2-instance-profile"),
        &instance_role,
    ))?;

    let subnet = network.require(SubnetKind::Public, 1, StackKind::Compute)?;
    let subnet_id = stack.import(&subnet[0].id)?;

    let cluster_name = format!("emr-cluster-{}-{}", ctx.environment, layer_name);
    let instance_group = |role: &str, count: u32| {
        json!({
            "InstanceCount": count,
            "InstanceType": config.instance_type,
            "Market": "ON_DEMAND",
            "Name": format!("emr-instance-group-{}-{}-{}", ctx.environment, layer_name, role),
        })
    };
    stack.add(
        Resource::new(ResourceKind::EmrCluster, &cluster_name)
            .property("Name", json!(cluster_name))
            .property("ReleaseLabel", json!(config.release_label))
            .property("Applications", json!([{ "Name": "Spark" }]))
            .property(
                "Instances",
                json!({
                    "MasterInstanceGroup": instance_group("master", 1),
                    "CoreInstanceGroup": instance_group("core", config.core_instances),
                    "Ec2SubnetId": subnet_id,
                    "KeepJobFlowAliveWhenNoSteps": false,
                    "TerminationProtected": false,
                }),
            )
            .property("JobFlowRole", profile.reference())
            .property("ServiceRole", service_role.reference())
            .property("LogUri", s3_uri(&logs_name, "/elasticmapreduce/"))
            .property(
                "Configurations",
                json!([
                    {
                        "Classification": "spark-env",
                        "Configurations": [{
                            "Classification": "export",
                            "ConfigurationProperties": {
                                "PYSPARK_PYTHON": "/usr/bin/python3",
                                "PYSPARK_DRIVER_PYTHON": "/usr/bin/python3"
                            }
                        }]
                    },
                    {
                        "Classification": "spark-defaults",
                        "ConfigurationProperties": { "spark.sql.execution.arrow.enabled": "true" }
                    },
                    {
                        "Classification": "spark",
                        "ConfigurationProperties": { "maximizeResourceAllocation": "true" }
                    }
                ]),
            )
            .property(
                "Steps",
                json!([{
                    "Name": layer.as_str(),
                    "ActionOnFailure": "CONTINUE",
                    "HadoopJarStep": {
                        "Jar": "command-runner.jar",
                        "Args": [
                            "spark-submit",
                            "--deploy-mode",
                            "cluster",
                            s3_uri(&scripts_name, &format!("/{}", config.spark_script)),
                        ]
                    }
                }]),
            )
            .property("VisibleToAllUsers", json!(true))
            .depends_on(&profile)
            .depends_on(&service_role),
    )?;

    debug!(
        stack = %stack.name,
        cluster = %cluster_name,
        from = %layer.source(),
        to = %layer.target(),
        "compute cluster described"
    );

    return Ok(ComputeStack {
        stack,
        layer,
        cluster_name,
    });
}
