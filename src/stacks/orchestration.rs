use serde_json::{json, Value};
use tracing::{debug, warn};

use super::common::CommonStack;
use super::data_lake::{DataLakeStack, Zone};
use super::network::{NetworkHandle, SubnetKind};
use super::{Context, Error};
use crate::iam::{self, PolicyStatement, Role, ServicePrincipal};
use crate::resource::{teardown_policy, Resource, ResourceKind, ResourceRef, Stack, StackKind};

/// MWAA only reads source buckets whose name starts with `airflow-`.
pub const SOURCE_BUCKET_PREFIX: &str = "airflow";

/// MWAA needs two private subnets in distinct availability zones.
const REQUIRED_PRIVATE_SUBNETS: usize = 2;

pub const LOG_CATEGORIES: [&str; 5] = [
    "DAGProcessing",
    "Scheduler",
    "Task",
    "WebServer",
    "Worker",
];

#[derive(Debug, Clone)]
pub struct OrchestrationStack {
    pub stack: Stack,
    pub environment_name: String,
    pub source_bucket: String,
    pub execution_role: Role,
}

/// `<category>Logs` is the logging configuration key of each category.
fn logging_key(category: &str) -> String {
    let key = match category {
        "DAGProcessing" => "DagProcessing",
        "WebServer" => "Webserver",
        other => other,
    };
    return format!("{key}Logs");
}

pub fn build(
    ctx: &Context,
    network: &NetworkHandle,
    common: &CommonStack,
    data_lake: &DataLakeStack,
) -> Result<OrchestrationStack, Error> {
    let config = &ctx.config.orchestration;
    let environment_name = ctx.name("mwaa", "");
    let mut stack = ctx.stack(
        StackKind::Orchestration,
        "Managed workflow environment orchestrating the data lake jobs",
    );

    let mut log_groups: Vec<(&str, ResourceRef)> = Vec::new();
    for category in LOG_CATEGORIES {
        let name = format!("airflow-{environment_name}-{category}");
        let group = stack.add(
            Resource::new(ResourceKind::LogGroup, &name)
                .property("LogGroupName", json!(name))
                .property("RetentionInDays", json!(config.log_retention_days))
                .deletion_policy(teardown_policy(ctx.environment)),
        )?;
        log_groups.push((category, group));
    }

    let vpc_id = stack.import(&network.vpc_id)?;
    let group = stack.add(
        Resource::new(ResourceKind::SecurityGroup, &ctx.name("airflow", "sg"))
            .property("GroupName", json!(ctx.name("airflow", "sg")))
            .property("GroupDescription", json!("airflow environment"))
            .property("VpcId", vpc_id),
    )?;
    stack.add(
        Resource::new(
            ResourceKind::SecurityGroupIngress,
            &ctx.name("airflow", "sg-self-ingress"),
        )
        .property("GroupId", group.attribute("GroupId"))
        .property("IpProtocol", json!("-1"))
        .property("SourceSecurityGroupId", group.attribute("GroupId")),
    )?;

    let source_bucket = ctx.add_bucket(&mut stack, SOURCE_BUCKET_PREFIX, "dags")?;
    let bucket = source_bucket.resource.clone();
    let bucket_arn = bucket.attribute("Arn");

    let mut data_access = Vec::new();
    for zone in [Zone::Bronze, Zone::Silver] {
        let handle = data_lake.bucket(zone)?;
        data_access.extend(iam::bucket_and_objects(&stack.import(&handle.arn)?));
    }
    let scripts_arn = stack.import(&common.scripts.arn)?;

    let environment_arn = json!({
        "Fn::Sub": format!(
            "arn:${{AWS::Partition}}:airflow:${{AWS::Region}}:${{AWS::AccountId}}:environment/{environment_name}"
        )
    });
    let log_arns: Vec<Value> = log_groups
        .iter()
        .flat_map(|(_, group)| {
            let arn = group.attribute("Arn");
            [arn.clone(), json!({ "Fn::Join": ["", [arn, "*"]] })]
        })
        .collect();

    let role = Role::new(
        &ctx.name("iam", "data-lake-raw-airflow-role"),
        "Role to allow Airflow to access resources",
        &[ServicePrincipal::Airflow, ServicePrincipal::AirflowEnv],
    )
    .inline_policy(
        &ctx.name("iam", "airflow-execution-policy"),
        vec![
            PolicyStatement::allow(
                &[
                    "s3:PutObjectTagging",
                    "s3:DeleteObject",
                    "s3:ListBucket",
                    "s3:GetObject",
                    "s3:PutObject",
                ],
                data_access,
            ),
            PolicyStatement::allow(
                &["s3:GetObject", "s3:ListBucket"],
                iam::bucket_and_objects(&scripts_arn),
            ),
            PolicyStatement::allow(&["airflow:PublishMetrics"], vec![environment_arn]),
            PolicyStatement::allow(&["s3:*"], iam::bucket_and_objects(&bucket_arn)),
            PolicyStatement::allow(
                &[
                    "logs:CreateLogStream",
                    "logs:CreateLogGroup",
                    "logs:PutLogEvents",
                    "logs:GetLogEvents",
                    "logs:GetLogRecord",
                    "logs:GetLogGroupFields",
                    "logs:GetQueryResults",
                ],
                log_arns,
            ),
            PolicyStatement::allow(&["logs:DescribeLogGroups"], vec![json!("*")]),
            PolicyStatement::allow(&["cloudwatch:PutMetricData"], vec![json!("*")]),
            PolicyStatement::allow(
                &[
                    "sqs:ChangeMessageVisibility",
                    "sqs:DeleteMessage",
                    "sqs:GetQueueAttributes",
                    "sqs:GetQueueUrl",
                    "sqs:ReceiveMessage",
                    "sqs:SendMessage",
                ],
                vec![json!({
                    "Fn::Sub": "arn:${AWS::Partition}:sqs:${AWS::Region}:*:airflow-celery-*"
                })],
            ),
            PolicyStatement::allow(
                &[
                    "cloudformation:Describe*",
                    "cloudformation:EstimateTemplateCost",
                    "cloudformation:Get*",
                    "cloudformation:List*",
                    "cloudformation:ValidateTemplate",
                    "cloudformation:Detect*",
                ],
                vec![json!("*")],
            ),
        ],
    )
    .managed_policy("AmazonElasticMapReduceFullAccess");
    let execution_role = role.clone();
    let role = stack.add(role.to_resource())?;

    let mut subnet_ids = Vec::new();
    let private_subnets = network.require(
        SubnetKind::Private,
        REQUIRED_PRIVATE_SUBNETS,
        StackKind::Orchestration,
    )?;
    for subnet in private_subnets {
        subnet_ids.push(stack.import(&subnet.id)?);
    }

    let mut logging = serde_json::Map::new();
    for (category, _) in &log_groups {
        logging.insert(
            logging_key(category),
            json!({ "Enabled": true, "LogLevel": config.log_level }),
        );
    }

    let mut environment = Resource::new(ResourceKind::MwaaEnvironment, &environment_name)
        .property("Name", json!(environment_name))
        .property("AirflowVersion", json!(config.airflow_version))
        .property("EnvironmentClass", json!(config.environment_class))
        .property("MinWorkers", json!(config.min_workers))
        .property("MaxWorkers", json!(config.max_workers))
        .property("ExecutionRoleArn", role.attribute("Arn"))
        .property("SourceBucketArn", bucket_arn)
        .property("DagS3Path", json!("dags"))
        .property("RequirementsS3Path", json!("requirements.txt"))
        .property("WebserverAccessMode", json!("PUBLIC_ONLY"))
        .property("WeeklyMaintenanceWindowStart", json!("WED:01:00"))
        .property("LoggingConfiguration", Value::Object(logging))
        .property(
            "NetworkConfiguration",
            json!({
                "SecurityGroupIds": [group.attribute("GroupId")],
                "SubnetIds": subnet_ids,
            }),
        )
        .depends_on(&role)
        .depends_on(&group)
        .depends_on(&bucket);
    // MWAA creates its log groups itself unless they already exist.
    for (_, log_group) in &log_groups {
        environment = environment.depends_on(log_group);
    }
    let environment = stack.add(environment)?;

    stack.output(
        "webserver-url",
        environment.attribute("WebserverUrl"),
        "Airflow web server",
    );
    warn!(
        environment = %environment_name,
        "airflow web server is reachable from the internet"
    );
    debug!(
        stack = %stack.name,
        bucket = %source_bucket.physical_name,
        "orchestration environment described"
    );

    return Ok(OrchestrationStack {
        stack,
        environment_name,
        source_bucket: source_bucket.physical_name,
        execution_role,
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bucket::has_baseline;
    use crate::environment::Environment;
    use crate::stacks::{common, data_lake, fixtures, network};

    fn orchestration(availability_zones: u8) -> Result<OrchestrationStack, Error> {
        let mut config = fixtures::config();
        config.network.availability_zones = availability_zones;
        let ctx = Context::new(Environment::Develop, &config);
        let network = network::build(&ctx).unwrap();
        let common = common::build(&ctx, &network.handle).unwrap();
        let data_lake = data_lake::build(&ctx).unwrap();

        build(&ctx, &network.handle, &common, &data_lake)
    }

    #[test]
    fn source_bucket_is_named_for_airflow() {
        let orchestration = orchestration(2).unwrap();
        assert_eq!(
            "airflow-develop-dags-123456789012",
            orchestration.source_bucket
        );
        assert!(orchestration
            .stack
            .resources_of(ResourceKind::Bucket)
            .all(has_baseline));
    }

    #[test]
    fn log_groups_follow_mwaa_naming() {
        let orchestration = orchestration(2).unwrap();
        let names: Vec<&str> = orchestration
            .stack
            .resources_of(ResourceKind::LogGroup)
            .map(|group| group.properties["LogGroupName"].as_str().unwrap())
            .collect();

        assert_eq!(5, names.len());
        assert!(names.contains(&"airflow-mwaa-develop-Task"));
        assert!(names.contains(&"airflow-mwaa-develop-DAGProcessing"));
    }

    #[test]
    fn environment_waits_for_its_prerequisites() {
        let orchestration = orchestration(2).unwrap();
        let environment = orchestration.stack.resource("MwaaDevelop").unwrap();

        assert_eq!("mwaa-develop", orchestration.environment_name);
        assert!(environment.depends_on.contains("IamDevelopDataLakeRawAirflowRole"));
        assert!(environment.depends_on.contains("AirflowDevelopDags"));
        assert!(environment.depends_on.contains("AirflowMwaaDevelopScheduler"));
        assert_eq!(json!("PUBLIC_ONLY"), environment.properties["WebserverAccessMode"]);
        assert_eq!(
            json!({ "Enabled": true, "LogLevel": "WARNING" }),
            environment.properties["LoggingConfiguration"]["DagProcessingLogs"]
        );
        assert_eq!(
            2,
            environment.properties["NetworkConfiguration"]["SubnetIds"]
                .as_array()
                .unwrap()
                .len()
        );

        let order = orchestration.stack.creation_order().unwrap();
        assert_eq!("MwaaDevelop", order.last().unwrap().id);
    }

    #[test]
    fn execution_role_is_trusted_by_airflow() {
        let orchestration = orchestration(2).unwrap();
        let role = orchestration
            .stack
            .resource("IamDevelopDataLakeRawAirflowRole")
            .unwrap();

        assert_eq!(
            json!(["airflow.amazonaws.com", "airflow-env.amazonaws.com"]),
            role.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"]
        );
        let dependencies = orchestration.stack.dependencies();
        assert!(dependencies.contains(&StackKind::Common));
        assert!(dependencies.contains(&StackKind::DataLake));
    }

    fn grants(role: &Role, action: &str, resource: &Value) -> bool {
        role.statements()
            .any(|statement| statement.allows(action) && statement.resource.contains(resource))
    }

    #[test]
    fn execution_role_reaches_data_zones_metrics_logs_and_queues() {
        let role = orchestration(2).unwrap().execution_role;

        for zone in ["bronze", "silver"] {
            let arn = json!({
                "Fn::ImportValue": format!("develop-data-lake-stack-{zone}-bucket-arn")
            });
            let objects = json!({ "Fn::Join": ["", [arn.clone(), "/*"]] });
            assert!(grants(&role, "s3:ListBucket", &arn));
            assert!(grants(&role, "s3:PutObject", &objects));
            assert!(grants(&role, "s3:GetObject", &objects));
            assert!(grants(&role, "s3:DeleteObject", &objects));
        }
        let gold = json!({ "Fn::ImportValue": "develop-data-lake-stack-gold-bucket-arn" });
        assert!(!grants(&role, "s3:ListBucket", &gold));

        assert!(grants(&role, "cloudwatch:PutMetricData", &json!("*")));
        assert!(grants(
            &role,
            "airflow:PublishMetrics",
            &json!({
                "Fn::Sub": "arn:${AWS::Partition}:airflow:${AWS::Region}:${AWS::AccountId}:environment/mwaa-develop"
            })
        ));
        assert!(grants(
            &role,
            "logs:PutLogEvents",
            &json!({ "Fn::GetAtt": ["AirflowMwaaDevelopTask", "Arn"] })
        ));

        let queues = json!({
            "Fn::Sub": "arn:${AWS::Partition}:sqs:${AWS::Region}:*:airflow-celery-*"
        });
        for action in ["sqs:SendMessage", "sqs:ReceiveMessage", "sqs:DeleteMessage"] {
            assert!(grants(&role, action, &queues));
        }
        assert!(!grants(&role, "sqs:PurgeQueue", &queues));
    }

    #[test]
    fn needs_two_private_subnets() {
        match orchestration(1) {
            Err(Error::NotEnoughSubnets {
                stack: StackKind::Orchestration,
                required: 2,
                found: 1,
                ..
            }) => {}
            other => panic!("Expected `NotEnoughSubnets` error, got {:?}", other.err()),
        }
    }
}
