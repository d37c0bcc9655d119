use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::data_lake::{DataLakeStack, Zone};
use super::{Context, Error};
use crate::bucket::s3_uri;
use crate::iam::{self, PolicyStatement, Role, ServicePrincipal};
use crate::naming;
use crate::resource::{Resource, ResourceKind, Stack, StackKind};
use crate::schedule::ScheduleExpression;

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneCatalog {
    pub database_name: String,
    pub crawler_name: String,
}

#[derive(Debug, Clone)]
pub struct CatalogStack {
    pub stack: Stack,
    pub schedule: ScheduleExpression,
    pub zones: BTreeMap<Zone, ZoneCatalog>,
}

pub fn build(ctx: &Context, data_lake: &DataLakeStack) -> Result<CatalogStack, Error> {
    let config = &ctx.config.catalog;
    let schedule: ScheduleExpression = config.schedule.parse()?;
    let mut stack = ctx.stack(
        StackKind::Catalog,
        "Schema catalog over the data lake zones",
    );

    let mut bucket_names = BTreeMap::new();
    let mut bucket_resources = Vec::new();
    for (zone, bucket) in data_lake.buckets() {
        bucket_names.insert(zone, stack.import(&bucket.name)?);
        bucket_resources.extend(iam::bucket_and_objects(&stack.import(&bucket.arn)?));
    }

    let role = Role::new(
        &ctx.name("iam", "glue-data-lake-role"),
        "Allows using Glue on Data Lake",
        &[ServicePrincipal::Glue],
    )
    .inline_policy(
        &ctx.name("iam", "glue-data-lake-policy"),
        vec![
            PolicyStatement::allow(
                &["s3:ListBucket", "s3:GetObject", "s3:PutObject"],
                bucket_resources,
            ),
            PolicyStatement::allow(
                &["cloudwatch:PutMetricData"],
                vec![json!("arn:aws:cloudwatch:*")],
            ),
            PolicyStatement::allow(&["glue:*"], vec![json!("arn:aws:glue:*")]),
            PolicyStatement::allow(
                &[
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                ],
                vec![json!("arn:aws:logs:*:*:/aws-glue/*")],
            ),
        ],
    );
    let role = stack.add(role.to_resource())?;
    stack.add(iam::instance_profile(
        &ctx.name("iam", "glue-data-lake-instance-profile"),
        &role,
    ))?;

    let table_path = format!("/{}", config.table);
    let mut zones = BTreeMap::new();
    for (zone, bucket_name) in bucket_names {
        let database_name =
            naming::catalog_database_name(&ctx.config.project, ctx.environment, zone);
        let database = stack.add(
            Resource::new(ResourceKind::GlueDatabase, &database_name)
                .property("CatalogId", json!({ "Ref": "AWS::AccountId" }))
                .property(
                    "DatabaseInput",
                    json!({
                        "Name": database_name,
                        "LocationUri": s3_uri(&bucket_name, ""),
                    }),
                ),
        )?;

        let crawler_name = naming::crawler_name(ctx.environment, zone, &config.table);
        stack.add(
            Resource::new(ResourceKind::GlueCrawler, &crawler_name)
                .property("Name", json!(crawler_name))
                .property(
                    "Description",
                    json!(format!(
                        "Crawler that detects the schema located at Data Lake {}.{}",
                        zone, config.table
                    )),
                )
                .property("Role", role.attribute("Arn"))
                .property("DatabaseName", json!(database_name))
                .property(
                    "Schedule",
                    json!({ "ScheduleExpression": schedule.to_string() }),
                )
                .property(
                    "Targets",
                    json!({ "S3Targets": [{ "Path": s3_uri(&bucket_name, &table_path) }] }),
                )
                .depends_on(&database)
                .depends_on(&role),
        )?;

        stack.output(
            &format!("{zone}-catalog-database"),
            json!(database_name),
            &format!("Catalog database of the {zone} zone"),
        );
        zones.insert(
            zone,
            ZoneCatalog {
                database_name,
                crawler_name,
            },
        );
    }

    debug!(
        stack = %stack.name,
        schedule = %schedule.describe(),
        "catalog crawlers scheduled"
    );

    return Ok(CatalogStack {
        stack,
        schedule,
        zones,
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::environment::Environment;
    use crate::stacks::{data_lake, fixtures};

    fn catalog(environment: Environment) -> CatalogStack {
        let config = fixtures::config();
        let ctx = Context::new(environment, &config);
        let data_lake = data_lake::build(&ctx).unwrap();
        build(&ctx, &data_lake).unwrap()
    }

    #[test]
    fn names_are_derived_from_environment_and_zone() {
        let catalog = catalog(Environment::Staging);

        let bronze = &catalog.zones[&Zone::Bronze];
        assert_eq!("glue_ecommerce_staging_data_lake_bronze", bronze.database_name);
        assert_eq!("glue-staging-bronze-ecommerce_rds-crawler", bronze.crawler_name);
        assert_eq!(3, catalog.zones.len());
        assert_eq!(
            "every 15 minutes, every hour, every day",
            catalog.schedule.describe()
        );
    }

    #[test]
    fn crawlers_wait_for_database_and_role() {
        let catalog = catalog(Environment::Develop);

        let crawlers: Vec<_> = catalog
            .stack
            .resources_of(ResourceKind::GlueCrawler)
            .collect();
        assert_eq!(3, crawlers.len());
        for crawler in crawlers {
            assert!(crawler.depends_on.contains("IamDevelopGlueDataLakeRole"));
            assert_eq!(2, crawler.depends_on.len());
            assert_eq!(
                json!("cron(0/15 * * * ? *)"),
                crawler.properties["Schedule"]["ScheduleExpression"]
            );
        }

        let order = catalog.stack.creation_order().unwrap();
        let position = |id: &str| order.iter().position(|r| r.id == id).unwrap();
        assert!(
            position("GlueEcommerceDevelopDataLakeGold")
                < position("GlueDevelopGoldEcommerceRdsCrawler")
        );
    }

    #[test]
    fn crawler_targets_the_table_path() {
        let catalog = catalog(Environment::Develop);
        let crawler = catalog
            .stack
            .resource("GlueDevelopSilverEcommerceRdsCrawler")
            .unwrap();

        assert_eq!(
            json!({ "Fn::Join": ["", [
                "s3://",
                { "Fn::ImportValue": "develop-data-lake-stack-silver-bucket-name" },
                "/ecommerce_rds"
            ]] }),
            crawler.properties["Targets"]["S3Targets"][0]["Path"]
        );
        assert!(catalog.stack.dependencies().contains(&StackKind::DataLake));
    }

    #[test]
    fn role_reaches_all_zones_and_the_catalog() {
        let catalog = catalog(Environment::Develop);
        let role = catalog
            .stack
            .resource("IamDevelopGlueDataLakeRole")
            .unwrap();
        let statements = &role.properties["Policies"][0]["PolicyDocument"]["Statement"];

        assert_eq!(6, statements[0]["Resource"].as_array().unwrap().len());
        assert_eq!(json!(["glue:*"]), statements[2]["Action"]);
    }

    #[test]
    fn rejects_an_unparseable_schedule() {
        let mut config = fixtures::config();
        config.catalog.schedule = String::from("every quarter hour");
        let ctx = Context::new(Environment::Develop, &config);
        let data_lake = data_lake::build(&ctx).unwrap();

        match build(&ctx, &data_lake) {
            Err(Error::Schedule(_)) => {}
            _ => panic!("Expected `Schedule` error"),
        }
    }
}
