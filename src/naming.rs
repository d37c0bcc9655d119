//! Every physical name, logical id, export name and tag set in the platform is
//! derived here from plain values. Names never contain random parts, so the
//! same inputs always produce the same identifiers.

use serde::Serialize;

use crate::environment::Environment;
use crate::resource::StackKind;
use crate::stacks::data_lake::Zone;

pub const MAX_BUCKET_NAME: usize = 63;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Bucket name `{0}` must be 3 to 63 characters long")]
    BucketNameLength(String),

    #[error("Bucket name `{0}` may only hold lowercase letters, digits and hyphens")]
    BucketNameCharacters(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

pub fn stack_name(environment: Environment, kind: StackKind) -> String {
    return format!("{}-{}-stack", environment, kind.as_str());
}

/// `<service>-<environment>-<purpose>`, the shape used for every resource that
/// is not a bucket, catalog database or crawler.
pub fn scoped_name(service: &str, environment: Environment, purpose: &str) -> String {
    if purpose.is_empty() {
        return format!("{service}-{environment}");
    }
    return format!("{service}-{environment}-{purpose}");
}

pub fn bucket_base_name(prefix: &str, environment: Environment, purpose: &str) -> String {
    return format!("{prefix}-{environment}-{purpose}");
}

pub fn bucket_name(
    prefix: &str,
    environment: Environment,
    purpose: &str,
    account: &str,
) -> Result<String, Error> {
    let name = format!(
        "{}-{}",
        bucket_base_name(prefix, environment, purpose),
        account
    );

    if name.len() < 3 || name.len() > MAX_BUCKET_NAME {
        return Err(Error::BucketNameLength(name));
    }
    let valid_characters = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !name.starts_with('-') && !name.ends_with('-');
    if !valid_characters || !valid_edges || name.contains("--") {
        return Err(Error::BucketNameCharacters(name));
    }

    return Ok(name);
}

pub fn catalog_database_name(project: &str, environment: Environment, zone: Zone) -> String {
    return format!("glue-{project}-{environment}-data-lake-{zone}").replace('-', "_");
}

pub fn crawler_name(environment: Environment, zone: Zone, table: &str) -> String {
    return format!("glue-{environment}-{zone}-{table}-crawler");
}

pub fn export_name(stack_name: &str, key: &str) -> String {
    return format!("{stack_name}-{key}");
}

/// CloudFormation logical ids are alphanumeric; `rds-develop-sg` becomes
/// `RdsDevelopSg`.
pub fn logical_id(name: &str) -> String {
    return name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
}

pub fn tags(project: &str, environment: Environment, kind: StackKind) -> Vec<Tag> {
    return vec![
        Tag {
            key: String::from("Environment"),
            value: environment.to_string(),
        },
        Tag {
            key: String::from("Project"),
            value: project.to_string(),
        },
        Tag {
            key: String::from("Stack"),
            value: stack_name(environment, kind),
        },
    ];
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    const ACCOUNT: &str = "123456789012";

    #[test]
    fn zone_buckets_for_staging() {
        let names: Vec<String> = Zone::ALL
            .iter()
            .map(|zone| bucket_base_name("datalake", Environment::Staging, zone.as_str()))
            .collect();

        assert_eq!(
            vec![
                "datalake-staging-bronze",
                "datalake-staging-silver",
                "datalake-staging-gold"
            ],
            names
        );
        assert_eq!(
            Ok(String::from("datalake-staging-bronze-123456789012")),
            bucket_name("datalake", Environment::Staging, "bronze", ACCOUNT)
        );
    }

    #[test]
    fn names_are_injective_over_environment_and_purpose() {
        let purposes = ["bronze", "silver", "gold", "scripts", "logs", "airflow"];
        let mut seen = BTreeSet::new();

        for environment in Environment::ALL {
            for purpose in purposes {
                let name = bucket_name("datalake", environment, purpose, ACCOUNT).unwrap();
                assert!(seen.insert(name), "duplicate bucket name");
            }
            for zone in Zone::ALL {
                assert!(seen.insert(catalog_database_name("ecommerce", environment, zone)));
                assert!(seen.insert(crawler_name(environment, zone, "ecommerce_rds")));
            }
            for kind in StackKind::ALL {
                assert!(seen.insert(stack_name(environment, kind)));
            }
        }
    }

    #[test]
    fn naming_is_idempotent() {
        assert_eq!(
            bucket_name("datalake", Environment::Develop, "gold", ACCOUNT),
            bucket_name("datalake", Environment::Develop, "gold", ACCOUNT)
        );
        assert_eq!(
            crawler_name(Environment::Develop, Zone::Silver, "orders"),
            crawler_name(Environment::Develop, Zone::Silver, "orders")
        );
    }

    #[test]
    fn catalog_names_use_underscores() {
        assert_eq!(
            "glue_ecommerce_production_data_lake_silver",
            catalog_database_name("ecommerce", Environment::Production, Zone::Silver)
        );
        assert_eq!(
            "glue-develop-bronze-ecommerce_rds-crawler",
            crawler_name(Environment::Develop, Zone::Bronze, "ecommerce_rds")
        );
    }

    #[test]
    fn rejects_invalid_bucket_names() {
        match bucket_name("Data_Lake", Environment::Develop, "bronze", ACCOUNT) {
            Err(Error::BucketNameCharacters(_)) => {}
            _ => panic!("Expected `BucketNameCharacters` error"),
        }
        match bucket_name(&"x".repeat(50), Environment::Production, "bronze", ACCOUNT) {
            Err(Error::BucketNameLength(_)) => {}
            _ => panic!("Expected `BucketNameLength` error"),
        }
    }

    #[test]
    fn logical_ids_are_alphanumeric() {
        assert_eq!("RdsDevelopSg", logical_id("rds-develop-sg"));
        assert_eq!(
            "GlueDevelopBronzeEcommerceRdsCrawler",
            logical_id("glue-develop-bronze-ecommerce_rds-crawler")
        );
    }

    #[test]
    fn stack_names_and_tags() {
        assert_eq!(
            "staging-data-lake-stack",
            stack_name(Environment::Staging, StackKind::DataLake)
        );
        let tags = tags("ecommerce", Environment::Staging, StackKind::Catalog);
        assert_eq!(3, tags.len());
        assert_eq!("staging-glue-catalog-stack", tags[2].value);
    }
}
