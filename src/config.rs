use serde::{Deserialize, Serialize};
use std::{fs, io, net::Ipv4Addr, path::Path};
use validator::{Validate, ValidationError};

use crate::cdc::MigrationType;
use crate::schedule::ScheduleExpression;
use crate::stacks::compute::ComputeLayer;
use crate::table_mapping::RuleConfig;

pub const DEFAULT_PATH: &str = "./config.yaml";

const RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(custom = "validate_account")]
    pub account: String,

    pub region: Option<String>,

    #[serde(default = "default_project")]
    #[validate(length(min = 1, max = 20))]
    pub project: String,

    #[serde(default = "default_bucket_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub bucket_prefix: String,

    #[serde(default)]
    #[validate]
    pub network: NetworkConfig,

    #[serde(default)]
    pub common: CommonConfig,

    #[validate]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate]
    pub replication: ReplicationConfig,

    #[serde(default)]
    #[validate]
    pub catalog: CatalogConfig,

    #[serde(default)]
    #[validate]
    pub compute: ComputeConfig,

    #[serde(default)]
    #[validate]
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NetworkConfig {
    #[validate(custom = "validate_cidr")]
    pub cidr: String,

    #[validate(range(min = 2, max = 3))]
    pub availability_zones: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        return Self {
            cidr: String::from("10.0.0.0/16"),
            availability_zones: 2,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// `dms-vpc-role` is account-wide; only one environment per account may
    /// own it.
    pub create_dms_vpc_role: bool,
}

impl Default for CommonConfig {
    fn default() -> Self {
        return Self {
            create_dms_vpc_role: true,
        };
    }
}

/// No `password` key: unknown keys are rejected, the password only ever comes
/// from the secret named by `password_secret`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[validate(length(min = 1, max = 63))]
    pub name: String,

    #[validate(length(min = 1, max = 63))]
    pub username: String,

    #[validate(length(min = 1))]
    pub password_secret: String,

    #[serde(default = "default_db_instance_class")]
    pub instance_class: String,

    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    #[serde(default = "default_allocated_storage")]
    #[validate(range(min = 20, max = 65536))]
    pub allocated_storage: u32,

    #[serde(default = "default_public_access")]
    pub public_access: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReplicationConfig {
    pub instance_class: String,

    pub engine_version: String,

    #[validate(range(min = 5, max = 6144))]
    pub allocated_storage: u32,

    #[validate(length(min = 1))]
    pub bucket_folder: String,

    pub migration_type: MigrationType,

    #[validate(length(min = 1))]
    pub table_rules: Vec<RuleConfig>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        return Self {
            instance_class: String::from("dms.t2.small"),
            engine_version: String::from("3.4.4"),
            allocated_storage: 100,
            bucket_folder: String::from("ecommerce_rds"),
            migration_type: MigrationType::FullLoadAndCdc,
            table_rules: vec![RuleConfig::catch_all()],
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CatalogConfig {
    #[validate(length(min = 1))]
    pub table: String,

    #[validate(custom = "validate_schedule")]
    pub schedule: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        return Self {
            table: String::from("ecommerce_rds"),
            schedule: String::from("cron(0/15 * * * ? *)"),
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ComputeConfig {
    pub layer: ComputeLayer,

    pub release_label: String,

    pub instance_type: String,

    #[validate(range(min = 1, max = 20))]
    pub core_instances: u32,

    #[validate(length(min = 1))]
    pub spark_script: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        return Self {
            layer: ComputeLayer::BronzeSilver,
            release_label: String::from("emr-6.0.0"),
            instance_type: String::from("m5.xlarge"),
            core_instances: 2,
            spark_script: String::from("bronze_to_silver_processing.py"),
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_orchestration"))]
pub struct OrchestrationConfig {
    pub airflow_version: String,

    pub environment_class: String,

    #[validate(range(min = 1, max = 25))]
    pub min_workers: u32,

    #[validate(range(min = 1, max = 25))]
    pub max_workers: u32,

    pub log_retention_days: u32,

    pub log_level: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        return Self {
            airflow_version: String::from("1.10.12"),
            environment_class: String::from("mw1.small"),
            min_workers: 1,
            max_workers: 2,
            log_retention_days: 90,
            log_level: String::from("WARNING"),
        };
    }
}

fn default_project() -> String {
    return String::from("ecommerce");
}

fn default_bucket_prefix() -> String {
    return String::from("datalake");
}

fn default_db_instance_class() -> String {
    return String::from("db.t3.micro");
}

fn default_engine_version() -> String {
    return String::from("12.4");
}

fn default_allocated_storage() -> u32 {
    return 20;
}

fn default_public_access() -> bool {
    return true;
}

pub fn parse(path: &Path) -> Result<Config, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    return parse_str(&contents);
}

pub fn parse_str(contents: &str) -> Result<Config, Error> {
    let config: Config = match serde_yaml::from_str(contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match config.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    return Ok(config);
}

fn validate_account(account: &str) -> Result<(), ValidationError> {
    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new(
            "The account has to be a 12 digit AWS account id",
        ));
    }

    return Ok(());
}

fn validate_cidr(cidr: &str) -> Result<(), ValidationError> {
    let (address, prefix) = match cidr.split_once('/') {
        Some(parts) => parts,
        None => return Err(ValidationError::new("The CIDR needs a prefix length")),
    };
    if address.parse::<Ipv4Addr>().is_err() {
        return Err(ValidationError::new("The CIDR address is not IPv4"));
    }
    if prefix != "16" {
        return Err(ValidationError::new("The VPC CIDR has to be a /16"));
    }

    return Ok(());
}

fn validate_schedule(schedule: &str) -> Result<(), ValidationError> {
    return match schedule.parse::<ScheduleExpression>() {
        Ok(_) => Ok(()),
        Err(_) => Err(ValidationError::new(
            "The crawler schedule has to be a cron(...) or rate(...) expression",
        )),
    };
}

fn validate_orchestration(config: &OrchestrationConfig) -> Result<(), ValidationError> {
    if config.min_workers > config.max_workers {
        return Err(ValidationError::new(
            "min_workers cannot be greater than max_workers",
        ));
    }
    if !RETENTION_DAYS.contains(&config.log_retention_days) {
        return Err(ValidationError::new(
            "The log retention is not a value CloudWatch Logs accepts",
        ));
    }

    return Ok(());
}
