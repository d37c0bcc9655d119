//! One builder per stack. Builders take the resolved environment and
//! configuration through [`Context`] and their upstream stacks' handles as
//! plain arguments; nothing is read from global state.

pub mod catalog;
pub mod common;
pub mod compute;
pub mod data_lake;
pub mod database;
pub mod network;
pub mod orchestration;
pub mod replication;

use crate::bucket::{self, BucketHandle};
use crate::config::Config;
use crate::environment::Environment;
use crate::naming;
use crate::resource::{self, DeletionPolicy, Stack, StackKind};
use crate::schedule;
use crate::table_mapping;

use data_lake::Zone;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Resource(#[from] resource::Error),

    #[error(transparent)]
    Naming(#[from] naming::Error),

    #[error("Table mapping error: {0}")]
    TableMapping(#[from] table_mapping::Error),

    #[error("Crawler schedule error: {0}")]
    Schedule(#[from] schedule::Error),

    #[error("Data lake has no bucket for zone {0}")]
    MissingZone(Zone),

    #[error("{stack} needs at least {required} {kind} subnets, the network has {found}")]
    NotEnoughSubnets {
        stack: StackKind,
        kind: &'static str,
        required: usize,
        found: usize,
    },

    #[error("Invalid CIDR block {0}")]
    InvalidCidr(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub environment: Environment,
    pub config: &'a Config,
}

impl<'a> Context<'a> {
    pub fn new(environment: Environment, config: &'a Config) -> Self {
        return Self {
            environment,
            config,
        };
    }

    pub fn stack(&self, kind: StackKind, description: &str) -> Stack {
        return Stack::new(kind, self.environment, &self.config.project, description);
    }

    pub fn name(&self, service: &str, purpose: &str) -> String {
        return naming::scoped_name(service, self.environment, purpose);
    }

    pub fn add_bucket(
        &self,
        stack: &mut Stack,
        prefix: &str,
        purpose: &str,
    ) -> Result<BucketHandle, Error> {
        let resource = bucket::bucket(prefix, self.environment, purpose, &self.config.account)?;
        let physical_name =
            naming::bucket_name(prefix, self.environment, purpose, &self.config.account)?;
        let cleaner_name = format!("{}-empty-on-delete", resource.name);
        let deletion_policy = resource.deletion_policy;
        let handle = stack.add(resource)?;

        if deletion_policy == Some(DeletionPolicy::Delete) {
            let cleaner = bucket::bucket_cleaner(stack, &self.config.account)?;
            stack.add(bucket::empty_on_delete(&cleaner_name, &handle, &cleaner))?;
        }

        let name = stack.export(&format!("{purpose}-bucket-name"), handle.reference())?;
        let arn = stack.export(&format!("{purpose}-bucket-arn"), handle.attribute("Arn"))?;

        return Ok(BucketHandle {
            purpose: purpose.to_string(),
            physical_name,
            resource: handle,
            name,
            arn,
        });
    }
}
