//! Dependency-ordered provisioning model of the e-commerce data platform:
//! stack descriptors, their cross-stack wiring, and CloudFormation synthesis.

pub mod bucket;
pub mod cdc;
pub mod config;
pub mod environment;
pub mod graph;
pub mod iam;
pub mod naming;
pub mod outputs;
pub mod platform;
pub mod resource;
pub mod schedule;
pub mod stacks;
pub mod table_mapping;
pub mod template;
pub mod writer;
