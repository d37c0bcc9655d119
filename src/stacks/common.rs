use tracing::info;

use super::network::NetworkHandle;
use super::{Context, Error};
use crate::bucket::BucketHandle;
use crate::iam::{Role, ServicePrincipal};
use crate::resource::{Export, Stack, StackKind};

/// DMS looks this role up by name when it manages network interfaces.
pub const DMS_VPC_ROLE_NAME: &str = "dms-vpc-role";

#[derive(Debug, Clone)]
pub struct CommonStack {
    pub stack: Stack,
    pub dms_vpc_role_arn: Option<Export>,
    pub scripts: BucketHandle,
    pub logs: BucketHandle,
}

pub fn build(ctx: &Context, network: &NetworkHandle) -> Result<CommonStack, Error> {
    let mut stack = ctx.stack(
        StackKind::Common,
        "Cross-cutting roles and shared buckets of the data platform",
    );
    stack.depends_on(network.vpc_id.stack)?;

    let dms_vpc_role_arn = if ctx.config.common.create_dms_vpc_role {
        let role = Role::new(
            &ctx.name("iam", "dms-vpc-role"),
            "Amazon DMS VPC Management Role",
            &[ServicePrincipal::Dms],
        )
        .fixed_name(DMS_VPC_ROLE_NAME)
        .managed_policy("service-role/AmazonDMSVPCManagementRole");
        let role = stack.add(role.to_resource())?;
        Some(stack.export("dms-vpc-role-arn", role.attribute("Arn"))?)
    } else {
        info!(environment = %ctx.environment, "dms-vpc-role is owned by another environment");
        None
    };

    let prefix = ctx.config.bucket_prefix.clone();
    let scripts = ctx.add_bucket(&mut stack, &prefix, "scripts")?;
    let logs = ctx.add_bucket(&mut stack, &prefix, "logs")?;

    return Ok(CommonStack {
        stack,
        dms_vpc_role_arn,
        scripts,
        logs,
    });
}
