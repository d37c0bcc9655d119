use serde_json::json;
use std::net::Ipv4Addr;
use tracing::debug;

use super::{Context, Error};
use crate::resource::{Export, Resource, ResourceKind, ResourceRef, Stack, StackKind};

/// Third octet where private subnets start inside the VPC's /16.
const PRIVATE_OFFSET: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetKind {
    Public,
    Private,
}

impl SubnetKind {
    pub fn as_str(&self) -> &'static str {
        return match self {
            SubnetKind::Public => "public",
            SubnetKind::Private => "private",
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubnetHandle {
    pub kind: SubnetKind,
    pub cidr: String,
    pub id: Export,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkHandle {
    pub vpc_id: Export,
    pub cidr: String,
    pub public_subnets: Vec<SubnetHandle>,
    pub private_subnets: Vec<SubnetHandle>,
}

impl NetworkHandle {
    pub fn require(
        &self,
        kind: SubnetKind,
        required: usize,
        stack: StackKind,
    ) -> Result<&[SubnetHandle], Error> {
        let subnets = match kind {
            SubnetKind::Public => &self.public_subnets,
            SubnetKind::Private => &self.private_subnets,
        };
        if subnets.len() < required {
            return Err(Error::NotEnoughSubnets {
                stack,
                kind: kind.as_str(),
                required,
                found: subnets.len(),
            });
        }

        return Ok(subnets);
    }
}

#[derive(Debug, Clone)]
pub struct NetworkStack {
    pub stack: Stack,
    pub handle: NetworkHandle,
}

fn subnet_cidr(cidr: &str, third_octet: u8) -> Result<String, Error> {
    let address = cidr
        .split_once('/')
        .and_then(|(address, _)| address.parse::<Ipv4Addr>().ok())
        .ok_or_else(|| Error::InvalidCidr(cidr.to_string()))?;
    let [a, b, _, _] = address.octets();

    return Ok(format!("{a}.{b}.{third_octet}.0/24"));
}

/// One VPC, public and private subnets per availability zone, an internet
/// gateway for the public ones. No NAT gateways and no VPN gateway: anything
/// needing the internet is placed in a public subnet.
pub fn build(ctx: &Context) -> Result<NetworkStack, Error> {
    let config = &ctx.config.network;
    let mut stack = ctx.stack(StackKind::Network, "Virtual network shared by the data platform");

    let vpc = stack.add(
        Resource::new(ResourceKind::Vpc, &ctx.name("vpc", ""))
            .property("CidrBlock", json!(config.cidr))
            .property("EnableDnsHostnames", json!(true))
            .property("EnableDnsSupport", json!(true)),
    )?;

    let gateway = stack.add(Resource::new(
        ResourceKind::InternetGateway,
        &ctx.name("igw", ""),
    ))?;
    let attachment = stack.add(
        Resource::new(ResourceKind::VpcGatewayAttachment, &ctx.name("igw", "attachment"))
            .property("VpcId", vpc.reference())
            .property("InternetGatewayId", gateway.reference()),
    )?;

    let public_table = stack.add(
        Resource::new(ResourceKind::RouteTable, &ctx.name("rtb", "public"))
            .property("VpcId", vpc.reference()),
    )?;
    stack.add(
        Resource::new(ResourceKind::Route, &ctx.name("rtb", "public-default"))
            .property("RouteTableId", public_table.reference())
            .property("DestinationCidrBlock", json!("0.0.0.0/0"))
            .property("GatewayId", gateway.reference())
            .depends_on(&attachment),
    )?;
    let private_table = stack.add(
        Resource::new(ResourceKind::RouteTable, &ctx.name("rtb", "private"))
            .property("VpcId", vpc.reference()),
    )?;

    let mut public_subnets = Vec::new();
    let mut private_subnets = Vec::new();
    for zone in 0..config.availability_zones {
        for (kind, table) in [
            (SubnetKind::Public, &public_table),
            (SubnetKind::Private, &private_table),
        ] {
            let third_octet = match kind {
                SubnetKind::Public => zone,
                SubnetKind::Private => PRIVATE_OFFSET + zone,
            };
            let handle = add_subnet(ctx, &mut stack, &vpc, table, kind, zone, third_octet)?;
            match kind {
                SubnetKind::Public => public_subnets.push(handle),
                SubnetKind::Private => private_subnets.push(handle),
            }
        }
    }

    let vpc_id = stack.export("vpc-id", vpc.reference())?;
    debug!(
        stack = %stack.name,
        public = public_subnets.len(),
        private = private_subnets.len(),
        "network laid out"
    );

    return Ok(NetworkStack {
        stack,
        handle: NetworkHandle {
            vpc_id,
            cidr: config.cidr.clone(),
            public_subnets,
            private_subnets,
        },
    });
}

fn add_subnet(
    ctx: &Context,
    stack: &mut Stack,
    vpc: &ResourceRef,
    table: &ResourceRef,
    kind: SubnetKind,
    zone: u8,
    third_octet: u8,
) -> Result<SubnetHandle, Error> {
    let purpose = format!("{}-{}", kind.as_str(), zone + 1);
    let cidr = subnet_cidr(&ctx.config.network.cidr, third_octet)?;

    let subnet = stack.add(
        Resource::new(ResourceKind::Subnet, &ctx.name("subnet", &purpose))
            .property("VpcId", vpc.reference())
            .property("CidrBlock", json!(cidr))
            .property(
                "AvailabilityZone",
                json!({ "Fn::Select": [zone, { "Fn::GetAZs": "" }] }),
            )
            .property("MapPublicIpOnLaunch", json!(kind == SubnetKind::Public)),
    )?;
    stack.add(
        Resource::new(
            ResourceKind::SubnetRouteTableAssociation,
            &ctx.name("subnet", &format!("{purpose}-routes")),
        )
        .property("SubnetId", subnet.reference())
        .property("RouteTableId", table.reference()),
    )?;

    let id = stack.export(&format!("{purpose}-subnet-id"), subnet.reference())?;
    return Ok(SubnetHandle { kind, cidr, id });
}
