use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{Context, Error};
use crate::bucket::BucketHandle;
use crate::resource::{Stack, StackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Bronze,
    Silver,
    Gold,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Bronze, Zone::Silver, Zone::Gold];

    pub fn as_str(&self) -> &'static str {
        return match self {
            Zone::Bronze => "bronze",
            Zone::Silver => "silver",
            Zone::Gold => "gold",
        };
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

#[derive(Debug, Clone)]
pub struct DataLakeStack {
    pub stack: Stack,
    buckets: BTreeMap<Zone, BucketHandle>,
}

impl DataLakeStack {
    pub fn bucket(&self, zone: Zone) -> Result<&BucketHandle, Error> {
        return self.buckets.get(&zone).ok_or(Error::MissingZone(zone));
    }

    pub fn buckets(&self) -> impl Iterator<Item = (Zone, &BucketHandle)> {
        return self.buckets.iter().map(|(zone, handle)| (*zone, handle));
    }
}

pub fn build(ctx: &Context) -> Result<DataLakeStack, Error> {
    let mut stack = ctx.stack(
        StackKind::DataLake,
        "Bronze, silver and gold storage zones of the data lake",
    );

    let mut buckets = BTreeMap::new();
    for zone in Zone::ALL {
        let handle = ctx.add_bucket(&mut stack, &ctx.config.bucket_prefix, zone.as_str())?;
        buckets.insert(zone, handle);
    }

    return Ok(DataLakeStack { stack, buckets });
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::bucket::has_baseline;
    use crate::environment::Environment;
    use crate::resource::ResourceKind;
    use crate::stacks::fixtures;

    #[test]
    fn staging_zone_buckets() {
        let config = fixtures::config();
        let data_lake = build(&Context::new(Environment::Staging, &config)).unwrap();

        let names: Vec<&str> = data_lake
            .buckets()
            .map(|(_, handle)| handle.physical_name.as_str())
            .collect();
        assert_eq!(
            vec![
                "datalake-staging-bronze-123456789012",
                "datalake-staging-silver-123456789012",
                "datalake-staging-gold-123456789012",
            ],
            names
        );

        let ids: Vec<&str> = data_lake
            .stack
            .resources()
            .iter()
            .map(|resource| resource.name.as_str())
            .collect();
        assert_eq!(
            vec![
                "datalake-staging-bronze",
                "datalake-staging-silver",
                "datalake-staging-gold"
            ],
            ids
        );
    }

    #[test]
    fn zones_are_isolated_and_baselined() {
        let config = fixtures::config();
        let data_lake = build(&Context::new(Environment::Develop, &config)).unwrap();

        let buckets: Vec<_> = data_lake.stack.resources_of(ResourceKind::Bucket).collect();
        assert_eq!(3, buckets.len());
        assert!(buckets.iter().all(|bucket| has_baseline(bucket)));

        let distinct: BTreeSet<&str> = data_lake
            .buckets()
            .map(|(_, handle)| handle.arn.name.as_str())
            .collect();
        assert_eq!(3, distinct.len());
        assert!(data_lake.bucket(Zone::Gold).is_ok());
    }
}
