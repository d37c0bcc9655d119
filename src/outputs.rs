use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_cloudformation::types::Output;
use aws_types::region::Region;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack {0} not found")]
    NotFoundError(String),
}

pub type StackOutputs = BTreeMap<String, String>;

/// Loads the SDK configuration; without an explicit region the default
/// provider chain decides.
pub async fn sdk_config(region: Option<&str>) -> SdkConfig {
    let region = RegionProviderChain::first_try(region.map(|name| Region::new(name.to_string())))
        .or_default_provider();

    return aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await;
}

pub struct Stack {
    pub stack_name: String,

    client: aws_sdk_cloudformation::Client,
}

impl Stack {
    pub fn new(stack_name: &str, sdk_config: &SdkConfig) -> Self {
        let client = aws_sdk_cloudformation::Client::new(sdk_config);

        return Self {
            stack_name: stack_name.to_string(),
            client,
        };
    }

    pub async fn get_outputs(&self) -> Result<Vec<Output>, Error> {
        let result = self
            .client
            .describe_stacks()
            .stack_name(&self.stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(err) => {
                return match err.as_service_error() {
                    Some(service_err)
                        if service_err
                            .message()
                            .map_or(false, |message| message.contains("does not exist")) =>
                    {
                        Err(Error::NotFoundError(self.stack_name.clone()))
                    }
                    Some(service_err) => Err(Error::ServiceError(
                        DisplayErrorContext(service_err).to_string(),
                    )),
                    None => Err(Error::UnknownError(DisplayErrorContext(&err).to_string())),
                };
            }
        };

        let stack = match result.stacks().first() {
            Some(stack) => stack,
            None => return Err(Error::NotFoundError(self.stack_name.clone())),
        };

        let outputs = stack.outputs().to_vec();
        debug!(stack = %self.stack_name, outputs = outputs.len(), "outputs fetched");
        return Ok(outputs);
    }
}

pub fn collect(outputs: &[Output]) -> StackOutputs {
    return outputs
        .iter()
        .fold(StackOutputs::new(), |mut acc, output| {
            if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
                acc.insert(key.to_string(), value.to_string());
            }
            acc
        });
}

/// Fetches the outputs of every named stack concurrently; one failure fails
/// the whole fetch.
pub async fn fetch_all(
    sdk_config: &SdkConfig,
    stack_names: &[String],
) -> Result<BTreeMap<String, StackOutputs>, Error> {
    let stacks: Vec<Stack> = stack_names
        .iter()
        .map(|name| Stack::new(name, sdk_config))
        .collect();

    let fetched = try_join_all(stacks.iter().map(|stack| async move {
        let outputs = stack.get_outputs().await?;
        Ok::<_, Error>((stack.stack_name.clone(), collect(&outputs)))
    }))
    .await?;

    info!(stacks = fetched.len(), "stack outputs fetched");
    return Ok(fetched.into_iter().collect());
}
