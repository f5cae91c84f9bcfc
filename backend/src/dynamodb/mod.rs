use std::collections::HashMap;
use std::str::FromStr;

use rusoto_core::Region;
use rusoto_dynamodb::{AttributeValue, DynamoDbClient};

/// DynamoDB table names have a prefix per environment, eg. "staging-transfer_locks" or
/// "production-transfer_locks". Tests use a prefix per test shard, like "test4-".
pub fn prefixed_table_name(table_prefix: &str, base_table_name: &str) -> String {
    format!("{}-{}", table_prefix, base_table_name)
}

/// Create a client for the given AWS region name, or for a custom endpoint such as DynamoDB Local
/// when `endpoint` is given.
pub fn create_dynamodb_client(
    region_name: &str,
    endpoint: Option<&str>,
) -> anyhow::Result<DynamoDbClient> {
    let region = match endpoint {
        Some(endpoint) => Region::Custom {
            name: region_name.to_string(),
            endpoint: endpoint.to_string(),
        },
        None => Region::from_str(region_name)?,
    };
    // NOTE: Create the HTTP client explicitly so that a new one is made per tokio executor. See
    // details: https://github.com/hyperium/hyper/issues/2112
    let request_dispatcher = rusoto_core::request::HttpClient::new()?;
    let credentials_provider = rusoto_credential::DefaultCredentialsProvider::new()?;
    Ok(DynamoDbClient::new_with(
        request_dispatcher,
        credentials_provider,
        region,
    ))
}

/// Shorthand to create `AttributeValue` entry with string type `S`.
pub fn av_s(key: &str, value: &str) -> (String, AttributeValue) {
    (
        key.to_string(),
        AttributeValue {
            s: Some(value.to_string()),
            ..Default::default()
        },
    )
}

/// Shorthand to create `AttributeValue` entry with number type `N`.
pub fn av_n<T: ToString>(key: &str, number: T) -> (String, AttributeValue) {
    (
        key.to_string(),
        AttributeValue {
            n: Some(number.to_string()),
            ..Default::default()
        },
    )
}

/// Shorthand. Turn an array of `AttributeValue` entries into a hash map.
///
/// eg.
/// ```
/// let input = GetItemInput {
///     key: av_map(&[
///         av_s("resource_id", "T1"),
///     ])
/// }
/// ```
pub fn av_map(arr: &[(String, AttributeValue)]) -> HashMap<String, AttributeValue> {
    arr.iter().cloned().collect()
}

/// Shorthand. Retrieve the `S` string value for a given key in a Dynamo item.
pub fn av_get_s<'a>(item: &'a HashMap<String, AttributeValue>, key: &str) -> Option<&'a str> {
    Some(item.get(key)?.s.as_ref()?.as_str())
}

/// Shorthand. Retrieve the `N` value for a given key in a Dynamo item, and parse it.
pub fn av_get_n<T: FromStr>(item: &HashMap<String, AttributeValue>, key: &str) -> Option<T> {
    item.get(key)?.n.as_ref()?.parse::<T>().ok()
}
