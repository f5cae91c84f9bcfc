//! Display names for user ids. Owned by the surrounding application; we only read them.

use std::collections::HashMap;

use async_trait::async_trait;
use rusoto_dynamodb::{DynamoDb, DynamoDbClient, GetItemInput};

use dynamodb_schema::USERS_TABLE;

use crate::dynamodb::{av_get_s, av_map, av_n, prefixed_table_name};
use crate::store::UserId;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` when the user is unknown or the lookup failed. Names are decoration; a missing one
    /// never fails the caller.
    async fn display_name(&self, user_id: UserId) -> Option<String>;
}

/// Fixed set of names. Used with `--store memory` and in tests.
#[derive(Default)]
pub struct StaticUserDirectory {
    names: HashMap<UserId, String>,
}

impl StaticUserDirectory {
    pub fn new(names: HashMap<UserId, String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn display_name(&self, user_id: UserId) -> Option<String> {
        self.names.get(&user_id).cloned()
    }
}

pub struct DynamoUserDirectory {
    dynamodb_client: DynamoDbClient,
    table_prefix: String,
}

impl DynamoUserDirectory {
    pub fn new(dynamodb_client: DynamoDbClient, table_prefix: &str) -> Self {
        Self {
            dynamodb_client,
            table_prefix: table_prefix.to_string(),
        }
    }
}

#[async_trait]
impl UserDirectory for DynamoUserDirectory {
    async fn display_name(&self, user_id: UserId) -> Option<String> {
        let input = GetItemInput {
            table_name: prefixed_table_name(&self.table_prefix, USERS_TABLE),
            key: av_map(&[av_n("user_id", user_id)]),
            projection_expression: Some(String::from("display_name")),
            ..Default::default()
        };
        match self.dynamodb_client.get_item(input).await {
            Ok(output) => output
                .item
                .as_ref()
                .and_then(|item| av_get_s(item, "display_name"))
                .map(String::from),
            Err(e) => {
                log::warn!("Failed to look up display name of user {}: {}", user_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use maplit::hashmap;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let users = StaticUserDirectory::new(hashmap! {
            1 => "Alice Packer".to_string(),
        });
        assert_eq!(users.display_name(1).await.as_deref(), Some("Alice Packer"));
        assert_eq!(users.display_name(2).await, None);
    }
}
