//! `LockStore` backed by DynamoDB.
//!
//! We use DynamoDB conditional expressions to make every mutation atomic. If the conditional
//! expression check fails, we know that someone else changed the row first, and we report the
//! refusal to the caller instead of retrying blindly.
//!
//! Timestamps are stored as milliseconds since the unix epoch so that the condition expressions can
//! compare them against "now". Staleness is evaluated by the store with the caller's cutoff, which
//! means every backend instance must agree on the time to within the heartbeat grace.

use std::collections::HashMap;
use std::convert::TryFrom;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusoto_core::RusotoError;
use rusoto_dynamodb::{
    AttributeValue, DeleteItemError, DeleteItemInput, DynamoDb, DynamoDbClient, GetItemInput,
    PutItemError, PutItemInput, QueryInput, ScanInput, UpdateItemError, UpdateItemInput,
};

use dynamodb_schema::{AUDIT_TABLE, COUNTERS_TABLE, LOCKS_TABLE, REQUESTS_TABLE};

use super::{
    AuditAction, AuditEvent, ClaimOutcome, DeadlineGuard, Lease, LeaseRenewal, LockStore,
    OpenedRequest, RequestDraft, RequestStatus, ResourceId, StaleCutoff, StoreError,
    TakeoverRequest, UserId,
};
use crate::dynamodb::{av_get_n, av_get_s, av_map, av_n, av_s, prefixed_table_name};
use crate::ids::{Id, IdType};
use crate::utils::time::{from_millis, to_millis};

type Item = HashMap<String, AttributeValue>;

const LIVE_LEASE_CONDITION: &str = "expires_at >= :now AND last_heartbeat_at >= :heartbeat_since";
const STALE_LEASE_CONDITION: &str = "expires_at < :now OR last_heartbeat_at < :heartbeat_since";

pub struct DynamoStore {
    dynamodb_client: DynamoDbClient,
    table_prefix: String,
}

impl DynamoStore {
    pub fn new(dynamodb_client: DynamoDbClient, table_prefix: &str) -> Self {
        Self {
            dynamodb_client,
            table_prefix: table_prefix.to_string(),
        }
    }

    fn table(&self, base_table_name: &str) -> String {
        prefixed_table_name(&self.table_prefix, base_table_name)
    }

    async fn query_all(&self, mut input: QueryInput) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        loop {
            let output = self.dynamodb_client.query(input.clone()).await?;
            items.extend(output.items.unwrap_or_default());
            match output.last_evaluated_key {
                Some(key) => input.exclusive_start_key = Some(key),
                None => return Ok(items),
            }
        }
    }

    async fn scan_all(&self, mut input: ScanInput) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        loop {
            let output = self.dynamodb_client.scan(input.clone()).await?;
            items.extend(output.items.unwrap_or_default());
            match output.last_evaluated_key {
                Some(key) => input.exclusive_start_key = Some(key),
                None => return Ok(items),
            }
        }
    }

    /// Conditionally put a lease row. Shared by `claim_lease` and `transfer_lease`.
    async fn put_lease_if(
        &self,
        lease: &Lease,
        condition: &str,
        values: Vec<(String, AttributeValue)>,
    ) -> Result<ClaimOutcome, StoreError> {
        let input = PutItemInput {
            table_name: self.table(LOCKS_TABLE),
            item: lease_to_item(lease),
            condition_expression: Some(condition.to_string()),
            expression_attribute_values: Some(av_map(&values)),
            return_values: Some("ALL_OLD".to_string()),
            ..Default::default()
        };
        match self.dynamodb_client.put_item(input).await {
            Ok(output) => {
                let replaced = match output.attributes {
                    Some(item) if !item.is_empty() => Some(lease_from_item(&item)?),
                    _ => None,
                };
                Ok(ClaimOutcome::Claimed { replaced })
            }
            Err(RusotoError::Service(PutItemError::ConditionalCheckFailed(_))) => {
                Ok(ClaimOutcome::Refused)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn next_request_id(&self) -> Result<u64, StoreError> {
        let input = UpdateItemInput {
            table_name: self.table(COUNTERS_TABLE),
            key: av_map(&[av_s("counter_name", REQUESTS_TABLE)]),
            update_expression: Some(String::from("ADD counter_value :one")),
            expression_attribute_values: Some(av_map(&[av_n(":one", 1)])),
            return_values: Some("UPDATED_NEW".to_string()),
            ..Default::default()
        };
        let output = self.dynamodb_client.update_item(input).await?;
        output
            .attributes
            .as_ref()
            .and_then(|item| av_get_n::<u64>(item, "counter_value"))
            .ok_or(StoreError::MalformedItem {
                table: COUNTERS_TABLE,
                field: "counter_value",
            })
    }
}

fn cutoff_values(cutoff: &StaleCutoff) -> Vec<(String, AttributeValue)> {
    vec![
        av_n(":now", to_millis(&cutoff.now)),
        av_n(":heartbeat_since", to_millis(&cutoff.heartbeat_since)),
    ]
}

#[async_trait]
impl LockStore for DynamoStore {
    async fn get_lease(&self, resource_id: &ResourceId) -> Result<Option<Lease>, StoreError> {
        let input = GetItemInput {
            table_name: self.table(LOCKS_TABLE),
            key: av_map(&[av_s("resource_id", resource_id.as_str())]),
            consistent_read: Some(true),
            ..Default::default()
        };
        let output = self.dynamodb_client.get_item(input).await?;
        match output.item {
            Some(item) => Ok(Some(lease_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn list_leases(&self) -> Result<Vec<Lease>, StoreError> {
        let input = ScanInput {
            table_name: self.table(LOCKS_TABLE),
            consistent_read: Some(true),
            ..Default::default()
        };
        self.scan_all(input)
            .await?
            .iter()
            .map(lease_from_item)
            .collect()
    }

    async fn renew_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: UserId,
        renewal: &LeaseRenewal,
        cutoff: &StaleCutoff,
    ) -> Result<Option<Lease>, StoreError> {
        let mut update_expression =
            String::from("SET expires_at = :expires_at, last_heartbeat_at = :heartbeat_at");
        let mut values = vec![
            av_n(":expires_at", to_millis(&renewal.expires_at)),
            av_n(":heartbeat_at", to_millis(&renewal.heartbeat_at)),
            av_n(":holder_id", holder_id),
        ];
        values.extend(cutoff_values(cutoff));
        if let Some(client_tag) = renewal.client_tag.as_ref() {
            update_expression.push_str(", client_tag = :client_tag");
            values.push(av_s(":client_tag", client_tag));
        }
        let input = UpdateItemInput {
            table_name: self.table(LOCKS_TABLE),
            key: av_map(&[av_s("resource_id", resource_id.as_str())]),
            update_expression: Some(update_expression),
            condition_expression: Some(format!(
                "holder_id = :holder_id AND {}",
                LIVE_LEASE_CONDITION
            )),
            expression_attribute_values: Some(av_map(&values)),
            return_values: Some("ALL_NEW".to_string()),
            ..Default::default()
        };
        match self.dynamodb_client.update_item(input).await {
            Ok(output) => match output.attributes {
                Some(item) => Ok(Some(lease_from_item(&item)?)),
                None => Err(StoreError::MalformedItem {
                    table: LOCKS_TABLE,
                    field: "attributes",
                }),
            },
            Err(RusotoError::Service(UpdateItemError::ConditionalCheckFailed(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_lease(
        &self,
        lease: &Lease,
        cutoff: &StaleCutoff,
    ) -> Result<ClaimOutcome, StoreError> {
        let condition = format!(
            "attribute_not_exists(resource_id) OR {}",
            STALE_LEASE_CONDITION
        );
        self.put_lease_if(lease, &condition, cutoff_values(cutoff))
            .await
    }

    async fn transfer_lease(
        &self,
        lease: &Lease,
        from_holder: UserId,
        cutoff: &StaleCutoff,
    ) -> Result<ClaimOutcome, StoreError> {
        let condition = format!(
            "attribute_not_exists(resource_id) OR holder_id = :from_holder \
            OR holder_id = :to_holder OR {}",
            STALE_LEASE_CONDITION
        );
        let mut values = cutoff_values(cutoff);
        values.push(av_n(":from_holder", from_holder));
        values.push(av_n(":to_holder", lease.holder_id));
        self.put_lease_if(lease, &condition, values).await
    }

    async fn delete_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: Option<UserId>,
    ) -> Result<Option<Lease>, StoreError> {
        let (condition_expression, expression_attribute_values) = match holder_id {
            Some(holder_id) => (
                Some(String::from("holder_id = :holder_id")),
                Some(av_map(&[av_n(":holder_id", holder_id)])),
            ),
            None => (None, None),
        };
        let input = DeleteItemInput {
            table_name: self.table(LOCKS_TABLE),
            key: av_map(&[av_s("resource_id", resource_id.as_str())]),
            condition_expression,
            expression_attribute_values,
            return_values: Some("ALL_OLD".to_string()),
            ..Default::default()
        };
        match self.dynamodb_client.delete_item(input).await {
            Ok(output) => match output.attributes {
                Some(item) if !item.is_empty() => Ok(Some(lease_from_item(&item)?)),
                _ => Ok(None),
            },
            Err(RusotoError::Service(DeleteItemError::ConditionalCheckFailed(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_stale_lease(
        &self,
        resource_id: &ResourceId,
        cutoff: &StaleCutoff,
    ) -> Result<Option<Lease>, StoreError> {
        let input = DeleteItemInput {
            table_name: self.table(LOCKS_TABLE),
            key: av_map(&[av_s("resource_id", resource_id.as_str())]),
            condition_expression: Some(STALE_LEASE_CONDITION.to_string()),
            expression_attribute_values: Some(av_map(&cutoff_values(cutoff))),
            return_values: Some("ALL_OLD".to_string()),
            ..Default::default()
        };
        match self.dynamodb_client.delete_item(input).await {
            Ok(output) => match output.attributes {
                Some(item) if !item.is_empty() => Ok(Some(lease_from_item(&item)?)),
                _ => Ok(None),
            },
            Err(RusotoError::Service(DeleteItemError::ConditionalCheckFailed(_))) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_request(
        &self,
        draft: &RequestDraft,
        replay_since: DateTime<Utc>,
    ) -> Result<OpenedRequest, StoreError> {
        // Look for a recent pending request from the same requester first. Two concurrent first
        // requests from one requester can both miss here and both insert; the later row then
        // becomes the one acted upon and the earlier one is cancelled when it settles.
        let input = QueryInput {
            table_name: self.table(REQUESTS_TABLE),
            consistent_read: Some(true),
            scan_index_forward: Some(false),
            key_condition_expression: Some(String::from("resource_id = :resource_id")),
            filter_expression: Some(String::from(
                "request_status = :pending AND requester_id = :requester_id \
                AND requested_at >= :replay_since AND decision_deadline > :now",
            )),
            expression_attribute_values: Some(av_map(&[
                av_s(":resource_id", draft.resource_id.as_str()),
                av_s(":pending", RequestStatus::Pending.as_str()),
                av_n(":requester_id", draft.requester_id),
                av_n(":replay_since", to_millis(&replay_since)),
                av_n(":now", to_millis(&draft.requested_at)),
            ])),
            ..Default::default()
        };
        if let Some(item) = self.query_all(input).await?.first() {
            return Ok(OpenedRequest {
                request: request_from_item(item)?,
                replayed: true,
            });
        }

        let request = TakeoverRequest {
            id: self.next_request_id().await?,
            resource_id: draft.resource_id.clone(),
            requester_id: draft.requester_id,
            holder_id: draft.holder_id,
            requested_at: draft.requested_at,
            decision_deadline: draft.decision_deadline,
            status: RequestStatus::Pending,
            responded_at: None,
            client_tag: draft.client_tag.clone(),
        };
        let input = PutItemInput {
            table_name: self.table(REQUESTS_TABLE),
            item: request_to_item(&request),
            condition_expression: Some(String::from("attribute_not_exists(request_id)")),
            ..Default::default()
        };
        self.dynamodb_client.put_item(input).await?;
        Ok(OpenedRequest {
            request,
            replayed: false,
        })
    }

    async fn get_request(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
    ) -> Result<Option<TakeoverRequest>, StoreError> {
        let input = GetItemInput {
            table_name: self.table(REQUESTS_TABLE),
            key: av_map(&[
                av_s("resource_id", resource_id.as_str()),
                av_n("request_id", request_id),
            ]),
            consistent_read: Some(true),
            ..Default::default()
        };
        let output = self.dynamodb_client.get_item(input).await?;
        match output.item {
            Some(item) => Ok(Some(request_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn latest_request(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<TakeoverRequest>, StoreError> {
        let input = QueryInput {
            table_name: self.table(REQUESTS_TABLE),
            consistent_read: Some(true),
            scan_index_forward: Some(false),
            limit: Some(1),
            key_condition_expression: Some(String::from("resource_id = :resource_id")),
            expression_attribute_values: Some(av_map(&[av_s(
                ":resource_id",
                resource_id.as_str(),
            )])),
            ..Default::default()
        };
        let output = self.dynamodb_client.query(input).await?;
        match output.items.unwrap_or_default().first() {
            Some(item) => Ok(Some(request_from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn pending_requests(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<TakeoverRequest>, StoreError> {
        let input = QueryInput {
            table_name: self.table(REQUESTS_TABLE),
            consistent_read: Some(true),
            scan_index_forward: Some(true),
            key_condition_expression: Some(String::from("resource_id = :resource_id")),
            filter_expression: Some(String::from("request_status = :pending")),
            expression_attribute_values: Some(av_map(&[
                av_s(":resource_id", resource_id.as_str()),
                av_s(":pending", RequestStatus::Pending.as_str()),
            ])),
            ..Default::default()
        };
        self.query_all(input)
            .await?
            .iter()
            .map(request_from_item)
            .collect()
    }

    async fn finish_request(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
        status: RequestStatus,
        responded_at: DateTime<Utc>,
        guard: DeadlineGuard,
    ) -> Result<bool, StoreError> {
        let mut condition = String::from("request_status = :pending");
        let mut values = vec![
            av_s(":pending", RequestStatus::Pending.as_str()),
            av_s(":status", status.as_str()),
            av_n(":responded_at", to_millis(&responded_at)),
        ];
        match guard {
            DeadlineGuard::Open { at } => {
                condition.push_str(" AND decision_deadline >= :at");
                values.push(av_n(":at", to_millis(&at)));
            }
            DeadlineGuard::Passed { at } => {
                condition.push_str(" AND decision_deadline < :at");
                values.push(av_n(":at", to_millis(&at)));
            }
            DeadlineGuard::Any => {}
        }
        let input = UpdateItemInput {
            table_name: self.table(REQUESTS_TABLE),
            key: av_map(&[
                av_s("resource_id", resource_id.as_str()),
                av_n("request_id", request_id),
            ]),
            update_expression: Some(String::from(
                "SET request_status = :status, responded_at = :responded_at",
            )),
            condition_expression: Some(condition),
            expression_attribute_values: Some(av_map(&values)),
            ..Default::default()
        };
        match self.dynamodb_client.update_item(input).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(UpdateItemError::ConditionalCheckFailed(_))) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn overdue_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TakeoverRequest>, StoreError> {
        let input = ScanInput {
            table_name: self.table(REQUESTS_TABLE),
            consistent_read: Some(true),
            filter_expression: Some(String::from(
                "request_status = :pending AND decision_deadline < :now",
            )),
            expression_attribute_values: Some(av_map(&[
                av_s(":pending", RequestStatus::Pending.as_str()),
                av_n(":now", to_millis(&now)),
            ])),
            ..Default::default()
        };
        let mut overdue = self
            .scan_all(input)
            .await?
            .iter()
            .map(request_from_item)
            .collect::<Result<Vec<_>, _>>()?;
        overdue.sort_by_key(|r| r.id);
        Ok(overdue)
    }

    async fn prune_requests(&self, responded_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let input = ScanInput {
            table_name: self.table(REQUESTS_TABLE),
            projection_expression: Some(String::from("resource_id, request_id")),
            filter_expression: Some(String::from(
                "request_status <> :pending AND responded_at < :before",
            )),
            expression_attribute_values: Some(av_map(&[
                av_s(":pending", RequestStatus::Pending.as_str()),
                av_n(":before", to_millis(&responded_before)),
            ])),
            ..Default::default()
        };
        let mut pruned = 0;
        for item in self.scan_all(input).await? {
            let input = DeleteItemInput {
                table_name: self.table(REQUESTS_TABLE),
                key: item,
                condition_expression: Some(String::from("request_status <> :pending")),
                expression_attribute_values: Some(av_map(&[av_s(
                    ":pending",
                    RequestStatus::Pending.as_str(),
                )])),
                ..Default::default()
            };
            match self.dynamodb_client.delete_item(input).await {
                Ok(_) => pruned += 1,
                Err(RusotoError::Service(DeleteItemError::ConditionalCheckFailed(_))) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(pruned)
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let input = PutItemInput {
            table_name: self.table(AUDIT_TABLE),
            item: audit_event_to_item(event),
            condition_expression: Some(String::from("attribute_not_exists(event_key)")),
            ..Default::default()
        };
        self.dynamodb_client.put_item(input).await?;
        Ok(())
    }

    async fn audit_history(
        &self,
        resource_id: &ResourceId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let input = QueryInput {
            table_name: self.table(AUDIT_TABLE),
            scan_index_forward: Some(false),
            limit: Some(limit as i64),
            key_condition_expression: Some(String::from("resource_id = :resource_id")),
            expression_attribute_values: Some(av_map(&[av_s(
                ":resource_id",
                resource_id.as_str(),
            )])),
            ..Default::default()
        };
        let output = self.dynamodb_client.query(input).await?;
        output
            .items
            .unwrap_or_default()
            .iter()
            .map(audit_event_from_item)
            .collect()
    }
}

fn lease_to_item(lease: &Lease) -> Item {
    let mut item = av_map(&[
        av_s("resource_id", lease.resource_id.as_str()),
        av_n("holder_id", lease.holder_id),
        av_s("lease_id", &lease.lease_id),
        av_n("acquired_at", to_millis(&lease.acquired_at)),
        av_n("expires_at", to_millis(&lease.expires_at)),
        av_n("last_heartbeat_at", to_millis(&lease.last_heartbeat_at)),
    ]);
    if let Some(client_tag) = lease.client_tag.as_ref() {
        let (key, value) = av_s("client_tag", client_tag);
        item.insert(key, value);
    }
    item
}

fn request_to_item(request: &TakeoverRequest) -> Item {
    let mut item = av_map(&[
        av_s("resource_id", request.resource_id.as_str()),
        av_n("request_id", request.id),
        av_n("requester_id", request.requester_id),
        av_n("holder_id", request.holder_id),
        av_n("requested_at", to_millis(&request.requested_at)),
        av_n("decision_deadline", to_millis(&request.decision_deadline)),
        av_s("request_status", request.status.as_str()),
    ]);
    if let Some(responded_at) = request.responded_at.as_ref() {
        let (key, value) = av_n("responded_at", to_millis(responded_at));
        item.insert(key, value);
    }
    if let Some(client_tag) = request.client_tag.as_ref() {
        let (key, value) = av_s("client_tag", client_tag);
        item.insert(key, value);
    }
    item
}

fn required_s<'a>(
    item: &'a Item,
    table: &'static str,
    field: &'static str,
) -> Result<&'a str, StoreError> {
    av_get_s(item, field).ok_or(StoreError::MalformedItem { table, field })
}

fn required_millis(
    item: &Item,
    table: &'static str,
    field: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    av_get_n::<i64>(item, field)
        .map(from_millis)
        .ok_or(StoreError::MalformedItem { table, field })
}

fn resource_id_from_item(item: &Item, table: &'static str) -> Result<ResourceId, StoreError> {
    ResourceId::parse(required_s(item, table, "resource_id")?).ok_or(StoreError::MalformedItem {
        table,
        field: "resource_id",
    })
}

fn lease_from_item(item: &Item) -> Result<Lease, StoreError> {
    let table = LOCKS_TABLE;
    Ok(Lease {
        resource_id: resource_id_from_item(item, table)?,
        holder_id: av_get_n(item, "holder_id").ok_or(StoreError::MalformedItem {
            table,
            field: "holder_id",
        })?,
        lease_id: required_s(item, table, "lease_id")?.to_string(),
        acquired_at: required_millis(item, table, "acquired_at")?,
        expires_at: required_millis(item, table, "expires_at")?,
        last_heartbeat_at: required_millis(item, table, "last_heartbeat_at")?,
        client_tag: av_get_s(item, "client_tag").map(String::from),
    })
}

fn request_from_item(item: &Item) -> Result<TakeoverRequest, StoreError> {
    let table = REQUESTS_TABLE;
    let status = required_s(item, table, "request_status")?;
    Ok(TakeoverRequest {
        id: av_get_n(item, "request_id").ok_or(StoreError::MalformedItem {
            table,
            field: "request_id",
        })?,
        resource_id: resource_id_from_item(item, table)?,
        requester_id: av_get_n(item, "requester_id").ok_or(StoreError::MalformedItem {
            table,
            field: "requester_id",
        })?,
        holder_id: av_get_n(item, "holder_id").ok_or(StoreError::MalformedItem {
            table,
            field: "holder_id",
        })?,
        requested_at: required_millis(item, table, "requested_at")?,
        decision_deadline: required_millis(item, table, "decision_deadline")?,
        status: RequestStatus::try_from(status).map_err(|_| StoreError::MalformedItem {
            table,
            field: "request_status",
        })?,
        responded_at: av_get_n::<i64>(item, "responded_at").map(from_millis),
        client_tag: av_get_s(item, "client_tag").map(String::from),
    })
}

fn audit_event_to_item(event: &AuditEvent) -> Item {
    let created_at = to_millis(&event.created_at);
    // Zero-padded so that the range key sorts chronologically.
    let event_key = format!("{:013}#{}", created_at, Id::new(IdType::AuditEvent).as_str());
    av_map(&[
        av_s("resource_id", event.resource_id.as_str()),
        av_s("event_key", &event_key),
        av_n("actor_id", event.actor_id),
        av_s("audit_action", event.action.as_str()),
        av_s("audit_status", &event.status),
        av_s("metadata_json", &event.metadata.to_string()),
        av_n("created_at", created_at),
    ])
}

fn audit_event_from_item(item: &Item) -> Result<AuditEvent, StoreError> {
    let table = AUDIT_TABLE;
    let action = required_s(item, table, "audit_action")?;
    let metadata = required_s(item, table, "metadata_json")?;
    let event_key = required_s(item, table, "event_key")?;
    let event_id = event_key
        .split('#')
        .nth(1)
        .and_then(Id::parse)
        .filter(|id| id.id_type == IdType::AuditEvent);
    if event_id.is_none() {
        return Err(StoreError::MalformedItem {
            table,
            field: "event_key",
        });
    }
    Ok(AuditEvent {
        resource_id: resource_id_from_item(item, table)?,
        actor_id: av_get_n(item, "actor_id").ok_or(StoreError::MalformedItem {
            table,
            field: "actor_id",
        })?,
        action: AuditAction::try_from(action).map_err(|_| StoreError::MalformedItem {
            table,
            field: "audit_action",
        })?,
        status: required_s(item, table, "audit_status")?.to_string(),
        metadata: serde_json::from_str(metadata).map_err(|_| StoreError::MalformedItem {
            table,
            field: "metadata_json",
        })?,
        created_at: required_millis(item, table, "created_at")?,
    })
}
