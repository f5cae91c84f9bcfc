/// Schema for the DynamoDB tables behind the transfer pack lock.
///
/// NOTE: When you are choosing attribute names, avoid using DynamoDB Reserved Words unless you
/// have no other choice. Query ergonomics get bad otherwise. For example, instead of using "status"
/// as an attribute, use "request_status" since it is not a reserved word.
///
/// Here is the list of DynamoDB Reserved Words:
/// https://docs.aws.amazon.com/amazondynamodb/latest/developerguide/ReservedWords.html
///
/// Timestamps are stored as `N` attributes holding milliseconds since the unix epoch so that
/// condition expressions can compare them against "now".
use lazy_static::lazy_static;
use rusoto_dynamodb::{
    AttributeDefinition, CreateTableInput, KeySchemaElement, ProvisionedThroughput,
};

pub const LOCKS_TABLE: &str = "transfer_locks";
pub const REQUESTS_TABLE: &str = "transfer_lock_requests";
pub const AUDIT_TABLE: &str = "transfer_lock_audit";
pub const COUNTERS_TABLE: &str = "counters";
pub const USERS_TABLE: &str = "users";

lazy_static! {
    pub static ref TABLE_DEFINITIONS: Vec<CreateTableInput> = vec![
        CreateTableInput {
            /*
             * transfer_locks
             *
             *   resource_id: string, the transfer being packed
             *   holder_id: number, user id of the packer
             *   lease_id: string, ls_<id>, minted on every acquisition
             *   acquired_at: number, millis
             *   expires_at: number, millis
             *   last_heartbeat_at: number, millis
             *   client_tag: string, optional
             *
             * primary key:
             *
             *   [resource_id]
             */
            table_name: LOCKS_TABLE.to_string(),
            attribute_definitions: vec![attr_def("resource_id", "S")],
            key_schema: vec![key_schema_elem("resource_id", "HASH")],
            provisioned_throughput: default_provisioned_throughput(),
            ..Default::default()
        },
        CreateTableInput {
            /*
             * transfer_lock_requests
             *
             *   resource_id: string
             *   request_id: number, allocated from the "transfer_lock_requests" counter
             *   requester_id: number
             *   holder_id: number, holder at the time of the request
             *   requested_at: number, millis
             *   decision_deadline: number, millis
             *   request_status: string, pending | accepted | declined | expired | cancelled
             *   responded_at: number, millis, absent while pending
             *   client_tag: string, optional
             *
             * primary key:
             *
             *   [resource_id, request_id]
             */
            table_name: REQUESTS_TABLE.to_string(),
            attribute_definitions: vec![
                attr_def("resource_id", "S"),
                attr_def("request_id", "N"),
            ],
            key_schema: vec![
                key_schema_elem("resource_id", "HASH"),
                key_schema_elem("request_id", "RANGE"),
            ],
            provisioned_throughput: default_provisioned_throughput(),
            ..Default::default()
        },
        CreateTableInput {
            /*
             * transfer_lock_audit
             *
             *   resource_id: string
             *   event_key: string, <zero-padded created_at millis>#ae_<id>, sorts by time
             *   actor_id: number
             *   audit_action: string
             *   audit_status: string
             *   metadata_json: string
             *   created_at: number, millis
             *
             * primary key:
             *
             *   [resource_id, event_key]
             */
            table_name: AUDIT_TABLE.to_string(),
            attribute_definitions: vec![
                attr_def("resource_id", "S"),
                attr_def("event_key", "S"),
            ],
            key_schema: vec![
                key_schema_elem("resource_id", "HASH"),
                key_schema_elem("event_key", "RANGE"),
            ],
            provisioned_throughput: default_provisioned_throughput(),
            ..Default::default()
        },
        CreateTableInput {
            /*
             * counters
             *
             *   counter_name: string
             *   counter_value: number, incremented atomically with ADD
             *
             * primary key:
             *
             *   [counter_name]
             */
            table_name: COUNTERS_TABLE.to_string(),
            attribute_definitions: vec![attr_def("counter_name", "S")],
            key_schema: vec![key_schema_elem("counter_name", "HASH")],
            provisioned_throughput: default_provisioned_throughput(),
            ..Default::default()
        },
        CreateTableInput {
            /*
             * users
             *
             *   user_id: number
             *   display_name: string
             *
             * primary key:
             *
             *   [user_id]
             */
            table_name: USERS_TABLE.to_string(),
            attribute_definitions: vec![attr_def("user_id", "N")],
            key_schema: vec![key_schema_elem("user_id", "HASH")],
            provisioned_throughput: default_provisioned_throughput(),
            ..Default::default()
        },
    ];
}

fn attr_def(attribute_name: &str, attribute_type: &str) -> AttributeDefinition {
    AttributeDefinition {
        attribute_name: attribute_name.to_string(),
        attribute_type: attribute_type.to_string(),
    }
}

fn key_schema_elem(attribute_name: &str, key_type: &str) -> KeySchemaElement {
    KeySchemaElement {
        attribute_name: attribute_name.to_string(),
        key_type: key_type.to_string(),
    }
}

fn default_provisioned_throughput() -> Option<ProvisionedThroughput> {
    Some(ProvisionedThroughput {
        read_capacity_units: 100,
        write_capacity_units: 100,
    })
}
