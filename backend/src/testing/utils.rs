use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use actix_session::{CookieSession, Session};
use actix_web::cookie::Cookie;
use actix_web::{post, test, web, App, HttpResponse};
use lazy_static::lazy_static;
use rusoto_dynamodb::{DeleteTableInput, DynamoDb, DynamoDbClient};

use crate::dynamodb::{create_dynamodb_client, prefixed_table_name};
use crate::http;
use crate::store::UserId;

const NUM_TEST_DYNAMODB_SHARDS: i32 = 8;

lazy_static! {
    static ref TEST_DYNAMODB_SHARDS: Arc<(Mutex<VecDeque<i32>>, Condvar)> = {
        let mut shards = VecDeque::new();
        for shard in 1..=NUM_TEST_DYNAMODB_SHARDS {
            shards.push_back(shard);
        }
        Arc::new((Mutex::new(shards), Condvar::new()))
    };
}

/// To keep concurrent tests from stepping on each other's rows, each test against DynamoDB Local
/// gets its own shard of freshly created tables. The tables are named with a per-shard prefix, eg.
/// "test3-transfer_locks".
///
/// Usage:
///
/// ```
/// #[tokio::test]
/// async fn test_my_feature() {
///     // Waits until a shard is free, then drops and recreates its tables.
///     let db = TestDynamoDb::new().await;
///     let store = DynamoStore::new(db.dynamodb_client.clone(), &db.table_prefix);
///     // ...
/// } // Shard is returned to the pool here.
/// ```
pub struct TestDynamoDb {
    pub dynamodb_shard: i32,
    pub dynamodb_client: DynamoDbClient,
    pub table_prefix: String,
}

impl TestDynamoDb {
    pub async fn new() -> Self {
        let dynamodb_shard = {
            let (shards_mutex, cond_var) = &**TEST_DYNAMODB_SHARDS;
            let mut shards = shards_mutex.lock().unwrap();
            while shards.is_empty() {
                shards = cond_var.wait(shards).unwrap();
            }
            shards.pop_front().unwrap()
        };

        let dynamodb_client =
            create_dynamodb_client("testing", Some("http://localhost:8000")).unwrap();
        let table_prefix = format!("test{}", dynamodb_shard);
        delete_test_tables(&table_prefix, &dynamodb_client).await;
        create_test_tables(&table_prefix, &dynamodb_client).await;

        TestDynamoDb {
            dynamodb_shard,
            dynamodb_client,
            table_prefix,
        }
    }
}

impl Drop for TestDynamoDb {
    fn drop(&mut self) {
        let (shards_mutex, cond_var) = &**TEST_DYNAMODB_SHARDS;
        {
            let mut shards = shards_mutex.lock().unwrap();
            shards.push_back(self.dynamodb_shard);
        }
        cond_var.notify_one();
    }
}

async fn create_test_tables(table_prefix: &str, dynamodb_client: &dyn DynamoDb) {
    for table_def in dynamodb_schema::TABLE_DEFINITIONS.iter() {
        // DynamoDB Local sometimes fails table creation spuriously. Retry a few times.
        let mut success = false;
        for _ in 1..=5 {
            let mut table_def = table_def.clone();
            table_def.table_name = prefixed_table_name(table_prefix, &table_def.table_name);
            if dynamodb_client.create_table(table_def).await.is_ok() {
                success = true;
                break;
            }
            tokio::time::delay_for(std::time::Duration::from_millis(10)).await;
        }
        assert!(success);
    }
}

async fn delete_test_tables(table_prefix: &str, dynamodb_client: &dyn DynamoDb) {
    for table_def in dynamodb_schema::TABLE_DEFINITIONS.iter() {
        let _result = dynamodb_client
            .delete_table(DeleteTableInput {
                table_name: prefixed_table_name(table_prefix, &table_def.table_name),
            })
            .await;
    }
}

pub const TEST_COOKIE_SECRET: [u8; 32] = [0; 32];

pub fn default_cookie_session() -> CookieSession {
    http::create_cookie_session(&TEST_COOKIE_SECRET, false)
}

/// Stands in for the login flow of the surrounding application.
#[post("/test/log_in/{user_id}")]
async fn test_log_in(
    session: Session,
    user_id: web::Path<UserId>,
) -> actix_web::Result<HttpResponse> {
    session.set("user_id", user_id.into_inner())?;
    Ok(HttpResponse::Ok().finish())
}

/// Encrypted session cookie for `user_id`, accepted by any app wrapped in
/// `default_cookie_session()`.
pub async fn session_cookie(user_id: UserId) -> Cookie<'static> {
    let mut test_app =
        test::init_service(App::new().wrap(default_cookie_session()).service(test_log_in)).await;
    let request = test::TestRequest::post()
        .uri(&format!("/test/log_in/{}", user_id))
        .to_request();
    let response = test::call_service(&mut test_app, request).await;
    assert!(response.status().is_success());
    let cookie = response
        .response()
        .cookies()
        .find(|c| c.name() == "session")
        .unwrap();
    cookie.into_owned()
}

#[allow(dead_code)]
pub fn set_log_level(level: log::LevelFilter) {
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .unwrap();
}
