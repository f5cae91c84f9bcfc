use rusoto_dynamodb::{DeleteTableInput, DynamoDb, DynamoDbClient};

use dynamodb_schema::TABLE_DEFINITIONS;

fn print_usage() {
    println!();
    println!("Usage: dynamodb_schema <command> [table_prefix]");
    println!();
    println!("Valid values for <command>:");
    println!("\tcreate_local_tables");
    println!("\tdelete_local_tables");
    println!("\treset_local_tables");
    println!();
    println!("[table_prefix] defaults to \"local\" and must match the backend's --dynamodb_env.");
}

fn local_table_name(table_prefix: &str, table_name: &str) -> String {
    format!("{}-{}", table_prefix, table_name)
}

fn create_dynamodb_client() -> anyhow::Result<DynamoDbClient> {
    let request_dispatcher = rusoto_core::request::HttpClient::new()?;
    let credentials_provider = rusoto_credential::DefaultCredentialsProvider::new()?;
    let region = rusoto_core::Region::Custom {
        name: "local".to_string(),
        endpoint: "http://127.0.0.1:8000".to_string(),
    };
    Ok(DynamoDbClient::new_with(
        request_dispatcher,
        credentials_provider,
        region,
    ))
}

async fn create_local_tables(dynamodb_client: &DynamoDbClient, table_prefix: &str) {
    println!("Creating local tables...");
    for table_def in TABLE_DEFINITIONS.iter() {
        let table_name = local_table_name(table_prefix, &table_def.table_name);
        let mut table_def = table_def.clone();
        table_def.table_name = table_name.clone();
        println!("Creating table {}...", &table_def.table_name);
        let result = dynamodb_client.create_table(table_def).await;
        if let Err(e) = result {
            eprintln!("\tFailed to create table {}. Error: {}", &table_name, e);
        }
    }
    println!("Done creating local tables.");
}

async fn delete_local_tables(dynamodb_client: &DynamoDbClient, table_prefix: &str) {
    println!("Deleting local tables...");
    for table_def in TABLE_DEFINITIONS.iter() {
        let table_name = local_table_name(table_prefix, &table_def.table_name);
        println!("Deleting table {}...", &table_name);
        let result = dynamodb_client
            .delete_table(DeleteTableInput {
                table_name: table_name.clone(),
            })
            .await;
        if let Err(e) = result {
            eprintln!("\tFailed to delete table {}. Error: {}", &table_name, e);
        }
    }
    println!("Done deleting local tables.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        print_usage();
        std::process::exit(1);
    }
    let table_prefix = args.get(2).map(String::as_str).unwrap_or("local");
    let dynamodb_client = create_dynamodb_client()?;
    match &args[1][..] {
        "create_local_tables" => {
            create_local_tables(&dynamodb_client, table_prefix).await;
        }
        "delete_local_tables" => {
            delete_local_tables(&dynamodb_client, table_prefix).await;
        }
        "reset_local_tables" => {
            delete_local_tables(&dynamodb_client, table_prefix).await;
            create_local_tables(&dynamodb_client, table_prefix).await;
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }
    Ok(())
}
