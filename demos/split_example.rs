//! Example: Read/write splitting over Cloudflare D1
//!
//! Routes statements between a primary D1 database and a replica database
//! through the HTTP REST API, printing every routing decision.
//!
//! ## Prerequisites
//!
//! 1. Create two D1 databases in the Cloudflare dashboard
//! 2. Create an API token with D1 permissions
//! 3. Set the required environment variables:
//!    - `CF_ACCOUNT_ID`: Your Cloudflare account ID
//!    - `CF_DATABASE_ID`: The primary (writer) database ID
//!    - `CF_REPLICA_DATABASE_ID`: The replica (reader) database ID; the
//!      primary is reused when unset
//!    - `CF_API_TOKEN`: Your Cloudflare API token
//!
//! ## Running
//!
//! ```bash
//! cargo run --example split_example --features http
//! ```

use std::env;
use std::sync::Arc;

use diesel_splitdb::{
    Bindings, BoundValue, D1HttpConnector, EventSink, RoutingContext, RoutingEvent, Severity,
    SplitConfig, SplitConnectionBuilder,
};
use serde_json::json;

/// Prints routing events to stdout
struct PrintSink;

impl EventSink for PrintSink {
    fn emit(&self, severity: Severity, event: &RoutingEvent) {
        println!("[{}] {}", severity, event.message());
    }
}

#[tokio::main]
async fn main() {
    let account_id = env::var("CF_ACCOUNT_ID").expect("CF_ACCOUNT_ID must be set");
    let database_id = env::var("CF_DATABASE_ID").expect("CF_DATABASE_ID must be set");
    let api_token = env::var("CF_API_TOKEN").expect("CF_API_TOKEN must be set");

    let mut document = json!({
        "account_id": account_id,
        "database_id": database_id,
        "api_token": api_token,
        "enable_logging": true,
        "log_level": "info"
    });
    if let Ok(replica_id) = env::var("CF_REPLICA_DATABASE_ID") {
        document["slaves"] = json!([{ "database_id": replica_id }]);
    }

    let config = SplitConfig::from_value(document).expect("invalid split configuration");
    let mut conn = SplitConnectionBuilder::new(config)
        .sink(Arc::new(PrintSink))
        .establish(&D1HttpConnector::new())
        .await
        .expect("failed to open connections");

    // Batch context: schema setup goes to the writer
    let create_table_sql = r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL
        )
    "#;
    if let Err(e) = conn.execute(create_table_sql, &Bindings::None).await {
        eprintln!("Error creating table: {:?}", e);
    }

    // A storefront GET request
    conn.set_context(RoutingContext::request("GET", "/catalog/view"));

    let insert = Bindings::from(vec![
        BoundValue::from("John Doe"),
        BoundValue::from("john@example.com"),
    ]);
    match conn
        .execute("INSERT INTO users (name, email) VALUES (?, ?)", &insert)
        .await
    {
        Ok(output) => println!("Inserted, rowid {:?}", output.last_row_id()),
        Err(e) => eprintln!("Error inserting user: {:?}", e),
    }

    match conn.execute("SELECT * FROM users", &Bindings::None).await {
        Ok(output) => println!("Read {} rows from the reader", output.rows().len()),
        Err(e) => eprintln!("Error querying users: {:?}", e),
    }

    // Checkout pages always read from the writer
    let checkout = RoutingContext::request("GET", "/checkout/cart");
    match conn
        .execute_with(&checkout, "SELECT COUNT(*) AS n FROM users", &Bindings::None)
        .await
    {
        Ok(output) => println!("Checkout count: {:?}", output.rows().first()),
        Err(e) => eprintln!("Error counting users: {:?}", e),
    }

    println!("Example complete!");
}
