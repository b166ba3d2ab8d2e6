use mockito::{Matcher, Server};
use resilience::{ErrorKind, InMemoryErrorStore, OperationContext, RetryConfig, RetryExecutor};
use salesforce::{LoadMode, RecordLoader, SObjectType, SalesforceClient};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn setup(server: &Server) -> (SalesforceClient, RetryExecutor, Arc<InMemoryErrorStore>) {
    let client = SalesforceClient::new(server.url(), "token", "58.0").unwrap();
    let store = Arc::new(InMemoryErrorStore::new());
    let executor = RetryExecutor::new(RetryConfig::fast(), store.clone());
    (client, executor, store)
}

fn ctx() -> OperationContext {
    OperationContext::new("project-9", "contacts", "load")
}

#[tokio::test]
async fn test_load_partitions_and_records_failures() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/services/data/v58.0/composite/sobjects")
        .with_status(200)
        .with_body(
            json!([
                {"id": "003A", "success": true, "errors": []},
                {"success": false, "errors": [{
                    "statusCode": "DUPLICATE_VALUE",
                    "message": "duplicate value found: Email",
                    "fields": ["Email"]
                }]}
            ])
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let (client, executor, store) = setup(&server);
    let sources = vec![
        json!({"id": "c-1", "lastName": "Ada"}),
        json!({"id": "c-2", "firstName": "No last name"}),
        json!({"id": "c-3", "lastName": "Grace", "email": "GRACE@example.com"}),
    ];

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let summary = RecordLoader::new(&client, &executor)
        .with_progress(move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        })
        .load(SObjectType::Contact, &ctx(), &sources)
        .await;

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.error_ids.len(), 2);
    assert_eq!(handled.load(Ordering::SeqCst), 3);

    let errors = store.errors();
    let invalid = errors.iter().find(|e| e.error_type == "validation").unwrap();
    assert_eq!(invalid.record_id.as_deref(), Some("c-2"));
    assert!(invalid.error_message.contains("LastName"));

    let rejected = errors.iter().find(|e| e.kind() == ErrorKind::Duplicate).unwrap();
    assert_eq!(rejected.record_id.as_deref(), Some("c-3"));
    assert_eq!(rejected.error_details["operation"], "create_contact");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_load_batch_failure_is_recorded_once() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/services/data/v58.0/composite/sobjects")
        .with_status(403)
        .with_body(r#"[{"message":"insufficient access rights on object","errorCode":"INSUFFICIENT_ACCESS_OR_READONLY"}]"#)
        .expect(1)
        .create_async()
        .await;

    let (client, executor, store) = setup(&server);
    let sources = vec![json!({"name": "Acme"}), json!({"name": "Globex"})];

    let summary = RecordLoader::new(&client, &executor)
        .load(SObjectType::Account, &ctx(), &sources)
        .await;

    assert_eq!(summary.created, 0);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.error_ids.len(), 1);
    assert!(!summary.is_clean());

    let errors = store.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "permission");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_load_retries_transient_failures() {
    let mut server = Server::new_async().await;
    let unavailable = server
        .mock("POST", "/services/data/v58.0/composite/sobjects")
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(1)
        .create_async()
        .await;

    let (client, executor, store) = setup(&server);
    let sources = vec![json!({"name": "Deal", "closeDate": "2024-06-30", "stage": "won"})];

    // the 503 mock is consumed first; register the success afterwards
    let ok = server
        .mock("POST", "/services/data/v58.0/composite/sobjects")
        .match_body(Matcher::Regex(r#""StageName":"Closed Won""#.into()))
        .with_status(200)
        .with_body(r#"[{"id":"006A","success":true,"errors":[]}]"#)
        .create_async()
        .await;

    let summary = RecordLoader::new(&client, &executor)
        .load(SObjectType::Opportunity, &ctx(), &sources)
        .await;

    assert_eq!(summary.created, 1);
    assert!(summary.is_clean());
    assert_eq!(store.recoveries().len(), 1);
    unavailable.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_upsert_mode() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PATCH", "/services/data/v58.0/composite/sobjects/Contact/Legacy_Id__c")
        .with_status(200)
        .with_body(
            r#"[{"id":"003A","success":true,"created":true,"errors":[]},
                {"id":"003B","success":true,"created":false,"errors":[]}]"#,
        )
        .create_async()
        .await;

    let (client, executor, _store) = setup(&server);
    let sources = vec![
        json!({"lastName": "Doe", "customFields": {"Legacy Id": "L-1"}}),
        json!({"lastName": "Roe", "customFields": {"Legacy Id": "L-2"}}),
    ];

    let summary = RecordLoader::new(&client, &executor)
        .with_mode(LoadMode::Upsert {
            external_id_field: "Legacy_Id__c".into(),
        })
        .load(SObjectType::Contact, &ctx(), &sources)
        .await;

    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 1);
    assert!(summary.is_clean());
    mock.assert_async().await;
}
