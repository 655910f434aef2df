//! 变更流测试

use futures::FutureExt;
use rat_docbridge::*;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn setup() -> (Client<MemoryDriver>, MemoryClient) {
    rat_docbridge::init();
    let memory = MemoryClient::new();
    (Client::new(memory.clone()), memory)
}

fn quick_options() -> Option<ChangeStreamOptions> {
    Some(ChangeStreamOptions {
        max_await_time: Some(Duration::from_millis(20)),
        ..Default::default()
    })
}

fn operation(change: &Document) -> &str {
    change.get_str("operationType").unwrap()
}

#[tokio::test]
async fn test_stream_is_lazy_until_first_poll() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("orders");
    memory.reset_counters();

    let mut stream = collection.watch(quick_options());
    assert!(stream.alive());
    assert!(stream.resume_token().is_none());
    assert_eq!(memory.round_trips(), 0);

    assert_eq!(assert_ok!(stream.try_next().await), None);
    assert_eq!(memory.command_count("aggregate"), 1);
    assert_eq!(memory.command_count("getMore"), 1);
    assert_ok!(stream.close().await);
}

#[tokio::test]
async fn test_collection_stream_sees_writes() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    let mut stream = collection.watch(quick_options());
    assert_ok!(stream.connect().await);
    assert_ok!(stream.connect().await);

    assert_ok!(collection.insert_one(doc! { "_id": 1, "qty": 5 }, None).await);
    assert_ok!(
        collection
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "qty": 6 } }, None, None)
            .await
    );
    assert_ok!(client.database("shop").collection("other").insert_one(doc! { "x": 1 }, None).await);
    assert_ok!(collection.delete_one(doc! { "_id": 1 }, None).await);

    let insert = assert_ok!(stream.next().await).unwrap();
    assert_eq!(operation(&insert), "insert");
    assert_eq!(insert.get_document("fullDocument").unwrap().get_i32("qty").unwrap(), 5);

    let update = assert_ok!(stream.next().await).unwrap();
    assert_eq!(operation(&update), "update");
    let description = update.get_document("updateDescription").unwrap();
    assert_eq!(description.get_document("updatedFields").unwrap().get_i32("qty").unwrap(), 6);

    let delete = assert_ok!(stream.next().await).unwrap();
    assert_eq!(operation(&delete), "delete");
    assert_eq!(delete.get_document("documentKey").unwrap().get_i32("_id").unwrap(), 1);

    assert_eq!(stream.resume_token(), Some(delete.get_document("_id").unwrap()));
    assert_ok!(stream.close().await);
}

#[tokio::test]
async fn test_update_lookup_and_pipeline() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    let mut stream = collection.watch(Some(ChangeStreamOptions {
        pipeline: vec![doc! { "$match": { "operationType": "update" } }],
        full_document: Some(FullDocument::UpdateLookup),
        max_await_time: Some(Duration::from_millis(20)),
        ..Default::default()
    }));
    assert_ok!(stream.connect().await);

    assert_ok!(collection.insert_one(doc! { "_id": "a", "status": "new" }, None).await);
    assert_ok!(
        collection
            .update_one(doc! { "_id": "a" }, doc! { "$set": { "status": "paid" } }, None, None)
            .await
    );

    let change = assert_ok!(stream.next().await).unwrap();
    assert_eq!(operation(&change), "update");
    assert_eq!(change.get_document("fullDocument").unwrap().get_str("status").unwrap(), "paid");
    assert_ok!(stream.close().await);
}

#[tokio::test]
async fn test_drop_invalidates_stream() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    assert_ok!(collection.insert_one(doc! { "n": 1 }, None).await);

    let mut stream = collection.watch(quick_options());
    assert_ok!(stream.connect().await);
    assert_ok!(collection.drop(None).await);

    assert_eq!(operation(&assert_ok!(stream.next().await).unwrap()), "drop");
    assert_eq!(operation(&assert_ok!(stream.next().await).unwrap()), "invalidate");
    assert!(!stream.alive());
    assert_eq!(assert_ok!(stream.next().await), None);

    // invalidate 令牌只能用于 start_after
    let token = stream.resume_token().cloned().unwrap();
    let mut resumed = collection.watch(Some(ChangeStreamOptions {
        resume_after: Some(token.clone()),
        ..Default::default()
    }));
    let err = assert_err!(resumed.connect().await);
    assert_eq!(err.code(), Some(260));

    let mut started = collection.watch(Some(ChangeStreamOptions {
        start_after: Some(token),
        max_await_time: Some(Duration::from_millis(20)),
        ..Default::default()
    }));
    assert_ok!(started.connect().await);
    assert_ok!(collection.insert_one(doc! { "n": 2 }, None).await);
    assert_eq!(operation(&assert_ok!(started.next().await).unwrap()), "insert");
    assert_ok!(started.close().await);
}

#[tokio::test]
async fn test_resume_after_token() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    let mut stream = collection.watch(quick_options());
    assert_ok!(stream.connect().await);

    assert_ok!(collection.insert_one(doc! { "n": 1 }, None).await);
    assert_ok!(collection.insert_one(doc! { "n": 2 }, None).await);
    let first = assert_ok!(stream.next().await).unwrap();
    assert_ok!(stream.close().await);

    let token = first.get_document("_id").unwrap().clone();
    let mut resumed = collection.watch(Some(ChangeStreamOptions {
        resume_after: Some(token),
        max_await_time: Some(Duration::from_millis(20)),
        ..Default::default()
    }));
    let second = assert_ok!(resumed.next().await).unwrap();
    assert_eq!(second.get_document("fullDocument").unwrap().get_i32("n").unwrap(), 2);
    assert_ok!(resumed.close().await);
}

#[tokio::test]
async fn test_transaction_events_published_on_commit() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    let mut stream = client.database("shop").watch(quick_options());
    assert_ok!(stream.connect().await);

    let session = assert_ok!(client.start_session(None).await);
    assert_ok!(session.begin_transaction(None).await);
    assert_ok!(collection.insert_one(doc! { "n": 1 }, Some(&session)).await);
    assert_eq!(assert_ok!(stream.try_next().await), None);

    assert_ok!(session.commit_transaction().await);
    assert_eq!(operation(&assert_ok!(stream.next().await).unwrap()), "insert");
    assert_ok!(session.end_session().await);
    assert_ok!(stream.close().await);
}

#[tokio::test]
async fn test_scoped_stream_closes_after_body() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("orders");
    let writer = collection.clone();

    let stream = client.watch(quick_options());
    let change = stream
        .scoped(move |s| {
            async move {
                writer.insert_one(doc! { "n": 1 }, None).await?;
                s.next().await
            }
            .boxed()
        })
        .await;
    let change = assert_ok!(change).unwrap();
    assert_eq!(operation(&change), "insert");
    assert_eq!(memory.command_count("killCursors"), 1);

    let failing = client.watch(quick_options());
    let result: DocBridgeResult<()> = failing
        .scoped(|_| async { Err(rat_docbridge::quick_error!(invalid_operation, "stop")) }.boxed())
        .await;
    assert!(matches!(assert_err!(result), DocBridgeError::InvalidOperation { .. }));
    assert_eq!(memory.command_count("killCursors"), 2);
}

#[tokio::test]
async fn test_closed_stream_rejects_polling() {
    let (client, _) = setup();
    let mut stream = client.database("shop").collection("orders").watch(quick_options());
    assert_ok!(stream.connect().await);
    assert_ok!(stream.close().await);
    assert_ok!(stream.close().await);
    assert!(!stream.alive());

    let err = assert_err!(stream.try_next().await);
    assert!(matches!(err, DocBridgeError::CursorClosed));
}

#[tokio::test]
async fn test_abandoned_poll_keeps_event() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    let mut stream = collection.watch(Some(ChangeStreamOptions {
        max_await_time: Some(Duration::from_millis(400)),
        ..Default::default()
    }));
    assert_ok!(stream.connect().await);

    // getMore 还在服务器端等待时放弃
    let abandoned = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(abandoned.is_err());

    assert_ok!(collection.insert_one(doc! { "n": 1 }, None).await);
    let change = assert_ok!(stream.next().await).unwrap();
    assert_eq!(operation(&change), "insert");
    assert_eq!(change.get_document("fullDocument").unwrap().get_i32("n").unwrap(), 1);
    assert_ok!(stream.close().await);
}

#[tokio::test]
async fn test_start_at_operation_time_replays_events() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    let session = assert_ok!(client.start_session(None).await);

    assert_ok!(collection.insert_one(doc! { "n": 0 }, None).await);
    assert_ok!(collection.insert_one(doc! { "n": 1 }, Some(&session)).await);
    let start = session.operation_time().unwrap();
    assert_ok!(collection.insert_one(doc! { "n": 2 }, None).await);

    let mut stream = collection.watch(Some(ChangeStreamOptions {
        start_at_operation_time: Some(start),
        max_await_time: Some(Duration::from_millis(20)),
        ..Default::default()
    }));
    let first = assert_ok!(stream.next().await).unwrap();
    assert_eq!(first.get_document("fullDocument").unwrap().get_i32("n").unwrap(), 1);
    assert_eq!(first.get_timestamp("clusterTime").unwrap(), start);
    let second = assert_ok!(stream.next().await).unwrap();
    assert_eq!(second.get_document("fullDocument").unwrap().get_i32("n").unwrap(), 2);
    assert_ok!(stream.close().await);
}

#[tokio::test]
async fn test_rename_invalidates_stream() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("orders");
    assert_ok!(collection.insert_one(doc! { "n": 1 }, None).await);

    let mut stream = collection.watch(quick_options());
    let mut database_stream = client.database("shop").watch(quick_options());
    assert_ok!(stream.connect().await);
    assert_ok!(database_stream.connect().await);
    assert_ok!(collection.rename("archived", false, None).await);

    let rename = assert_ok!(stream.next().await).unwrap();
    assert_eq!(operation(&rename), "rename");
    assert_eq!(rename.get_document("to").unwrap(), &doc! { "db": "shop", "coll": "archived" });
    assert!(rename.get_timestamp("clusterTime").is_ok());
    assert_eq!(operation(&assert_ok!(stream.next().await).unwrap()), "invalidate");
    assert!(!stream.alive());

    // 数据库级变更流不受影响
    assert_eq!(operation(&assert_ok!(database_stream.next().await).unwrap()), "rename");
    assert!(database_stream.alive());
    assert_ok!(database_stream.close().await);
}
