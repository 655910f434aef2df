//! 游标模型测试
//!
//! 基于内存驱动的往返计数器验证惰性拉取行为。

use futures::{FutureExt, TryStreamExt};
use rat_docbridge::*;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

fn setup() -> (Client<MemoryDriver>, MemoryClient) {
    rat_docbridge::init();
    let memory = MemoryClient::new();
    (Client::new(memory.clone()), memory)
}

async fn seed(collection: &Collection<MemoryDriver>, n: i64) {
    let documents: Vec<Document> = (0..n).map(|i| doc! { "i": i }).collect();
    assert_ok!(collection.insert_many(documents, None).await);
}

fn batched(collection: &Collection<MemoryDriver>, batch_size: u32) -> Cursor<MemoryDriver> {
    let mut cursor = collection.find(None, None, None);
    cursor.batch_size(batch_size).unwrap();
    cursor
}

fn values(documents: &[Document]) -> Vec<i64> {
    documents.iter().map(|d| d.get_i64("i").unwrap()).collect()
}

#[tokio::test]
async fn test_next_yields_all_documents_for_any_batch_size() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 7).await;

    for batch_size in [1u32, 2, 3, 7, 10] {
        let mut cursor = batched(&collection, batch_size);
        let mut seen = Vec::new();
        for _ in 0..7 {
            let document = assert_ok!(cursor.next().await).expect("应有文档");
            seen.push(document.get_i64("i").unwrap());
        }
        assert_eq!(seen, (0..7).collect::<Vec<_>>(), "batch_size={}", batch_size);
        assert_eq!(assert_ok!(cursor.next().await), None);
        assert!(!cursor.alive());
    }
}

#[tokio::test]
async fn test_drain_matches_stepwise_iteration() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 12).await;

    let mut stepwise = Vec::new();
    let mut cursor = batched(&collection, 5);
    while let Some(document) = assert_ok!(cursor.next().await) {
        stepwise.push(document);
    }

    let mut cursor = batched(&collection, 5);
    let drained = assert_ok!(cursor.to_list(None).await);
    assert_eq!(drained, stepwise);
}

#[tokio::test]
async fn test_bounded_drain_then_rest() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 10).await;

    for k in [0i64, 1, 4, 10] {
        let mut cursor = batched(&collection, 3);
        let head = assert_ok!(cursor.to_list(Some(k)).await);
        assert_eq!(head.len(), k as usize);
        let rest = assert_ok!(cursor.to_list(None).await);
        assert_eq!(rest.len(), 10 - k as usize);

        let mut all = values(&head);
        all.extend(values(&rest));
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_drain_zero_performs_no_round_trip() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 3).await;
    memory.reset_counters();

    let mut cursor = collection.find(None, None, None);
    assert!(assert_ok!(cursor.to_list(Some(0)).await).is_empty());
    assert_eq!(memory.round_trips(), 0);
    assert!(!cursor.started());
}

#[tokio::test]
async fn test_negative_length_rejected_before_round_trip() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 3).await;
    memory.reset_counters();

    let mut cursor = collection.find(None, None, None);
    let err = assert_err!(cursor.to_list(Some(-1)).await);
    assert!(matches!(err, DocBridgeError::InvalidArgument { .. }));
    assert_eq!(memory.round_trips(), 0);

    let mut command = collection.aggregate(vec![], None, None);
    let err = assert_err!(command.to_list(Some(-5)).await);
    assert!(matches!(err, DocBridgeError::InvalidArgument { .. }));
    assert_eq!(memory.round_trips(), 0);
}

#[tokio::test]
async fn test_zero_row_latent_cursor_exhausts_in_one_round_trip() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 5).await;
    memory.reset_counters();

    let mut cursor = collection.aggregate(vec![doc! { "$match": { "i": 999 } }], None, None);
    assert!(cursor.alive());
    assert!(!cursor.started());

    assert_eq!(assert_ok!(cursor.next().await), None);
    assert!(!cursor.alive());
    assert_eq!(memory.command_count("aggregate"), 1);
    assert_eq!(memory.command_count("getMore"), 0);
    assert_eq!(memory.round_trips(), 1);

    // 耗尽后不再产生往返
    assert_eq!(assert_ok!(cursor.next().await), None);
    assert_eq!(memory.round_trips(), 1);
}

#[tokio::test]
async fn test_close_twice_releases_once() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 5).await;
    memory.reset_counters();

    let mut cursor = batched(&collection, 2);
    assert_ok!(cursor.next().await);
    assert!(cursor.alive());

    assert_ok!(cursor.close().await);
    assert_ok!(cursor.close().await);
    assert_eq!(memory.command_count("killCursors"), 1);
    assert!(cursor.is_closed());
    assert!(!cursor.alive());

    let err = assert_err!(cursor.next().await);
    assert!(matches!(err, DocBridgeError::CursorClosed));
}

#[tokio::test]
async fn test_close_without_round_trip() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    memory.reset_counters();

    let mut cursor = collection.find(None, None, None);
    assert_ok!(cursor.close().await);
    assert_ok!(cursor.close().await);
    assert_eq!(memory.round_trips(), 0);
}

#[tokio::test]
async fn test_250_documents_in_three_round_trips() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 250).await;
    memory.reset_counters();

    let mut cursor = batched(&collection, 100);
    let documents = assert_ok!(cursor.to_list(None).await);

    assert_eq!(values(&documents), (0..250).collect::<Vec<_>>());
    assert_eq!(memory.command_count("find"), 1);
    assert_eq!(memory.command_count("getMore"), 2);
    assert_eq!(memory.round_trips(), 3);
    assert!(!cursor.alive());
}

#[tokio::test]
async fn test_modifiers_rejected_after_start() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 3).await;

    let mut cursor = collection.find(None, None, None);
    cursor.sort(doc! { "i": -1 }).unwrap().skip(1).unwrap().limit(5).unwrap();
    let first = assert_ok!(cursor.next().await).unwrap();
    assert_eq!(first.get_i64("i").unwrap(), 1);

    let err = assert_err!(cursor.sort(doc! { "i": 1 }));
    assert!(matches!(err, DocBridgeError::InvalidOperation { .. }));
}

#[tokio::test]
async fn test_rejected_modifier_keeps_cursor_usable() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 6).await;

    let mut cursor = batched(&collection, 2);
    assert_eq!(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap(), 0);

    assert_err!(cursor.limit(1));
    assert_err!(cursor.hint(Hint::Name("i_1".to_string())));
    assert!(cursor.alive());

    let rest = assert_ok!(cursor.to_list(None).await);
    assert_eq!(values(&rest), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_abandoned_next_does_not_lose_batch() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 6).await;

    let mut cursor = batched(&collection, 2);
    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap());
    }

    // 只轮询一次就放弃，getMore 仍在工作线程上进行
    if let Some(result) = cursor.next().now_or_never() {
        if let Some(document) = assert_ok!(result) {
            seen.push(document.get_i64("i").unwrap());
        }
    }

    seen.extend(values(&assert_ok!(cursor.to_list(None).await)));
    assert_eq!(seen, (0..6).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_abandoned_first_fetch_is_resumed() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 4).await;
    memory.reset_counters();

    let mut cursor = batched(&collection, 2);
    let abandoned = cursor.to_list(None).now_or_never();
    let documents = match abandoned {
        Some(result) => assert_ok!(result),
        None => assert_ok!(cursor.to_list(None).await),
    };
    assert_eq!(values(&documents), vec![0, 1, 2, 3]);
    assert_eq!(memory.command_count("find"), 1);
}

#[tokio::test]
async fn test_hint_must_name_an_existing_index() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 3).await;

    let mut cursor = collection.find(None, None, None);
    cursor.hint(Hint::Name("missing_1".to_string())).unwrap();
    let err = assert_err!(cursor.next().await);
    assert_eq!(err.code(), Some(2));

    assert_ok!(collection.create_index(doc! { "i": 1 }, None, None).await);
    let mut cursor = collection.find(None, None, None);
    cursor
        .hint(Hint::Keys(doc! { "i": 1 }))
        .unwrap()
        .collation(Collation::new("en"))
        .unwrap()
        .max_time(Duration::from_secs(5))
        .unwrap()
        .allow_disk_use(true)
        .unwrap();
    assert_eq!(assert_ok!(cursor.to_list(None).await).len(), 3);
}

#[tokio::test]
async fn test_tailable_await_waits_for_new_documents() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("log");
    seed(&collection, 1).await;

    let mut cursor = collection.find(None, None, None);
    cursor
        .cursor_type(CursorType::TailableAwait)
        .unwrap()
        .max_await_time(Duration::from_secs(5))
        .unwrap();
    assert_eq!(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap(), 0);

    let writer = collection.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.insert_one(doc! { "i": 1_i64 }, None).await.unwrap();
    });

    let started = Instant::now();
    let document = assert_ok!(cursor.next().await).expect("等待期间插入的文档");
    assert_eq!(document.get_i64("i").unwrap(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_ok!(cursor.close().await);
}

#[tokio::test]
async fn test_rewind_restarts_query_with_same_options() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 5).await;
    memory.reset_counters();

    let mut cursor = collection.find(None, None, None);
    cursor.sort(doc! { "i": -1 }).unwrap().batch_size(2).unwrap();
    assert_eq!(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap(), 4);

    assert_ok!(cursor.rewind().await);
    assert!(!cursor.started());
    assert_eq!(memory.command_count("killCursors"), 1);

    let documents = assert_ok!(cursor.to_list(None).await);
    assert_eq!(values(&documents), vec![4, 3, 2, 1, 0]);
    assert_eq!(memory.command_count("find"), 2);
}

#[tokio::test]
async fn test_clone_unstarted_copies_options() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 4).await;

    let mut cursor = collection.find(Some(doc! { "i": { "$gte": 1 } }), None, None);
    cursor.sort(doc! { "i": -1 }).unwrap();
    assert_ok!(cursor.to_list(None).await);

    let mut copy = cursor.clone_unstarted();
    assert!(!copy.started());
    assert_eq!(values(&assert_ok!(copy.to_list(None).await)), vec![3, 2, 1]);

    let aggregate = collection.aggregate(vec![doc! { "$match": { "i": 0 } }], None, None);
    let mut copy = aggregate.clone_unstarted().expect("延迟游标可以复制");
    assert_eq!(assert_ok!(copy.to_list(None).await).len(), 1);

    let eager = assert_ok!(client.list_databases(None).await);
    assert!(eager.clone_unstarted().is_none());
}

#[tokio::test]
async fn test_projection_and_comment_before_start() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    assert_ok!(collection.insert_one(doc! { "i": 1_i64, "name": "pen", "price": 3 }, None).await);

    let mut cursor = collection.find(None, None, None);
    cursor
        .projection(doc! { "name": 1, "_id": 0 })
        .unwrap()
        .comment("投影测试")
        .unwrap();
    let documents = assert_ok!(cursor.to_list(None).await);
    assert_eq!(documents, vec![doc! { "name": "pen" }]);
}

#[tokio::test]
async fn test_tailable_cursor_cannot_be_drained() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("log");
    seed(&collection, 2).await;
    memory.reset_counters();

    let mut cursor = collection.find(None, None, None);
    cursor.cursor_type(CursorType::Tailable).unwrap();
    assert!(cursor.is_tailable());
    let err = assert_err!(cursor.to_list(None).await);
    assert!(matches!(err, DocBridgeError::InvalidOperation { .. }));
    assert_eq!(memory.round_trips(), 0);

    // 逐条读取仍然可用，并能读到之后追加的文档
    assert_eq!(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap(), 0);
    assert_eq!(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap(), 1);
    assert!(cursor.alive());
    assert_ok!(collection.insert_one(doc! { "i": 2_i64 }, None).await);
    assert_eq!(assert_ok!(cursor.next().await).unwrap().get_i64("i").unwrap(), 2);
    assert_ok!(cursor.close().await);
}

#[tokio::test]
async fn test_get_more_error_surfaces_unchanged() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 4).await;

    let mut cursor = batched(&collection, 2);
    assert_eq!(assert_ok!(cursor.to_list(Some(2)).await).len(), 2);

    memory.configure_fail_point(FailPoint::new(&["getMore"], 91).with_code_name("ShutdownInProgress").times(1));
    let err = assert_err!(cursor.next().await);
    assert_eq!(err.code(), Some(91));
}

#[tokio::test]
async fn test_latent_list_indexes_with_batch_size() {
    let (client, memory) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 1).await;
    assert_ok!(collection.create_index(doc! { "i": 1 }, None, None).await);
    assert_ok!(collection.create_index(doc! { "name": 1 }, None, None).await);
    memory.reset_counters();

    let mut cursor = collection.list_indexes(None).batch_size(1);
    assert_eq!(memory.round_trips(), 0);
    let indexes = assert_ok!(cursor.to_list(None).await);
    let names: Vec<&str> = indexes.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["_id_", "i_1", "name_1"]);
    assert_eq!(memory.command_count("listIndexes"), 1);
    assert_eq!(memory.command_count("getMore"), 2);
    assert!(cursor.collection().is_some());
}

#[tokio::test]
async fn test_eager_command_cursor() {
    let (client, memory) = setup();
    seed(&client.database("a").collection("x"), 1).await;
    seed(&client.database("b").collection("y"), 1).await;
    memory.reset_counters();

    let mut cursor = assert_ok!(client.list_databases(None).await);
    assert_eq!(memory.command_count("listDatabases"), 1);
    let databases = assert_ok!(cursor.to_list(None).await);
    let names: Vec<&str> = databases.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert!(names.contains(&"a"));
    assert!(names.contains(&"b"));
    assert_eq!(memory.round_trips(), 1);
    assert!(cursor.collection().is_none());
}

#[tokio::test]
async fn test_into_stream_collects_all() {
    let (client, _) = setup();
    let collection = client.database("shop").collection("items");
    seed(&collection, 30).await;

    let cursor = batched(&collection, 7);
    let documents: Vec<Document> = assert_ok!(cursor.into_stream().try_collect().await);
    assert_eq!(values(&documents), (0..30).collect::<Vec<_>>());

    let command = collection.aggregate(vec![doc! { "$match": { "i": { "$lt": 5 } } }], None, None);
    let documents: Vec<Document> = assert_ok!(command.into_stream().try_collect().await);
    assert_eq!(documents.len(), 5);
}
