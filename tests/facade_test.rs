//! 门面树测试

use rat_docbridge::*;
use tokio_test::{assert_err, assert_ok};

fn setup() -> (Client<MemoryDriver>, MemoryClient) {
    rat_docbridge::init();
    let memory = MemoryClient::with_default_database("app");
    (Client::new(memory.clone()), memory)
}

#[tokio::test]
async fn test_facade_equality_follows_delegate() {
    let (client, _) = setup();

    assert_eq!(client.database("a"), client.database("a"));
    assert_ne!(client.database("a"), client.database("b"));
    assert_eq!(client.database("a").collection("x"), client.database("a").collection("x"));
    assert_ne!(client.database("a").collection("x"), client.database("b").collection("x"));
    assert_eq!(client.clone(), client);

    // 不同存储的客户端互不相等
    let other = Client::<MemoryDriver>::new(MemoryClient::new());
    assert_ne!(other, client);
    assert_eq!(client.database("a").delegate(), client.database("a").delegate());
}

#[tokio::test]
async fn test_sub_addressing_never_fails() {
    let (client, memory) = setup();
    memory.reset_counters();

    let collection = client.database("nowhere").collection("ghost");
    assert_eq!(memory.round_trips(), 0);
    assert_eq!(collection.name(), "ghost");
    assert_eq!(collection.full_name(), "nowhere.ghost");
    assert_eq!(collection.database().name(), "nowhere");
    assert_eq!(assert_ok!(collection.find_one(None, None, None).await), None);

    let default = client.default_database().expect("应有默认数据库");
    assert_eq!(default.name(), "app");
    assert!(Client::<MemoryDriver>::new(MemoryClient::new()).default_database().is_none());
}

#[tokio::test]
async fn test_provider_error_is_not_retried() {
    let (client, memory) = setup();
    let collection = client.database("app").collection("users");
    assert_ok!(collection.insert_one(doc! { "name": "alice" }, None).await);
    memory.reset_counters();

    memory.configure_fail_point(
        FailPoint::new(&["find"], 91)
            .with_code_name("ShutdownInProgress")
            .with_label("RetryableWriteError")
            .times(1),
    );

    let err = assert_err!(collection.find_one(None, None, None).await);
    let provider = err.as_provider().expect("应为驱动错误");
    assert_eq!(provider.code(), Some(91));
    assert_eq!(provider.code_name(), Some("ShutdownInProgress"));
    assert!(provider.has_error_label("RetryableWriteError"));
    assert_eq!(memory.command_count("find"), 1);

    // 故障点只生效一次
    assert!(assert_ok!(collection.find_one(None, None, None).await).is_some());
    assert_eq!(memory.command_count("find"), 2);
}

#[tokio::test]
async fn test_crud_round_trip() {
    let (client, _) = setup();
    let collection = client.database("app").collection("users");

    let inserted = assert_ok!(collection.insert_one(doc! { "name": "alice", "age": 30 }, None).await);
    assert!(matches!(inserted.inserted_id, Bson::ObjectId(_)));

    let many = assert_ok!(
        collection
            .insert_many(
                vec![
                    doc! { "name": "bob", "age": 25 },
                    doc! { "name": "carol", "age": 35, "tags": ["admin"] },
                ],
                None,
            )
            .await
    );
    assert_eq!(many.inserted_ids.len(), 2);

    let updated = assert_ok!(
        collection
            .update_one(doc! { "name": "alice" }, doc! { "$inc": { "age": 1 } }, None, None)
            .await
    );
    assert_eq!(updated.matched_count, 1);
    assert_eq!(updated.modified_count, 1);

    let alice = assert_ok!(collection.find_one(Some(doc! { "name": "alice" }), None, None).await).unwrap();
    assert_eq!(alice.get_i32("age").unwrap(), 31);

    let updated = assert_ok!(
        collection
            .update_many(doc! { "age": { "$gte": 30 } }, doc! { "$set": { "senior": true } }, None, None)
            .await
    );
    assert_eq!(updated.modified_count, 2);

    let upserted = assert_ok!(
        collection
            .update_one(
                doc! { "name": "dave" },
                doc! { "$set": { "age": 40 } },
                Some(UpdateOptions { upsert: true }),
                None,
            )
            .await
    );
    assert!(upserted.upserted_id.is_some());

    let after = assert_ok!(
        collection
            .find_one_and_update(
                doc! { "name": "bob" },
                doc! { "$set": { "age": 26 } },
                Some(FindOneAndUpdateOptions {
                    return_document: ReturnDocument::After,
                    ..Default::default()
                }),
                None,
            )
            .await
    )
    .unwrap();
    assert_eq!(after.get_i32("age").unwrap(), 26);

    let replaced = assert_ok!(
        collection
            .replace_one(doc! { "name": "carol" }, doc! { "name": "carol", "age": 36 }, None, None)
            .await
    );
    assert_eq!(replaced.modified_count, 1);
    let carol = assert_ok!(collection.find_one(Some(doc! { "name": "carol" }), None, None).await).unwrap();
    assert!(!carol.contains_key("tags"));

    let mut names: Vec<Bson> = assert_ok!(collection.distinct("name", None, None).await);
    names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    assert_eq!(names, vec![Bson::from("alice"), Bson::from("bob"), Bson::from("carol"), Bson::from("dave")]);

    // 替换后的 carol 不再带有 senior 字段
    assert_eq!(assert_ok!(collection.count_documents(Some(doc! { "senior": true }), None).await), 1);
    assert_eq!(assert_ok!(collection.estimated_document_count().await), 4);

    let removed = assert_ok!(collection.find_one_and_delete(doc! { "name": "dave" }, None).await).unwrap();
    assert_eq!(removed.get_i32("age").unwrap(), 40);

    let deleted = assert_ok!(collection.delete_one(doc! { "name": "bob" }, None).await);
    assert_eq!(deleted.deleted_count, 1);
    let deleted = assert_ok!(collection.delete_many(doc! {}, None).await);
    assert_eq!(deleted.deleted_count, 2);
    assert_eq!(assert_ok!(collection.count_documents(None, None).await), 0);
}

#[tokio::test]
async fn test_duplicate_key_error_passes_through() {
    let (client, _) = setup();
    let collection = client.database("app").collection("users");
    assert_ok!(collection.insert_one(doc! { "_id": 1, "name": "alice" }, None).await);

    let err = assert_err!(collection.insert_one(doc! { "_id": 1, "name": "again" }, None).await);
    assert_eq!(err.code(), Some(11000));

    assert_ok!(
        collection
            .create_index(doc! { "email": 1 }, Some(IndexOptions { name: None, unique: true }), None)
            .await
    );
    assert_ok!(collection.insert_one(doc! { "email": "a@example.com" }, None).await);
    let err = assert_err!(collection.insert_one(doc! { "email": "a@example.com" }, None).await);
    assert_eq!(err.code(), Some(11000));
}

#[tokio::test]
async fn test_index_management() {
    let (client, _) = setup();
    let collection = client.database("app").collection("users");
    assert_ok!(collection.insert_one(doc! { "name": "alice" }, None).await);

    let name = assert_ok!(collection.create_index(doc! { "name": 1, "age": -1 }, None, None).await);
    assert_eq!(name, "name_1_age_-1");

    let indexes = assert_ok!(collection.list_indexes(None).to_list(None).await);
    assert_eq!(indexes.len(), 2);

    assert_ok!(collection.drop_index(&name, None).await);
    let err = assert_err!(collection.drop_index("_id_", None).await);
    assert_eq!(err.code(), Some(72));

    assert_ok!(collection.create_index(doc! { "age": 1 }, None, None).await);
    assert_ok!(collection.drop_indexes(None).await);
    let indexes = assert_ok!(collection.list_indexes(None).to_list(None).await);
    assert_eq!(indexes.len(), 1);
}

#[tokio::test]
async fn test_database_and_catalog_operations() {
    let (client, _) = setup();
    let database = client.database("catalog");

    let created = assert_ok!(database.create_collection("orders", None).await);
    assert_eq!(created.full_name(), "catalog.orders");
    let err = assert_err!(database.create_collection("orders", None).await);
    assert_eq!(err.code(), Some(48));

    assert_ok!(database.collection("invoices").insert_one(doc! { "n": 1 }, None).await);

    let mut names = assert_ok!(database.list_collection_names(None, None).await);
    names.sort();
    assert_eq!(names, vec!["invoices".to_string(), "orders".to_string()]);

    let mut cursor = assert_ok!(database.list_collections(None, None).await);
    assert_eq!(assert_ok!(cursor.to_list(None).await).len(), 2);

    assert_ok!(database.drop_collection("orders", None).await);
    assert_eq!(assert_ok!(database.list_collection_names(None, None).await), vec!["invoices".to_string()]);

    let names = assert_ok!(client.list_database_names(None).await);
    assert!(names.contains(&"catalog".to_string()));

    assert_ok!(client.drop_database("catalog", None).await);
    let names = assert_ok!(client.list_database_names(None).await);
    assert!(!names.contains(&"catalog".to_string()));
}

#[tokio::test]
async fn test_commands_and_server_info() {
    let (client, _) = setup();
    let database = client.database("app");

    let reply = assert_ok!(database.command(doc! { "ping": 1 }, None).await);
    assert_eq!(reply.get_f64("ok").unwrap(), 1.0);

    let err = assert_err!(database.command(doc! { "frobnicate": 1 }, None).await);
    assert_eq!(err.code(), Some(59));

    let info = assert_ok!(client.server_info().await);
    assert!(info.contains_key("version"));

    assert_ok!(client.close().await);
}

#[tokio::test]
async fn test_database_aggregate_is_latent() {
    let (client, memory) = setup();
    memory.reset_counters();

    let mut cursor = client.database("app").aggregate(vec![doc! { "$limit": 1 }], None, None);
    assert_eq!(memory.round_trips(), 0);
    assert!(cursor.alive());
    assert!(assert_ok!(cursor.to_list(None).await).is_empty());
    assert_eq!(memory.command_count("aggregate"), 1);
}

#[tokio::test]
async fn test_collection_aggregate_pipeline() {
    let (client, _) = setup();
    let collection = client.database("app").collection("scores");
    let documents: Vec<Document> = (1..=6).map(|i| doc! { "player": i, "score": i * 10 }).collect();
    assert_ok!(collection.insert_many(documents, None).await);

    let mut cursor = collection.aggregate(
        vec![
            doc! { "$match": { "score": { "$gt": 20 } } },
            doc! { "$sort": { "score": -1 } },
            doc! { "$skip": 1 },
            doc! { "$project": { "_id": 0, "player": 1 } },
        ],
        None,
        None,
    );
    let result = assert_ok!(cursor.to_list(None).await);
    assert_eq!(result, vec![doc! { "player": 5 }, doc! { "player": 4 }, doc! { "player": 3 }]);

    let mut count = collection.aggregate(vec![doc! { "$count": "total" }], None, None);
    assert_eq!(assert_ok!(count.to_list(None).await), vec![doc! { "total": 6 }]);
}

#[tokio::test]
async fn test_with_options_derives_concerns() {
    let (client, _) = setup();
    let majority = ConcernOptions {
        read_concern: Some(ReadConcernLevel::Majority),
        ..Default::default()
    };

    let client = client.with_options(majority.clone());
    assert_eq!(client.concern_options(), majority);

    let database = client.database("app").with_options(ConcernOptions {
        read_preference: Some(ReadPreference::SecondaryPreferred),
        ..Default::default()
    });
    let collection = database.collection("users");
    assert_eq!(collection.concern_options().read_concern, Some(ReadConcernLevel::Majority));
    assert_eq!(collection.concern_options().read_preference, Some(ReadPreference::SecondaryPreferred));

    // 选项不参与相等比较
    assert_eq!(database, client.database("app"));
    assert_eq!(collection, client.database("app").collection("users"));

    let replicated = collection.with_options(ConcernOptions {
        write_concern: Some(WriteConcernLevel::Nodes(2)),
        ..Default::default()
    });
    let err = assert_err!(replicated.insert_one(doc! { "name": "alice" }, None).await);
    assert_eq!(err.code(), Some(2));
    assert_eq!(assert_ok!(collection.count_documents(None, None).await), 0);

    // 事务内由事务决定写关注
    let session = assert_ok!(client.start_session(None).await);
    assert_ok!(session.begin_transaction(None).await);
    assert_ok!(replicated.insert_one(doc! { "name": "bob" }, Some(&session)).await);
    assert_ok!(session.commit_transaction().await);
    assert_eq!(assert_ok!(collection.count_documents(None, None).await), 1);
}

#[tokio::test]
async fn test_find_one_and_replace() {
    let (client, _) = setup();
    let collection = client.database("app").collection("users");
    assert_ok!(collection.insert_one(doc! { "_id": 1, "name": "alice", "age": 30 }, None).await);

    let before = assert_ok!(
        collection
            .find_one_and_replace(doc! { "_id": 1 }, doc! { "name": "alicia" }, None, None)
            .await
    );
    assert_eq!(before.unwrap().get_str("name").unwrap(), "alice");

    let options = FindOneAndReplaceOptions {
        return_document: ReturnDocument::After,
        projection: Some(doc! { "name": 1, "_id": 0 }),
        ..Default::default()
    };
    let after = assert_ok!(
        collection
            .find_one_and_replace(doc! { "_id": 1 }, doc! { "name": "ally" }, Some(options), None)
            .await
    );
    assert_eq!(after, Some(doc! { "name": "ally" }));

    // 替换文档整体覆盖旧文档
    let stored = assert_ok!(collection.find_one(Some(doc! { "_id": 1 }), None, None).await).unwrap();
    assert!(!stored.contains_key("age"));

    let missing = assert_ok!(
        collection
            .find_one_and_replace(doc! { "_id": 2 }, doc! { "name": "carol" }, None, None)
            .await
    );
    assert_eq!(missing, None);
    assert_eq!(assert_ok!(collection.count_documents(None, None).await), 1);

    let upsert = FindOneAndReplaceOptions {
        upsert: true,
        return_document: ReturnDocument::After,
        ..Default::default()
    };
    let inserted = assert_ok!(
        collection
            .find_one_and_replace(doc! { "_id": 2 }, doc! { "name": "carol" }, Some(upsert), None)
            .await
    );
    assert_eq!(inserted.unwrap().get_str("name").unwrap(), "carol");

    let bad_hint = FindOneAndReplaceOptions {
        hint: Some(Hint::Name("missing_1".to_string())),
        ..Default::default()
    };
    let err = assert_err!(
        collection
            .find_one_and_replace(doc! { "_id": 2 }, doc! { "name": "dave" }, Some(bad_hint), None)
            .await
    );
    assert_eq!(err.code(), Some(2));
}

#[tokio::test]
async fn test_create_indexes_and_index_information() {
    let (client, memory) = setup();
    let collection = client.database("app").collection("users");
    assert_ok!(collection.insert_one(doc! { "email": "a@example.com" }, None).await);
    memory.reset_counters();

    let names = assert_ok!(
        collection
            .create_indexes(
                vec![
                    IndexModel::new(doc! { "email": 1 }).with_options(IndexOptions {
                        unique: true,
                        ..Default::default()
                    }),
                    IndexModel::new(doc! { "age": -1 }).with_options(IndexOptions {
                        name: Some("by_age".to_string()),
                        ..Default::default()
                    }),
                ],
                None,
            )
            .await
    );
    assert_eq!(names, vec!["email_1".to_string(), "by_age".to_string()]);
    assert_eq!(memory.command_count("createIndexes"), 1);

    let info = assert_ok!(collection.index_information(None).await);
    assert_eq!(info.len(), 3);
    assert_eq!(info.get_document("email_1").unwrap(), &doc! { "key": { "email": 1 }, "unique": true });
    assert_eq!(info.get_document("by_age").unwrap(), &doc! { "key": { "age": -1 } });
    assert!(info.contains_key("_id_"));

    let err = assert_err!(collection.create_indexes(vec![IndexModel::new(doc! {})], None).await);
    assert_eq!(err.code(), Some(67));
}

#[tokio::test]
async fn test_collection_options() {
    let (client, _) = setup();
    let database = client.database("app");
    let collection = assert_ok!(database.create_collection("orders", None).await);

    assert_eq!(assert_ok!(collection.options(None).await), doc! {});
    assert_eq!(assert_ok!(database.collection("ghost").options(None).await), doc! {});
}

#[tokio::test]
async fn test_rename_collection() {
    let (client, _) = setup();
    let database = client.database("app");
    let orders = database.collection("orders");
    assert_ok!(orders.insert_one(doc! { "n": 1 }, None).await);
    assert_ok!(orders.create_index(doc! { "n": 1 }, None, None).await);

    let archived = assert_ok!(orders.rename("archived", false, None).await);
    assert_eq!(archived.full_name(), "app.archived");
    assert_eq!(assert_ok!(archived.count_documents(None, None).await), 1);
    assert_eq!(assert_ok!(archived.list_indexes(None).to_list(None).await).len(), 2);
    assert_eq!(assert_ok!(database.list_collection_names(None, None).await), vec!["archived".to_string()]);

    let err = assert_err!(orders.rename("elsewhere", false, None).await);
    assert_eq!(err.code(), Some(26));

    let target = database.collection("target");
    assert_ok!(target.insert_many(vec![doc! { "n": 2 }, doc! { "n": 3 }], None).await);
    let err = assert_err!(archived.rename("target", false, None).await);
    assert_eq!(err.code(), Some(48));

    let replaced = assert_ok!(archived.rename("target", true, None).await);
    assert_eq!(replaced, target);
    assert_eq!(assert_ok!(target.count_documents(None, None).await), 1);

    let err = assert_err!(target.rename("target", true, None).await);
    assert_eq!(err.code(), Some(20));

    // 事务内不能重命名
    let session = assert_ok!(client.start_session(None).await);
    assert_ok!(session.begin_transaction(None).await);
    let err = assert_err!(target.rename("other", false, Some(&session)).await);
    assert_eq!(err.code(), Some(263));
    assert_ok!(session.abort_transaction().await);
}
