use common::{
    error::AppError,
    storage::types::collection::{delete_collection, Collection},
    storage::types::tenant::Tenant,
    utils::extraction::RawDocument,
};
use ingestion_pipeline::IngestTarget;

use test_utils::*;

/// End-to-end scenarios over the full stack: registry, vault, document
/// store, vector index, and both pipelines, on in-memory backends with a
/// scripted generation seam.

#[tokio::test]
async fn test_register_ingest_query_round_trip() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;

    let report = app
        .ingestion
        .ingest(
            &alice.id,
            IngestTarget::New {
                name: "manuals".into(),
                model: "openai".into(),
                api_key: "sk-alice-test-key".into(),
            },
            vec![RawDocument::new(
                "boiler-manual.txt",
                "the boiler pressure limit is 12 bar",
            )],
        )
        .await
        .expect("Ingestion failed");

    assert_eq!(report.chunk_count, 1);
    assert!(report.documents[0].indexed);

    let outcome = app
        .query
        .query(&alice.id, &report.collection_id, "what is the pressure limit", None)
        .await
        .expect("Query failed");

    assert_eq!(outcome.retrieved_count, 1);
    assert!(outcome.answer.contains("12 bar"));
    assert_eq!(app.dispatch.call_count(), 1);
}

#[tokio::test]
async fn test_verbatim_phrase_retrieves_its_document() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;

    let report = app
        .ingestion
        .ingest(
            &alice.id,
            IngestTarget::New {
                name: "mixed".into(),
                model: "openai".into(),
                api_key: "sk".into(),
            },
            vec![
                RawDocument::new("pumps.txt", "impeller clearance must stay under two millimetres"),
                RawDocument::new("boilers.txt", "the boiler pressure limit is 12 bar"),
            ],
        )
        .await
        .expect("Ingestion failed");

    let outcome = app
        .query
        .query(
            &alice.id,
            &report.collection_id,
            "the boiler pressure limit is 12 bar",
            None,
        )
        .await
        .expect("Query failed");

    assert!(outcome.retrieved_count >= 1);
    assert!(!outcome.answer.is_empty());
    assert!(outcome.answer.contains("12 bar"));
}

#[tokio::test]
async fn test_cross_tenant_query_is_masked() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;
    let bob = register_tenant(&app, "bob").await;

    let report = app
        .ingestion
        .ingest(
            &alice.id,
            IngestTarget::New {
                name: "manuals".into(),
                model: "openai".into(),
                api_key: "sk".into(),
            },
            vec![RawDocument::new("manual.txt", "alice's private notes")],
        )
        .await
        .expect("Ingestion failed");

    let foreign = app
        .query
        .query(&bob.id, &report.collection_id, "anything", None)
        .await
        .expect_err("Bob must not read alice's collection");
    let missing = app
        .query
        .query(&bob.id, "no-such-collection", "anything", None)
        .await
        .expect_err("Missing collection must fail");

    // Identical outward signal for "not yours" and "does not exist".
    assert!(matches!(foreign, AppError::NotFoundOrNotOwned(_)));
    assert!(matches!(missing, AppError::NotFoundOrNotOwned(_)));
    assert_eq!(
        foreign.to_string().replace(&report.collection_id, "{id}"),
        missing.to_string().replace("no-such-collection", "{id}")
    );
    assert_eq!(app.dispatch.call_count(), 0);
}

#[tokio::test]
async fn test_unsupported_selector_attempts_no_provider_call() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;

    // A row with a selector outside the closed enum, as an old deployment
    // might have left behind.
    let collection = Collection {
        id: "legacy-coll".into(),
        created_at: chrono_now(),
        updated_at: chrono_now(),
        owner_id: alice.id.clone(),
        name: "legacy".into(),
        model: "unsupported-model".into(),
        encrypted_api_key: "whatever".into(),
        documents: vec![],
    };
    app.db
        .store_item(collection)
        .await
        .expect("Failed to store collection");

    let err = app
        .query
        .query(&alice.id, "legacy-coll", "anything", None)
        .await
        .expect_err("Unsupported selector must fail");

    assert!(matches!(err, AppError::UnsupportedModel(v) if v == "unsupported-model"));
    assert_eq!(app.dispatch.call_count(), 0);
}

#[tokio::test]
async fn test_appending_same_document_twice_keeps_manifest_deduplicated() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;

    let document = RawDocument::new("manual.txt", "the boiler pressure limit is 12 bar");
    let report = app
        .ingestion
        .ingest(
            &alice.id,
            IngestTarget::New {
                name: "manuals".into(),
                model: "openai".into(),
                api_key: "sk".into(),
            },
            vec![document.clone()],
        )
        .await
        .expect("Ingestion failed");

    app.ingestion
        .ingest(
            &alice.id,
            IngestTarget::Existing {
                collection_id: report.collection_id.clone(),
            },
            vec![document],
        )
        .await
        .expect("Second ingestion failed");

    let collection = Collection::get_owned(&report.collection_id, &alice.id, &app.db)
        .await
        .expect("Collection lookup failed");
    assert_eq!(
        collection.documents.len(),
        1,
        "manifest must union, not append"
    );
}

#[tokio::test]
async fn test_delete_tears_down_all_three_targets() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;

    let report = app
        .ingestion
        .ingest(
            &alice.id,
            IngestTarget::New {
                name: "manuals".into(),
                model: "openai".into(),
                api_key: "sk".into(),
            },
            vec![RawDocument::new("manual.txt", "content to be deleted")],
        )
        .await
        .expect("Ingestion failed");

    let outcome = delete_collection(
        &alice.id,
        &report.collection_id,
        &app.db,
        &app.store,
        &app.pool,
    )
    .await
    .expect("Delete failed");

    assert!(outcome.metadata_deleted);
    assert!(outcome.files_deleted);
    assert!(outcome.index_deleted);

    // The collection is gone from every angle.
    let query_after = app
        .query
        .query(&alice.id, &report.collection_id, "anything", None)
        .await
        .expect_err("Deleted collection must be gone");
    assert!(matches!(query_after, AppError::NotFoundOrNotOwned(_)));

    // Deleting again is the idempotent all-false outcome, not an error.
    let again = delete_collection(
        &alice.id,
        &report.collection_id,
        &app.db,
        &app.store,
        &app.pool,
    )
    .await
    .expect("Second delete must not raise");
    assert!(!again.any_deleted());
}

#[tokio::test]
async fn test_supplementary_document_joins_the_context() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;

    let report = app
        .ingestion
        .ingest(
            &alice.id,
            IngestTarget::New {
                name: "manuals".into(),
                model: "openai".into(),
                api_key: "sk".into(),
            },
            vec![RawDocument::new(
                "manual.txt",
                "the boiler pressure limit is 12 bar",
            )],
        )
        .await
        .expect("Ingestion failed");

    let outcome = app
        .query
        .query(
            &alice.id,
            &report.collection_id,
            "when does the relief valve open",
            Some(RawDocument::new(
                "addendum.txt",
                "the relief valve opens at 13 bar",
            )),
        )
        .await
        .expect("Query failed");

    assert_eq!(outcome.retrieved_count, 2);
    assert!(outcome.answer.contains("13 bar"));
}

#[tokio::test]
async fn test_tenant_registration_and_authentication() {
    let app = setup_test_app().await;

    let alice = register_tenant(&app, "alice").await;

    let authenticated = Tenant::authenticate("alice", "alice-secret", &app.db)
        .await
        .expect("Authentication should succeed");
    assert_eq!(authenticated.id, alice.id);

    let duplicate = Tenant::register("alice", "other-secret", &app.db)
        .await
        .expect_err("Duplicate name must be rejected");
    assert!(matches!(duplicate, AppError::DuplicateName(_)));

    let wrong = Tenant::authenticate("alice", "wrong-secret", &app.db)
        .await
        .expect_err("Wrong secret must be rejected");
    assert!(matches!(wrong, AppError::InvalidCredentials));
}

#[tokio::test]
async fn test_collection_listing_is_tenant_scoped() {
    let app = setup_test_app().await;
    let alice = register_tenant(&app, "alice").await;
    let bob = register_tenant(&app, "bob").await;

    for (tenant, name) in [(&alice, "manuals"), (&alice, "datasheets"), (&bob, "own")] {
        app.ingestion
            .ingest(
                &tenant.id,
                IngestTarget::New {
                    name: name.into(),
                    model: "openai".into(),
                    api_key: "sk".into(),
                },
                vec![RawDocument::new("doc.txt", "some indexable content here")],
            )
            .await
            .expect("Ingestion failed");
    }

    let listed = Collection::list_for_tenant(&alice.id, &app.db)
        .await
        .expect("List failed");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|c| c.model == "openai"));
}

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
