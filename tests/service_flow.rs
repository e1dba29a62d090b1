//! Service-level flows: conditional replace, patch semantics, query, and
//! response projection.

mod common;

use common::harness;
use scim2::ScimError;
use scim2::crud::Projection;
use scim2::json::serialize;
use scim2::service::{
    CreateRequest, DeleteRequest, GetRequest, PatchRequest, QueryRequest, ReplaceRequest,
};
use serde_json::{Value, json};

async fn create_alice(h: &common::Harness) -> (String, String) {
    let ctx = h.ctx();
    let response = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({
                    "userName": "alice",
                    "name": {"givenName": "Alice"},
                    "emails": [{"value": "a@example.com", "type": "work"}]
                }),
            },
        )
        .await
        .unwrap();
    (
        response.resource.id().unwrap(),
        response.version.unwrap(),
    )
}

#[tokio::test]
async fn test_stale_if_match_fails_without_touching_storage() {
    let h = harness();
    let ctx = h.ctx();
    let (id, version) = create_alice(&h).await;

    let err = h
        .users()
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id.clone(),
                body: json!({"userName": "alice", "displayName": "Changed"}),
                expected_version: Some("stale-version".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::PreCondition(_)));
    assert_eq!(err.http_status(), 412);

    // Storage is untouched: the stored version still matches.
    let fetched = h
        .users()
        .get
        .get(
            &ctx,
            GetRequest {
                resource_id: id.clone(),
                projection: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(fetched.version.as_deref(), Some(version.as_str()));
    assert!(fetched.resource.raw_of("displayName").is_null());

    // With the correct version the replace goes through.
    h.users()
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id,
                body: json!({"userName": "alice", "displayName": "Changed"}),
                expected_version: Some(version),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_writers_lose_on_stale_version() {
    let h = harness();
    let ctx = h.ctx();
    let (id, version) = create_alice(&h).await;

    // Writer A wins with the version both writers read.
    h.users()
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id.clone(),
                body: json!({"userName": "alice", "displayName": "From A"}),
                expected_version: Some(version.clone()),
            },
        )
        .await
        .unwrap();

    // Writer B carried the same version and must not clobber A's write.
    let err = h
        .users()
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id.clone(),
                body: json!({"userName": "alice", "displayName": "From B"}),
                expected_version: Some(version),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::PreCondition(_)));

    let fetched = h
        .users()
        .get
        .get(
            &ctx,
            GetRequest {
                resource_id: id,
                projection: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(fetched.resource.raw_of("displayName"), json!("From A"));
}

#[tokio::test]
async fn test_patch_auto_creates_intermediate_and_bumps_version() {
    let h = harness();
    let ctx = h.ctx();

    let created = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"userName": "bob"}),
            },
        )
        .await
        .unwrap();
    let id = created.resource.id().unwrap();
    let old_version = created.version.unwrap();

    let response = h
        .users()
        .patch
        .patch(
            &ctx,
            PatchRequest {
                resource_id: id,
                body: json!({
                    "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                    "Operations": [
                        {"op": "replace", "path": "name.familyName", "value": "Doe"}
                    ]
                }),
                expected_version: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(response.resource.raw_of("name"), json!({"familyName": "Doe"}));
    assert_ne!(response.version.unwrap(), old_version);
}

#[tokio::test]
async fn test_patch_remove_and_add_on_multi_valued() {
    let h = harness();
    let ctx = h.ctx();
    let (id, _) = create_alice(&h).await;

    let response = h
        .users()
        .patch
        .patch(
            &ctx,
            PatchRequest {
                resource_id: id,
                body: json!({
                    "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                    "Operations": [
                        {"op": "add", "path": "emails",
                         "value": {"value": "b@example.com", "type": "home", "primary": true}},
                        {"op": "remove", "path": "emails[type eq \"work\"]"}
                    ]
                }),
                expected_version: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        response.resource.raw_of("emails"),
        json!([{"value": "b@example.com", "type": "home", "primary": true}])
    );
}

#[tokio::test]
async fn test_patch_bad_path_is_invalid_path() {
    let h = harness();
    let ctx = h.ctx();
    let (id, _) = create_alice(&h).await;

    let err = h
        .users()
        .patch
        .patch(
            &ctx,
            PatchRequest {
                resource_id: id,
                body: json!({
                    "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                    "Operations": [
                        {"op": "replace", "path": "name..broken", "value": "x"}
                    ]
                }),
                expected_version: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::InvalidPath(_)));
}

#[tokio::test]
async fn test_query_service_compiles_filter_and_pages() {
    let h = harness();
    let ctx = h.ctx();
    for name in ["alice", "alicia", "bob"] {
        h.users()
            .create
            .create(
                &ctx,
                CreateRequest {
                    body: json!({"userName": name}),
                },
            )
            .await
            .unwrap();
    }

    let response = h
        .users()
        .query
        .query(
            &ctx,
            QueryRequest {
                filter: Some(r#"userName sw "ali""#.to_string()),
                sort_by: Some("userName".to_string()),
                count: Some(1),
                ..QueryRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(response.total_results, 2);
    assert_eq!(response.items_per_page, 1);
    assert_eq!(response.resources[0].raw_of("userName"), json!("alice"));

    let err = h
        .users()
        .query
        .query(
            &ctx,
            QueryRequest {
                filter: Some("userName eq".to_string()),
                ..QueryRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::InvalidFilter(_)));
}

#[tokio::test]
async fn test_attribute_projection_on_get() {
    let h = harness();
    let ctx = h.ctx();
    let (id, _) = create_alice(&h).await;

    let projection = Projection::parse(Some("userName"), None).unwrap();
    let fetched = h
        .users()
        .get
        .get(
            &ctx,
            GetRequest {
                resource_id: id,
                projection: Some(projection.clone()),
            },
        )
        .await
        .unwrap();
    let body: Value = serialize(&fetched.resource, Some(&projection)).unwrap();

    assert!(body.get("id").is_some());
    assert!(body.get("schemas").is_some());
    assert!(body.get("meta").is_some());
    assert_eq!(body["userName"], "alice");
    assert!(body.get("name").is_none());
    assert!(body.get("emails").is_none());
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let h = harness();
    let ctx = h.ctx();
    let (id, _) = create_alice(&h).await;

    h.users()
        .delete
        .delete(
            &ctx,
            DeleteRequest {
                resource_id: id.clone(),
                expected_version: None,
            },
        )
        .await
        .unwrap();

    let err = h
        .users()
        .get
        .get(
            &ctx,
            GetRequest {
                resource_id: id.clone(),
                projection: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::NotFound(_)));

    let err = h
        .users()
        .delete
        .delete(
            &ctx,
            DeleteRequest {
                resource_id: id,
                expected_version: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::NotFound(_)));
}

#[tokio::test]
async fn test_filter_scenario_on_work_email() {
    let h = harness();
    let ctx = h.ctx();
    create_alice(&h).await;

    let filter = r#"emails[type eq "work"].value co "example.com""#;
    let response = h
        .users()
        .query
        .query(
            &ctx,
            QueryRequest {
                filter: Some(filter.to_string()),
                ..QueryRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(response.total_results, 1);

    // Remove the work entry; the same filter no longer matches.
    let id = response.resources[0].id().unwrap();
    h.users()
        .patch
        .patch(
            &ctx,
            PatchRequest {
                resource_id: id,
                body: json!({
                    "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                    "Operations": [
                        {"op": "remove", "path": "emails[type eq \"work\"]"}
                    ]
                }),
                expected_version: None,
            },
        )
        .await
        .unwrap();

    let response = h
        .users()
        .query
        .query(
            &ctx,
            QueryRequest {
                filter: Some(filter.to_string()),
                ..QueryRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(response.total_results, 0);
}
