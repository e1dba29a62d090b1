//! End-to-end behavior of the create/update filter pipeline.

mod common;

use common::harness;
use scim2::ScimError;
use scim2::json::serialize_stored;
use scim2::service::{CreateRequest, ReplaceRequest};
use serde_json::json;

#[tokio::test]
async fn test_create_stamps_id_meta_and_schemas() {
    let h = harness();
    let ctx = h.ctx();
    let response = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"userName": "alice", "id": "client-chosen"}),
            },
        )
        .await
        .unwrap();

    let resource = &response.resource;
    let id = resource.id().expect("server-assigned id");
    // The client-supplied read-only id was discarded and regenerated.
    assert_ne!(id, "client-chosen");
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    assert_eq!(
        resource.raw_of("schemas"),
        json!(["urn:ietf:params:scim:schemas:core:2.0:User"])
    );
    let meta = resource.raw_of("meta");
    assert_eq!(meta["resourceType"], "User");
    assert!(meta["created"].is_string());
    assert_eq!(meta["created"], meta["lastModified"]);
    assert_eq!(
        meta["location"],
        json!(format!("https://scim.example.com/Users/{}", id))
    );
    assert_eq!(meta["version"], json!(resource.compute_version()));
}

#[tokio::test]
async fn test_duplicate_user_name_is_uniqueness_conflict() {
    let h = harness();
    let ctx = h.ctx();
    let body = json!({"userName": "alice"});
    h.users()
        .create
        .create(&ctx, CreateRequest { body: body.clone() })
        .await
        .unwrap();

    let err = h
        .users()
        .create
        .create(&ctx, CreateRequest { body })
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::Uniqueness(_)));
    assert_eq!(err.http_status(), 409);

    // Case-insensitive attribute: a different casing still collides.
    let err = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"userName": "ALICE"}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::Uniqueness(_)));
}

#[tokio::test]
async fn test_password_is_hashed_before_persistence() {
    let h = harness();
    let ctx = h.ctx();
    let response = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"userName": "alice", "password": "hunter2"}),
            },
        )
        .await
        .unwrap();

    let stored = serialize_stored(&response.resource);
    let stored_password = stored["password"].as_str().unwrap();
    assert!(stored_password.starts_with("{sha256}"));
    assert!(!stored_password.contains("hunter2"));
}

#[tokio::test]
async fn test_required_and_canonical_validation() {
    let h = harness();
    let ctx = h.ctx();
    let err = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"displayName": "No Username"}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::InvalidValue(_)));
    assert!(err.to_string().contains("userName"));

    let err = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({
                    "userName": "bob",
                    "emails": [{"value": "b@x.com", "type": "carrier-pigeon"}]
                }),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::InvalidValue(_)));
    assert!(err.to_string().contains("carrier-pigeon"));
}

#[tokio::test]
async fn test_schema_sync_tracks_populated_extension() {
    let h = harness();
    let ctx = h.ctx();
    let response = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({
                    "userName": "alice",
                    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {
                        "employeeNumber": "E-1"
                    }
                }),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        response.resource.raw_of("schemas"),
        json!([
            "urn:ietf:params:scim:schemas:core:2.0:User",
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"
        ])
    );
}

#[tokio::test]
async fn test_immutable_attribute_enforcement() {
    let h = harness();
    let ctx = h.ctx();
    let created = h
        .devices()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"serialNumber": "SN-X", "displayName": "Laptop"}),
            },
        )
        .await
        .unwrap();
    let id = created.resource.id().unwrap();

    // Changing the immutable value is a mutability error.
    let err = h
        .devices()
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id.clone(),
                body: json!({"serialNumber": "SN-Y", "displayName": "Laptop"}),
                expected_version: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::Mutability(_)));
    assert_eq!(err.http_status(), 400);

    // Re-sending the same value succeeds.
    h.devices()
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id,
                body: json!({"serialNumber": "SN-X", "displayName": "Renamed"}),
                expected_version: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reference_must_resolve() {
    let h = harness();
    let ctx = h.ctx();
    let err = h
        .devices()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({
                    "serialNumber": "SN-1",
                    "owner": "https://scim.example.com/Users/does-not-exist"
                }),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::InvalidValue(_)));

    let alice = h
        .users()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({"userName": "alice"}),
            },
        )
        .await
        .unwrap();
    h.devices()
        .create
        .create(
            &ctx,
            CreateRequest {
                body: json!({
                    "serialNumber": "SN-1",
                    "owner": format!(
                        "https://scim.example.com/Users/{}",
                        alice.resource.id().unwrap()
                    )
                }),
            },
        )
        .await
        .unwrap();
}
