//! Pinata client and schema creation against a mock pinning backend.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use idenstate_core::{Blockchain, Did, DidMethod, Fr, Network};
use idenstate_schema::{
    Attribute, AttributeType, MemorySchemaRepository, PinataClient, PinataConfig, PinningClient,
    PinningError, SchemaBuilder, SchemaError, SchemaService, SlotTag,
};

fn client(server: &MockServer) -> PinataClient {
    let config = PinataConfig::new(server.uri(), "test-jwt", "https://gateway.test/ipfs/");
    PinataClient::new(config).expect("client build")
}

fn pin_response(cid: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "IpfsHash": cid,
        "PinSize": 512,
        "Timestamp": "2024-05-01T10:00:00Z"
    }))
}

fn kyc_age() -> SchemaBuilder {
    let issuer = Did::from_state(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy, &Fr::from(21u64))
        .expect("did")
        .to_string();
    SchemaBuilder::new(issuer, "KYCAgeCredential", "1.0.0")
        .attribute(Attribute::new("birthday", AttributeType::Integer).required().slot(SlotTag::IndexSlotA))
}

#[tokio::test]
async fn pin_sends_multipart_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinFileToIPFS"))
        .and(header("Authorization", "Bearer test-jwt"))
        .and(body_string_contains("name=\"file\""))
        .and(body_string_contains("pinataMetadata"))
        .respond_with(pin_response("QmSchemaCid"))
        .expect(1)
        .mount(&server)
        .await;

    let pinned = client(&server)
        .pin("schema.json", b"{\n  \"a\": 1\n}".to_vec())
        .await
        .expect("pin");
    assert_eq!(pinned.cid, "QmSchemaCid");
    assert_eq!(pinned.size, 512);
    assert_eq!(client(&server).gateway_url(&pinned.cid), "https://gateway.test/ipfs/QmSchemaCid");
}

#[tokio::test]
async fn non_success_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinFileToIPFS"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let err = client(&server).pin("x.json", b"{}".to_vec()).await.unwrap_err();
    match err {
        PinningError::Status { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid token");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn unpin_deletes_cid() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/unpin/QmGone"))
        .and(header("Authorization", "Bearer test-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).unpin("QmGone").await.expect("unpin");
}

#[tokio::test]
async fn unpin_of_unknown_cid_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/unpin/QmNeverPinned"))
        .respond_with(ResponseTemplate::new(404).set_body_string("NOT_FOUND"))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).unpin("QmNeverPinned").await.expect("404 is not an error");
}

#[tokio::test]
async fn schema_creation_unwinds_when_context_pin_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinFileToIPFS"))
        .and(body_string_contains("https://json-schema.org/draft/2020-12/schema"))
        .respond_with(pin_response("QmSchemaCid"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pinFileToIPFS"))
        .and(body_string_contains("@protected"))
        .respond_with(ResponseTemplate::new(500).set_body_string("pinning backend down"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/unpin/QmSchemaCid"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let repo = Arc::new(MemorySchemaRepository::new());
    let svc = SchemaService::new(Arc::new(client(&server)), repo.clone());

    let err = svc.create(kyc_age(), &CancellationToken::new()).await.unwrap_err();
    match err {
        SchemaError::Pinning(e) => assert_eq!(e.status(), Some(500)),
        other => panic!("expected pinning error, got {other:?}"),
    }
    assert!(repo.is_empty().await);
}

#[tokio::test]
async fn schema_revocation_unpins_both_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinFileToIPFS"))
        .and(body_string_contains("https://json-schema.org/draft/2020-12/schema"))
        .respond_with(pin_response("QmSchemaCid"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pinFileToIPFS"))
        .and(body_string_contains("@protected"))
        .respond_with(pin_response("QmContextCid"))
        .mount(&server)
        .await;
    for cid in ["QmSchemaCid", "QmContextCid"] {
        Mock::given(method("DELETE"))
            .and(path(format!("/unpin/{cid}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let svc = SchemaService::new(Arc::new(client(&server)), Arc::new(MemorySchemaRepository::new()));
    let cancel = CancellationToken::new();
    let record = svc.create(kyc_age(), &cancel).await.expect("create");
    assert_eq!(record.context_url, "https://gateway.test/ipfs/QmContextCid");
    assert_eq!(record.hash, idenstate_schema::schema_hash("https://gateway.test/ipfs/QmContextCid"));

    let revoked = svc.revoke(record.id, &cancel).await.expect("revoke");
    assert_eq!(revoked.status, idenstate_schema::SchemaStatus::Revoked);
}
