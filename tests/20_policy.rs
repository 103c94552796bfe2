mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::TestServer;

#[tokio::test]
async fn databases_lists_only_permitted_backends() -> Result<()> {
    let server = TestServer::spawn().await?;
    let (access, _) = server.login_tokens("alice@ex.com", "correct-horse").await?;

    let body: serde_json::Value = server
        .client
        .get(server.url("/api/databases"))
        .bearer_auth(&access)
        .send()
        .await?
        .json()
        .await?;

    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "salesdb");
    assert_eq!(list[0]["type"], "mysql");
    assert_eq!(list[0]["permissions"], "read");
    assert_eq!(list[0]["status"], "online");
    Ok(())
}

#[tokio::test]
async fn user_without_grants_sees_empty_list() -> Result<()> {
    let server = TestServer::spawn().await?;
    let (access, _) = server.login_tokens("bob@ex.com", "battery-staple").await?;

    let body: serde_json::Value = server
        .client
        .get(server.url("/api/databases"))
        .bearer_auth(&access)
        .send()
        .await?
        .json()
        .await?;
    assert!(body.as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn connect_without_permission_is_forbidden() -> Result<()> {
    let server = TestServer::spawn().await?;
    let (access, _) = server.login_tokens("alice@ex.com", "correct-horse").await?;

    // hrdb exists but alice holds no grant for it.
    let response = server
        .client
        .post(server.url("/api/connect"))
        .bearer_auth(&access)
        .json(&json!({ "database_name": "hrdb" }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Unknown databases fall out the same way: no permission row matches.
    let unknown = server
        .client
        .post(server.url("/api/connect"))
        .bearer_auth(&access)
        .json(&json!({ "database_name": "ghostdb" }))
        .send()
        .await?;
    assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn revoking_a_role_blocks_connect_within_token_ttl() -> Result<()> {
    let server = TestServer::spawn().await?;
    let (access, _) = server.login_tokens("alice@ex.com", "correct-horse").await?;

    // The grant is live, so policy admits the request (it then fails at the
    // backend stage, which proves we got past the 403).
    let before = server
        .client
        .post(server.url("/api/connect"))
        .bearer_auth(&access)
        .json(&json!({ "database_name": "salesdb" }))
        .send()
        .await?;
    assert_ne!(before.status(), StatusCode::FORBIDDEN);

    // Strip the role while the access token is still well within its TTL.
    let mut user = server.store.get_user("alice@ex.com").await?;
    user.roles.clear();
    server.store.save_user(&user).await?;

    let after = server
        .client
        .post(server.url("/api/connect"))
        .bearer_auth(&access)
        .json(&json!({ "database_name": "salesdb" }))
        .send()
        .await?;
    assert_eq!(after.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn connect_to_unreachable_backend_is_bad_gateway() -> Result<()> {
    let server = TestServer::spawn().await?;
    let (access, _) = server.login_tokens("alice@ex.com", "correct-horse").await?;

    // salesdb's backend_addr points at a closed port, so driver
    // construction fails after policy passes.
    let response = server
        .client
        .post(server.url("/api/connect"))
        .bearer_auth(&access)
        .json(&json!({ "database_name": "salesdb" }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // Nothing was registered: disconnect finds no session.
    let disconnect = server
        .client
        .post(server.url("/api/disconnect"))
        .bearer_auth(&access)
        .json(&json!({ "database_name": "salesdb" }))
        .send()
        .await?;
    assert_eq!(disconnect.status(), StatusCode::NOT_FOUND);
    Ok(())
}
