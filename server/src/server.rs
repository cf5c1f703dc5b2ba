/// HTTP server factory and configuration.
/// Provides a reusable function to create and configure the HTTP server
/// for use in both the main binary and tests.
use crate::auth::SessionAuthenticator;
use crate::handlers::*;
use crate::router::Router;
use actix_web::{middleware, web, App, HttpServer};

/// Register every REST and WebSocket route
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // REST endpoints
        .route("/health", web::get().to(health))
        .route("/chat/{user}", web::get().to(get_direct_history))
        .route("/chat/{user}/clear", web::post().to(clear_direct_history))
        .route("/group", web::post().to(create_group))
        .route("/group", web::get().to(list_groups))
        .route("/group/{id}/add-member", web::post().to(add_member))
        .route("/group/{id}/remove-member", web::post().to(remove_member))
        .route("/group/{id}/exit", web::post().to(exit_group))
        .route("/group/{id}/messages", web::get().to(get_group_messages))
        .route("/group/{id}/clear", web::post().to(clear_group_history))
        .route("/group/{id}", web::delete().to(delete_group))
        // WebSocket endpoint
        .route("/ws", web::get().to(ws_connect));
}

/// Create a configured HTTP server
///
/// # Example
/// ```ignore
/// let router = web::Data::new(Router::new(registry, history, groups, codec, directory));
/// let authenticator = web::Data::new(SessionAuthenticator::new(Arc::new(verifier)));
/// let server = server::create_http_server(router, authenticator, config, "127.0.0.1:5000")?;
/// server.await?;
/// ```
pub fn create_http_server(
    router: web::Data<Router>,
    authenticator: web::Data<SessionAuthenticator>,
    server_config: web::Data<ServerConfig>,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(router.clone())
            .app_data(authenticator.clone())
            .app_data(server_config.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// Create a test HTTP server bound to a random available port
///
/// Returns the server together with the address it is listening on.
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_http_server(
    router: web::Data<Router>,
    authenticator: web::Data<SessionAuthenticator>,
) -> std::io::Result<(actix_web::dev::Server, String)> {
    let server_config = web::Data::new(ServerConfig::default());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(router.clone())
            .app_data(authenticator.clone())
            .app_data(server_config.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind("127.0.0.1:0")?;

    let addr = server
        .addrs()
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    Ok((server.run(), addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{OpenDirectory, TokenVerifier};
    use crate::db::models::HistoryEntry;
    use crate::router::SendRequest;
    use actix_web::test as actix_test;
    use serde_json::{json, Value};
    use std::sync::Arc;

    const SECRET: &str = "test-access-secret";

    fn test_state() -> (web::Data<Router>, web::Data<SessionAuthenticator>) {
        let verifier = TokenVerifier::new(SECRET).expect("Failed to build verifier");
        (
            web::Data::new(Router::in_memory([7u8; 32], Arc::new(OpenDirectory))),
            web::Data::new(SessionAuthenticator::new(Arc::new(verifier))),
        )
    }

    fn bearer(identity: &str) -> (&'static str, String) {
        let verifier = TokenVerifier::new(SECRET).expect("Failed to build verifier");
        let token = verifier
            .issue(identity, chrono::Duration::hours(1))
            .expect("Failed to issue token");
        ("Authorization", format!("Bearer {}", token))
    }

    macro_rules! app {
        ($router:expr, $authenticator:expr) => {
            actix_test::init_service(
                App::new()
                    .app_data($router.clone())
                    .app_data($authenticator.clone())
                    .app_data(web::Data::new(ServerConfig::default()))
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn direct(receiver: &str, message: &str) -> SendRequest {
        SendRequest {
            receiver: Some(receiver.to_string()),
            group_id: None,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_http_server_invalid_address() {
        let (router, authenticator) = test_state();
        let config = web::Data::new(ServerConfig::default());
        let result = create_http_server(router, authenticator, config, "invalid_address:99999");
        assert!(result.is_err(), "create_http_server should fail with invalid address");
    }

    #[tokio::test]
    async fn test_create_test_http_server() {
        let (router, authenticator) = test_state();
        let (_server, addr) =
            create_test_http_server(router, authenticator).expect("Server creation should succeed");
        assert!(addr.contains("127.0.0.1:"), "Address should contain 127.0.0.1:");
        let port_part = addr.split(':').nth(1).unwrap_or("");
        assert!(!port_part.is_empty(), "Port should be assigned");
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let (router, authenticator) = test_state();
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_endpoints_require_credentials() {
        let (router, authenticator) = test_state();
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::get().uri("/group").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let req = actix_test::TestRequest::get()
            .uri("/chat/bob")
            .insert_header(("Authorization", "Bearer not-a-token"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_direct_history_and_clear() {
        let (router, authenticator) = test_state();
        router.handle_send(Some("alice"), direct("bob", "hi")).await;
        router.handle_send(Some("bob"), direct("alice", "hey")).await;
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::get()
            .uri("/chat/bob")
            .insert_header(bearer("alice"))
            .to_request();
        let history: Vec<HistoryEntry> = actix_test::call_and_read_body_json(&app, req).await;
        let texts: Vec<&str> = history.iter().map(|h| h.message.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hey"]);

        let req = actix_test::TestRequest::post()
            .uri("/chat/bob/clear")
            .insert_header(bearer("alice"))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["modifiedCount"], 2);

        let req = actix_test::TestRequest::get()
            .uri("/chat/bob")
            .insert_header(bearer("alice"))
            .to_request();
        let history: Vec<HistoryEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert!(history.is_empty());

        let req = actix_test::TestRequest::get()
            .uri("/chat/alice")
            .insert_header(bearer("bob"))
            .to_request();
        let history: Vec<HistoryEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(history.len(), 2);
    }

    #[actix_web::test]
    async fn test_group_lifecycle() {
        let (router, authenticator) = test_state();
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::post()
            .uri("/group")
            .insert_header(bearer("alice"))
            .set_json(json!({ "name": "Team", "memberIds": ["bob"] }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let group: Value = actix_test::read_body_json(resp).await;
        let group_id = group["id"].as_str().expect("missing group id").to_string();

        // Non-member cannot add
        let req = actix_test::TestRequest::post()
            .uri(&format!("/group/{}/add-member", group_id))
            .insert_header(bearer("mallory"))
            .set_json(json!({ "userId": "mallory" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 403);

        // Already a member
        let req = actix_test::TestRequest::post()
            .uri(&format!("/group/{}/add-member", group_id))
            .insert_header(bearer("alice"))
            .set_json(json!({ "userId": "bob" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 409);

        let req = actix_test::TestRequest::post()
            .uri(&format!("/group/{}/add-member", group_id))
            .insert_header(bearer("bob"))
            .set_json(json!({ "userId": "carol" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 200);

        let req = actix_test::TestRequest::get()
            .uri("/group")
            .insert_header(bearer("carol"))
            .to_request();
        let groups: Vec<Value> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(groups.len(), 1);

        router
            .handle_send(
                Some("carol"),
                SendRequest {
                    receiver: None,
                    group_id: Some(group_id.clone()),
                    message: "hello team".to_string(),
                },
            )
            .await;

        let req = actix_test::TestRequest::get()
            .uri(&format!("/group/{}/messages", group_id))
            .insert_header(bearer("mallory"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 403);

        let req = actix_test::TestRequest::get()
            .uri(&format!("/group/{}/messages", group_id))
            .insert_header(bearer("alice"))
            .to_request();
        let history: Vec<HistoryEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender, "carol");

        let req = actix_test::TestRequest::post()
            .uri(&format!("/group/{}/exit", group_id))
            .insert_header(bearer("carol"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 200);

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/group/{}", group_id))
            .insert_header(bearer("alice"))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deletedMessages"], 1);

        let req = actix_test::TestRequest::get()
            .uri(&format!("/group/{}/messages", group_id))
            .insert_header(bearer("alice"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn test_clear_unknown_group_returns_404() {
        let (router, authenticator) = test_state();
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::post()
            .uri("/group/missing/clear")
            .insert_header(bearer("alice"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn test_create_group_requires_name() {
        let (router, authenticator) = test_state();
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::post()
            .uri("/group")
            .insert_header(bearer("alice"))
            .set_json(json!({ "name": "" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_only_members_delete_group() {
        let (router, authenticator) = test_state();
        let group = router
            .groups()
            .create("Team", "alice", &[])
            .await
            .expect("Failed to create group");
        let app = app!(router, authenticator);

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/group/{}", group.id))
            .insert_header(bearer("mallory"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 403);
        assert!(router.groups().get_group(&group.id).await.is_ok());

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/group/{}", group.id))
            .insert_header(bearer("alice"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 200);

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/group/{}", group.id))
            .insert_header(bearer("alice"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 404);
    }
}
