use role_harvest::{RoleSource, SourceError, collect_summaries};
use role_harvest_iam::{IamRoleSource, IamRoleSourceConfig};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECOND_PAGE: &str = "CiJyb2xlcy9hY2Nlc3NhcHByb3ZhbC5jb25maWdFZGl0b3I";

fn config_for(server: &MockServer) -> IamRoleSourceConfig {
    IamRoleSourceConfig {
        api_base_url: Some(server.uri()),
        page_size: 2,
        ..Default::default()
    }
}

async fn mount_two_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(query_param_is_missing("pageToken"))
        .and(query_param("showDeleted", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("fixtures/list_page_1.json"),
            "application/json",
        ))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(query_param("pageToken", SECOND_PAGE))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("fixtures/list_page_2.json"),
            "application/json",
        ))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn list_follows_page_tokens_to_the_end() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let summaries = collect_summaries(&source).await.unwrap();

    let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "roles/accessapproval.approver",
            "roles/accessapproval.configEditor",
            "roles/viewer",
        ]
    );
}

#[tokio::test]
async fn single_page_returns_cursor_for_next() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("fixtures/list_page_1.json"),
            "application/json",
        ))
        .mount(&server)
        .await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let page = source.list_page(None).await.unwrap();

    assert_eq!(page.roles.len(), 2);
    assert_eq!(page.next_page_token.as_deref(), Some(SECOND_PAGE));
}

#[tokio::test]
async fn list_requests_deleted_roles_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(query_param("showDeleted", "true"))
        .and(query_param("pageSize", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"roles":[]}"#, "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = IamRoleSource::new(IamRoleSourceConfig {
        show_deleted: true,
        ..config_for(&server)
    })
    .unwrap();

    let summaries = collect_summaries(&source).await.unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn empty_response_body_means_no_roles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let summaries = collect_summaries(&source).await.unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn list_scoped_to_parent_for_custom_roles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/organizations/123/roles"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"roles":[{"name":"organizations/123/roles/auditor"}]}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let source = IamRoleSource::new(IamRoleSourceConfig {
        parent: Some("organizations/123".into()),
        ..config_for(&server)
    })
    .unwrap();

    let summaries = collect_summaries(&source).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name.as_str(), "organizations/123/roles/auditor");
}

#[tokio::test]
async fn list_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(header("Authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let source = IamRoleSource::new(IamRoleSourceConfig {
        token: Some("secret-token".into()),
        ..config_for(&server)
    })
    .unwrap();

    collect_summaries(&source).await.unwrap();
}

#[tokio::test]
async fn forbidden_listing_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .respond_with(ResponseTemplate::new(403).set_body_raw(
            include_str!("fixtures/error_forbidden.json"),
            "application/json",
        ))
        .mount(&server)
        .await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let result = collect_summaries(&source).await;

    match result {
        Err(SourceError::Auth(msg)) => assert!(msg.contains("iam.roles.list"), "got: {msg}"),
        other => panic!("expected Auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_on_second_page_aborts_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("fixtures/list_page_1.json"),
            "application/json",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .and(query_param("pageToken", SECOND_PAGE))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let result = collect_summaries(&source).await;

    assert!(matches!(result, Err(SourceError::Unavailable(_))));
}

#[tokio::test]
async fn malformed_page_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "application/json"))
        .mount(&server)
        .await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let result = source.list_page(None).await;

    assert!(matches!(result, Err(SourceError::Parse(_))));
}

#[tokio::test]
async fn nameless_listed_role_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/roles"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"roles":[{"title":"No name"}]}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let source = IamRoleSource::new(config_for(&server)).unwrap();
    let result = source.list_page(None).await;

    assert!(matches!(result, Err(SourceError::Parse(_))));
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    let source = IamRoleSource::new(IamRoleSourceConfig {
        api_base_url: Some("http://127.0.0.1:1".into()),
        ..Default::default()
    })
    .unwrap();

    let result = source.list_page(None).await;
    assert!(matches!(result, Err(SourceError::Unavailable(_))));
}
