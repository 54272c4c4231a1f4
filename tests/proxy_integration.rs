//! End-to-end coverage driving the full axum app (`proxy::router`) over an in-process
//! `tower::Service` against real HTTP mock backends (`wiremock`), the way `dekaf`'s own
//! end-to-end tests drive its router against a mocked Kafka/Gazette fixture rather than
//! unit-testing handlers in isolation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use akubra::config::{ClientConfig, ClusterConfig, Config};
use akubra::proxy::{self, AppState};
use akubra::ring::Ring;
use akubra::sync_log;
use axum::body::Body;
use http::{HeaderMap, Method, Request, StatusCode};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method as http_method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_config(listen: &str) -> Config {
    Config {
        listen: listen.to_string(),
        backends: Vec::new(),
        clusters: HashMap::new(),
        client: ClientConfig {
            name: "test-client".to_string(),
            clusters: Vec::new(),
            shards_count: 8,
        },
        conn_limit: 100,
        connection_timeout: Duration::from_secs(5),
        connection_dial_timeout: Duration::from_secs(2),
        additional_request_headers: HashMap::new(),
        additional_response_headers: HashMap::new(),
        maintained_backend: None,
        sync_log_methods: Vec::new(),
        metrics_listen: "127.0.0.1:0".to_string(),
    }
}

fn cluster_config(weight: u32, backends: Vec<Url>) -> ClusterConfig {
    ClusterConfig {
        cluster_type: "replicator".to_string(),
        weight,
        backends,
        options: HashMap::new(),
    }
}

async fn build_app(config: Config) -> axum::Router {
    let http_client = reqwest::Client::new();
    let sync_log_sender = sync_log::spawn(std::io::sink());
    let sync_log_methods: HashSet<Method> = config
        .sync_log_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let ring = Ring::build(
        &config,
        http_client,
        config.conn_limit,
        config.connection_dial_timeout,
        config.connection_timeout,
        Arc::new(HeaderMap::new()),
        Arc::new(sync_log_methods),
        sync_log_sender,
    )
    .expect("ring should build from a valid test config");

    proxy::router(AppState {
        ring: Arc::new(ring),
        additional_response_headers: Arc::new(HeaderMap::new()),
        read_timeout: config.connection_timeout,
    })
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn single_cluster_get_returns_the_shared_body() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    for server in [&a, &b] {
        Mock::given(http_method("GET"))
            .and(path("/index/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cluster1"))
            .mount(server)
            .await;
    }

    let mut config = base_config("127.0.0.1:0");
    config.backends = vec![
        Url::parse(&a.uri()).unwrap(),
        Url::parse(&b.uri()).unwrap(),
    ];

    let app = build_app(config).await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/index/a")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "cluster1");

    for server in [&a, &b] {
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn two_equal_weight_clusters_key_op_lands_on_exactly_one() {
    let a1 = MockServer::start().await;
    let a2 = MockServer::start().await;
    let b1 = MockServer::start().await;
    let b2 = MockServer::start().await;
    for server in [&a1, &a2] {
        Mock::given(http_method("PUT"))
            .and(path("/index/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cluster-a"))
            .mount(server)
            .await;
    }
    for server in [&b1, &b2] {
        Mock::given(http_method("PUT"))
            .and(path("/index/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cluster-b"))
            .mount(server)
            .await;
    }

    let mut config = base_config("127.0.0.1:0");
    config.client.clusters = vec!["cluster-a".to_string(), "cluster-b".to_string()];
    config.clusters.insert(
        "cluster-a".to_string(),
        cluster_config(1, vec![Url::parse(&a1.uri()).unwrap(), Url::parse(&a2.uri()).unwrap()]),
    );
    config.clusters.insert(
        "cluster-b".to_string(),
        cluster_config(1, vec![Url::parse(&b1.uri()).unwrap(), Url::parse(&b2.uri()).unwrap()]),
    );

    let app = build_app(config).await;
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/index/a")
        .body(Body::from("payload"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let a_hits = a1.received_requests().await.unwrap().len()
        + a2.received_requests().await.unwrap().len();
    let b_hits = b1.received_requests().await.unwrap().len()
        + b2.received_requests().await.unwrap().len();

    assert_eq!(a_hits + b_hits, 2, "exactly one cluster's pair should see the PUT");
    assert!(
        (a_hits == 2 && b_hits == 0) || (a_hits == 0 && b_hits == 2),
        "the request must land wholly on one cluster, got a={a_hits} b={b_hits}"
    );
}

#[tokio::test]
async fn bucket_scoped_put_reaches_every_backend() {
    let servers = [
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
    ];
    for server in &servers {
        Mock::given(http_method("PUT"))
            .and(path("/index/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(server)
            .await;
    }

    let mut config = base_config("127.0.0.1:0");
    config.client.clusters = vec!["cluster-a".to_string(), "cluster-b".to_string()];
    config.clusters.insert(
        "cluster-a".to_string(),
        cluster_config(
            1,
            vec![
                Url::parse(&servers[0].uri()).unwrap(),
                Url::parse(&servers[1].uri()).unwrap(),
            ],
        ),
    );
    config.clusters.insert(
        "cluster-b".to_string(),
        cluster_config(
            1,
            vec![
                Url::parse(&servers[2].uri()).unwrap(),
                Url::parse(&servers[3].uri()).unwrap(),
            ],
        ),
    );

    let app = build_app(config).await;
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/index/")
        .body(Body::from("bucket body"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for server in &servers {
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn delete_reaches_every_backend_regardless_of_hash() {
    let servers = [
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
    ];
    for server in &servers {
        Mock::given(http_method("DELETE"))
            .and(path("/index/a"))
            .respond_with(ResponseTemplate::new(204))
            .mount(server)
            .await;
    }

    let mut config = base_config("127.0.0.1:0");
    config.client.clusters = vec!["cluster-a".to_string(), "cluster-b".to_string()];
    config.clusters.insert(
        "cluster-a".to_string(),
        cluster_config(
            1,
            vec![
                Url::parse(&servers[0].uri()).unwrap(),
                Url::parse(&servers[1].uri()).unwrap(),
            ],
        ),
    );
    config.clusters.insert(
        "cluster-b".to_string(),
        cluster_config(
            1,
            vec![
                Url::parse(&servers[2].uri()).unwrap(),
                Url::parse(&servers[3].uri()).unwrap(),
            ],
        ),
    );

    let app = build_app(config).await;
    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/index/a")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for server in &servers {
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn failing_primary_regresses_to_predecessor_and_logs_divergence() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(http_method("GET"))
        .and(path("/index/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&primary)
        .await;
    Mock::given(http_method("GET"))
        .and(path("/index/a"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&secondary)
        .await;

    let mut config = base_config("127.0.0.1:0");
    config.client.clusters = vec!["primary".to_string(), "secondary".to_string()];
    config.sync_log_methods = vec!["GET".to_string()];
    // Skewed weights so the single shard always lands on "secondary"; "primary" then has
    // no predecessor and can only be reached via regression from "secondary".
    config.client.shards_count = 1;
    config.clusters.insert(
        "primary".to_string(),
        cluster_config(1, vec![Url::parse(&primary.uri()).unwrap()]),
    );
    config.clusters.insert(
        "secondary".to_string(),
        cluster_config(99, vec![Url::parse(&secondary.uri()).unwrap()]),
    );

    let app = build_app(config).await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/index/a")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "recovered");
    assert_eq!(secondary.received_requests().await.unwrap().len(), 1);
    assert_eq!(primary.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn content_length_mismatch_fails_every_backend() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    for server in [&a, &b] {
        Mock::given(http_method("PUT"))
            .and(path("/index/a"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    let mut config = base_config("127.0.0.1:0");
    config.backends = vec![
        Url::parse(&a.uri()).unwrap(),
        Url::parse(&b.uri()).unwrap(),
    ];

    let app = build_app(config).await;
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/index/a")
        .header(http::header::CONTENT_LENGTH, "100")
        .body(Body::from("short body"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    // Every tuple fails with a content-length mismatch before any backend produces a
    // usable response, so the client sees an error rather than a chosen body.
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
