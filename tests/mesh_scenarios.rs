//! End-to-end mesh scenarios.
//!
//! Every node is a real server on an ephemeral port and all interaction goes over HTTP,
//! the same way separately deployed nodes talk to each other.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tweet_mesh::config::{ClientConfig, NodeConfig};
use tweet_mesh::context::NodeContext;
use tweet_mesh::search::types::SearchPageBody;
use tweet_mesh::server;
use tweet_mesh::storage::memory::MemoryStorage;
use tweet_mesh::tweets::types::Tweet;

struct TestNode {
    ctx: NodeContext,
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestNode {
    async fn start(name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = NodeConfig::new(name, addr);
        config.client = ClientConfig {
            timeout: Duration::from_millis(500),
            attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        };
        let ctx = NodeContext::new(config, Arc::new(MemoryStorage::new()));

        let (stop, stopped) = oneshot::channel::<()>();
        let serving = ctx.clone();
        let handle = tokio::spawn(async move {
            server::serve(serving, listener, async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
        });

        Self {
            ctx,
            addr,
            stop: Some(stop),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Graceful stop: the node unregisters itself from its peers on the way out.
    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap();
    }

    /// Hard stop: the node vanishes without telling anyone.
    fn kill(self) {
        self.handle.abort();
    }
}

async fn register(http: &reqwest::Client, on: &TestNode, who: &TestNode, force: bool) -> reqwest::Response {
    http.post(on.url("/registry/"))
        .query(&[("force", force.to_string())])
        .json(&json!({"name": who.ctx.config.own_name, "address": who.addr.to_string()}))
        .send()
        .await
        .unwrap()
}

async fn create_tweet(http: &reqwest::Client, on: &TestNode, content: &str) -> Tweet {
    let response = http
        .post(on.url("/tweets/"))
        .json(&json!({"tweet": content}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

async fn retweet(http: &reqwest::Client, on: &TestNode, server: &str, id: u64) -> Tweet {
    let response = http
        .post(on.url("/tweets/retweet"))
        .json(&json!({"server": server, "id": id}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

#[tokio::test]
async fn registration_conflicts_without_force() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;

    let first = register(&http, &a, &b, false).await;
    assert_eq!(first.status(), 201);
    let members: Vec<Value> = first.json().await.unwrap();
    let names: Vec<&str> = members.iter().filter_map(|m| m["name"].as_str()).collect();
    assert!(names.contains(&"a"));
    assert!(names.contains(&"b"));

    let second = register(&http, &a, &b, false).await;
    assert_eq!(second.status(), 409);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["code"], 409);

    let forced = register(&http, &a, &b, true).await;
    assert_eq!(forced.status(), 201);
}

#[tokio::test]
async fn cross_node_retweet_shows_up_in_mesh_search() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;
    register(&http, &a, &b, false).await;
    register(&http, &b, &a, false).await;

    let original = create_tweet(&http, &a, "hello").await;
    let shared = retweet(&http, &b, "a", original.id).await;
    assert_eq!(shared.content, "hello");

    let found: Vec<Tweet> = http
        .get(b.url("/tweets/search"))
        .query(&[("all", "true"), ("retweet", "true")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert!(found[0].is_retweet());
    assert_eq!(found[0].content, "hello");
    assert_eq!(found[0].reference.as_ref().map(|r| r.to_string()), Some(format!("a#{}", original.id)));
}

#[tokio::test]
async fn unreachable_peer_is_left_out_of_mesh_search() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;
    let c = TestNode::start("c").await;
    for peer in [&b, &c] {
        register(&http, &a, peer, false).await;
    }

    create_tweet(&http, &a, "from a").await;
    create_tweet(&http, &c, "from c").await;
    create_tweet(&http, &b, "from b").await;
    b.kill();

    let response = http.get(a.url("/search")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let page: SearchPageBody = response.json().await.unwrap();
    let contents: Vec<&str> = page.items.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["from a", "from c"]);
    assert_eq!(page.last_creation_time, "0");

    // With no matching tweet anywhere the mesh answers NotFound, not BadGateway.
    let empty = http
        .get(a.url("/search"))
        .query(&[("content", "nobody wrote this")])
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 404);
}

#[tokio::test]
async fn three_hop_chain_resolves_to_the_original() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;
    let c = TestNode::start("c").await;
    register(&http, &b, &a, false).await;
    register(&http, &c, &a, false).await;
    register(&http, &c, &b, false).await;

    let original = create_tweet(&http, &a, "root of the chain").await;
    let on_b = retweet(&http, &b, "a", original.id).await;
    let on_c = retweet(&http, &c, "b", on_b.id).await;

    let fetched: Tweet = http
        .get(c.url(&format!("/tweets/{}", on_c.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.content, "root of the chain");

    // The stored form on B still points one hop back.
    let stored: Tweet = http
        .get(b.url(&format!("/tweets/{}", on_b.id)))
        .query(&[("resolve", "false")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored.content, "");
    assert_eq!(stored.reference.map(|r| r.tweet_id), Some(original.id));
}

#[tokio::test]
async fn chain_resolves_when_the_reader_never_met_the_origin() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;
    let c = TestNode::start("c").await;
    // Each node only knows the one before it.
    register(&http, &b, &a, false).await;
    register(&http, &c, &b, false).await;

    let original = create_tweet(&http, &a, "hello").await;
    let on_b = retweet(&http, &b, "a", original.id).await;
    assert_eq!(on_b.content, "hello");
    let on_c = retweet(&http, &c, "b", on_b.id).await;
    assert_eq!(on_c.content, "hello");

    let fetched: Tweet = http
        .get(c.url(&format!("/tweets/{}", on_c.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.content, "hello");

    let known: Vec<Value> = http
        .get(c.url("/registry/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0]["name"], "b");
}

#[tokio::test]
async fn dangling_retweet_reads_as_empty_content() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;
    register(&http, &b, &a, false).await;

    let original = create_tweet(&http, &a, "short lived").await;
    let on_b = retweet(&http, &b, "a", original.id).await;
    a.ctx.tweets.delete(original.id).unwrap();

    let listed: Vec<Tweet> = http
        .get(b.url("/tweets/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, on_b.id);
    assert_eq!(listed[0].content, "");
}

#[tokio::test]
async fn join_then_graceful_shutdown_leaves_the_mesh() {
    let http = reqwest::Client::new();
    let a = TestNode::start("a").await;
    let b = TestNode::start("b").await;

    let joined = http
        .post(b.url("/registry/join_network"))
        .json(&json!({"name": "a", "address": a.addr.to_string()}))
        .send()
        .await
        .unwrap();
    assert_eq!(joined.status(), 200);

    let members: Vec<Value> = http
        .get(a.url("/registry/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["name"], "b");

    b.shutdown().await;

    let members: Vec<Value> = http
        .get(a.url("/registry/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(members.is_empty());
}
