//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Registry**: conflict handling, forced updates, bulk replacement and client caching.
//! - **Eviction**: unreachable peers disappear through the client's cleanup callback.
//! - **Join**: the bootstrap handshake, announcement fan-out and the one-shot state machine.
//! - **HTTP**: registration and unregistration endpoints.

#[cfg(test)]
mod tests {
    use crate::config::{ClientConfig, NodeConfig};
    use crate::context::NodeContext;
    use crate::error::ApiError;
    use crate::membership::types::{JoinState, Node, NodeInfo, is_valid_node_name};
    use crate::server;
    use crate::storage::memory::MemoryStorage;

    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_client() -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(500),
            attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        }
    }

    fn context(name: &str) -> NodeContext {
        let mut config = NodeConfig::new(name, "127.0.0.1:0".parse().unwrap());
        config.client = fast_client();
        NodeContext::new(config, Arc::new(MemoryStorage::new()))
    }

    async fn spawn_node(name: &str) -> (NodeContext, SocketAddr) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = NodeConfig::new(name, addr);
        config.client = fast_client();
        let ctx = NodeContext::new(config, Arc::new(MemoryStorage::new()));
        let app = server::router(&ctx);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (ctx, addr)
    }

    async fn dead_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    fn names(ctx: &NodeContext) -> Vec<String> {
        let mut names: Vec<String> = ctx
            .registry
            .get_all()
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        names.sort();
        names
    }

    // ============================================================
    // NODE NAMES
    // ============================================================

    #[test]
    fn test_node_name_validation() {
        assert!(is_valid_node_name("alpha"));
        assert!(is_valid_node_name("node-2.eu_west"));
        assert!(!is_valid_node_name(""));
        assert!(!is_valid_node_name("a#b"));
        assert!(!is_valid_node_name("with space"));
    }

    #[test]
    fn test_node_serializes_name_and_address_only() {
        let json = serde_json::to_value(Node::new("alpha", "a:1")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "alpha", "address": "a:1"}));
    }

    // ============================================================
    // REGISTRY
    // ============================================================

    #[test]
    fn test_add_conflicts_without_force() {
        let ctx = context("alpha");
        ctx.registry.add("beta", "b:1", false).unwrap();

        let err = ctx.registry.add("beta", "b:2", false).unwrap_err();
        assert_eq!(
            err,
            ApiError::Conflict("Node with same name already registered.".into())
        );
        assert_eq!(ctx.registry.get("beta").unwrap().address, "b:1");
    }

    #[test]
    fn test_add_with_force_updates_or_inserts() {
        let ctx = context("alpha");
        ctx.registry.add("beta", "b:1", false).unwrap();

        let updated = ctx.registry.add("beta", "b:2", true).unwrap();
        assert_eq!(updated.address, "b:2");

        let inserted = ctx.registry.add("gamma", "g:1", true).unwrap();
        assert_eq!(inserted.address, "g:1");
        assert_eq!(names(&ctx), vec!["beta", "gamma"]);
    }

    #[test]
    fn test_add_rejects_own_name_and_bad_input() {
        let ctx = context("alpha");

        assert!(matches!(
            ctx.registry.add("alpha", "a:1", true),
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            ctx.registry.add("bad#name", "x:1", false),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            ctx.registry.add("beta", " ", false),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_delete_reports_whether_anything_was_removed() {
        let ctx = context("alpha");
        ctx.registry.add("beta", "b:1", false).unwrap();

        assert!(ctx.registry.delete("beta").unwrap());
        assert!(!ctx.registry.delete("beta").unwrap());

        assert!(!ctx.registry.delete_all().unwrap());
        ctx.registry.add("beta", "b:1", false).unwrap();
        assert!(ctx.registry.delete_all().unwrap());
    }

    #[test]
    fn test_replace_all_skips_self_and_duplicates() {
        let ctx = context("alpha");
        ctx.registry.add("stale", "s:1", false).unwrap();

        ctx.registry
            .replace_all(&[
                NodeInfo::new("alpha", "a:1"),
                NodeInfo::new("beta", "b:1"),
                NodeInfo::new("beta", "b:2"),
                NodeInfo::new("gamma", "g:1"),
            ])
            .unwrap();

        assert_eq!(names(&ctx), vec!["beta", "gamma"]);
        assert_eq!(ctx.registry.get("beta").unwrap().address, "b:1");
    }

    #[test]
    fn test_snapshot_includes_this_node() {
        let ctx = context("alpha");
        ctx.registry.add("beta", "b:1", false).unwrap();

        let snapshot = ctx.registry.snapshot(&ctx.config.own_address).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&ctx.me()));
        assert!(snapshot.contains(&NodeInfo::new("beta", "b:1")));
    }

    #[test]
    fn test_client_cache_follows_address_changes() {
        let ctx = context("alpha");
        let node = ctx.registry.add("beta", "127.0.0.1:7001", false).unwrap();

        let first = ctx.registry.client_for(&node);
        let again = ctx.registry.client_by_name("beta").unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        ctx.registry.add("beta", "127.0.0.1:7002", true).unwrap();
        let moved = ctx.registry.client_by_name("beta").unwrap();
        assert!(!Arc::ptr_eq(&first, &moved));
        assert_eq!(moved.base_url(), "http://127.0.0.1:7002");
    }

    // ============================================================
    // EVICTION
    // ============================================================

    #[tokio::test]
    async fn test_unreachable_peer_is_evicted() {
        let ctx = context("alpha");
        ctx.registry.add("ghost", &dead_address().await, false).unwrap();

        let client = ctx.registry.client_by_name("ghost").unwrap();
        let err = client.get_tweet(1).await.unwrap_err();

        assert_eq!(err, ApiError::unreachable());
        assert!(ctx.registry.get("ghost").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_not_found_answer_does_not_evict() {
        let ctx = context("alpha");
        let (_beta, beta_addr) = spawn_node("beta").await;
        ctx.registry.add("beta", &beta_addr.to_string(), false).unwrap();

        let client = ctx.registry.client_by_name("beta").unwrap();
        assert!(client.get_tweet(77).await.unwrap_err().is_not_found());
        assert!(ctx.registry.get("beta").is_ok());
    }

    // ============================================================
    // JOIN
    // ============================================================

    #[tokio::test]
    async fn test_join_adopts_snapshot_and_announces() {
        let (alpha, alpha_addr) = spawn_node("alpha").await;
        let (gamma, gamma_addr) = spawn_node("gamma").await;
        alpha.registry.add("gamma", &gamma_addr.to_string(), false).unwrap();

        let (beta, _beta_addr) = spawn_node("beta").await;
        let peers = beta.join.join(&alpha_addr.to_string()).await.unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(beta.join.state().await, JoinState::Joined);
        assert_eq!(names(&beta), vec!["alpha", "gamma"]);
        assert_eq!(names(&alpha), vec!["beta", "gamma"]);
        // gamma only hears about beta through the announcement.
        assert_eq!(names(&gamma), vec!["beta"]);
    }

    #[tokio::test]
    async fn test_join_forces_over_stale_entry() {
        let (alpha, alpha_addr) = spawn_node("alpha").await;
        alpha.registry.add("beta", "stale:1", false).unwrap();

        let (beta, beta_addr) = spawn_node("beta").await;
        beta.join.join(&alpha_addr.to_string()).await.unwrap();

        assert_eq!(alpha.registry.get("beta").unwrap().address, beta_addr.to_string());
    }

    #[tokio::test]
    async fn test_join_happens_once() {
        let (_alpha, alpha_addr) = spawn_node("alpha").await;
        let beta = context("beta");

        beta.join.join(&alpha_addr.to_string()).await.unwrap();
        let err = beta.join.join(&alpha_addr.to_string()).await.unwrap_err();

        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_join_through_dead_peer_fails() {
        let beta = context("beta");
        beta.registry.add("old", "o:1", false).unwrap();

        let err = beta.join.join(&dead_address().await).await.unwrap_err();

        assert_eq!(err, ApiError::unreachable());
        assert_eq!(beta.join.state().await, JoinState::Isolated);
        // Local membership is untouched by a failed join.
        assert_eq!(names(&beta), vec!["old"]);
    }

    // ============================================================
    // SHUTDOWN
    // ============================================================

    #[tokio::test]
    async fn test_unregister_all_is_best_effort() {
        let (alpha, alpha_addr) = spawn_node("alpha").await;
        let (beta, beta_addr) = spawn_node("beta").await;
        alpha.registry.add("beta", &beta_addr.to_string(), false).unwrap();
        beta.registry.add("alpha", &alpha_addr.to_string(), false).unwrap();
        beta.registry.add("ghost", &dead_address().await, false).unwrap();

        beta.registry.unregister_all().await;

        assert!(alpha.registry.get("beta").unwrap_err().is_not_found());
    }

    // ============================================================
    // HTTP
    // ============================================================

    #[tokio::test]
    async fn test_http_register_and_unregister() {
        let (_alpha, addr) = spawn_node("alpha").await;
        let http = reqwest::Client::new();
        let registry_url = format!("http://{}/registry/", addr);

        let created = http
            .post(&registry_url)
            .json(&NodeInfo::new("beta", "b:1"))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let snapshot: Vec<NodeInfo> = created.json().await.unwrap();
        assert!(snapshot.contains(&NodeInfo::new("alpha", addr.to_string())));
        assert!(snapshot.contains(&NodeInfo::new("beta", "b:1")));

        let conflict = http
            .post(&registry_url)
            .json(&NodeInfo::new("beta", "b:2"))
            .send()
            .await
            .unwrap();
        assert_eq!(conflict.status(), 409);

        let forced = http
            .post(format!("{}?force=True", registry_url))
            .json(&NodeInfo::new("beta", "b:2"))
            .send()
            .await
            .unwrap();
        assert_eq!(forced.status(), 201);

        let listed: Vec<NodeInfo> = http
            .get(&registry_url)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed, vec![NodeInfo::new("beta", "b:2")]);

        let removed = http
            .delete(format!("{}beta", registry_url))
            .send()
            .await
            .unwrap();
        assert_eq!(removed.status(), 204);

        let unknown = http
            .delete(format!("{}beta", registry_url))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);
    }

    #[tokio::test]
    async fn test_http_join_endpoint() {
        let (alpha, alpha_addr) = spawn_node("alpha").await;
        let (beta, beta_addr) = spawn_node("beta").await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/registry/join_network", beta_addr))
            .json(&NodeInfo::new("alpha", alpha_addr.to_string()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(names(&beta), vec!["alpha"]);
        assert_eq!(names(&alpha), vec!["beta"]);
    }
}
