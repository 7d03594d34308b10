mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use std::sync::Arc;

    use panel_fleet::error::ServiceError;
    use panel_fleet::inbound::{Client, Protocol};
    use panel_fleet::panel::PanelPool;
    use panel_fleet::reconcile::TrafficReconciliationService;
    use panel_fleet::store::{LedgerStore, StateStore, SubscriptionStore};
    use panel_fleet::tasks::sync_once;

    const ALICE: &str = "alice@example.com";

    fn service(pool: PanelPool, store: &Arc<StateStore>) -> TrafficReconciliationService {
        TrafficReconciliationService::new(Arc::new(pool), store.clone(), store.clone())
    }

    fn panel_with_alice(up: u64, down: u64) -> FakePanel {
        let mut held = inbound(42, Protocol::Vless);
        held.settings
            .clients
            .push(Client::new("uuid-a", format!("42-{}", ALICE)));
        held.client_stats.push(stat(42, &format!("42-{}", ALICE), up, down));
        held.client_stats.push(stat(42, "42-stranger@example.com", 7, 7));
        FakePanel::new("main").with_inbound(held)
    }

    #[tokio::test]
    async fn test_sync_records_usage_and_one_sample() {
        let store = Arc::new(StateStore::in_memory());
        store
            .save_subscription(&subscription("sub-1", ALICE, "main"))
            .await
            .unwrap();
        let pool = PanelPool::new().with("main", Arc::new(panel_with_alice(100, 200)));
        let service = service(pool, &store);

        let report = service.sync_one("main").await.unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.up, 100);
        assert_eq!(report.down, 200);

        let saved = store.subscription("sub-1").await.unwrap().unwrap();
        assert_eq!(saved.usage.up, 100);
        assert_eq!(saved.usage.down, 200);
        assert_eq!(saved.usage.total, 300);
        assert!(saved.last_traffic_sync.is_some());

        let samples = store.samples("sub-1").await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].inbound_id, 42);
        assert_eq!(samples[0].email, format!("42-{}", ALICE));
        assert_eq!(samples[0].total, 300);
    }

    #[tokio::test]
    async fn test_sync_resolves_by_owner_email_across_inbounds() {
        let mut first = inbound(1, Protocol::Vless);
        first.client_stats.push(stat(1, &format!("1-{}", ALICE), 10, 20));
        let mut second = inbound(2, Protocol::Vmess);
        second.client_stats.push(stat(2, &format!("2-{}", ALICE), 30, 40));
        let panel = FakePanel::new("main")
            .with_inbound(first)
            .with_inbound(second);

        let store = Arc::new(StateStore::in_memory());
        store
            .save_subscription(&subscription("sub-1", ALICE, "main"))
            .await
            .unwrap();
        let service = service(PanelPool::new().with("main", Arc::new(panel)), &store);

        let report = service.sync_one("main").await.unwrap();

        assert_eq!(report.matched, 2);
        let saved = store.subscription("sub-1").await.unwrap().unwrap();
        assert_eq!(saved.usage.up, 40);
        assert_eq!(saved.usage.down, 60);
        assert_eq!(saved.usage.total, 100);
        assert_eq!(store.samples("sub-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_matches_sanitized_owner_email() {
        let mut first = inbound(1, Protocol::Vless);
        first.client_stats.push(stat(1, "1-oneil@example.com", 10, 20));
        let mut second = inbound(2, Protocol::Vmess);
        second.client_stats.push(stat(2, "2-oneil@example.com", 30, 40));
        let panel = FakePanel::new("main")
            .with_inbound(first)
            .with_inbound(second);

        let store = Arc::new(StateStore::in_memory());
        let mut sub = subscription("sub-1", "o'neil@example.com", "main");
        sub.client_email = Some("1-oneil@example.com".to_string());
        store.save_subscription(&sub).await.unwrap();
        let service = service(PanelPool::new().with("main", Arc::new(panel)), &store);

        let report = service.sync_one("main").await.unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.skipped, 0);
        let saved = store.subscription("sub-1").await.unwrap().unwrap();
        assert_eq!(saved.usage.total, 100);
        assert_eq!(store.samples("sub-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_ignores_inactive_subscriptions() {
        let store = Arc::new(StateStore::in_memory());
        let mut sub = subscription("sub-1", ALICE, "main");
        sub.active = false;
        store.save_subscription(&sub).await.unwrap();
        let pool = PanelPool::new().with("main", Arc::new(panel_with_alice(100, 200)));
        let service = service(pool, &store);

        let report = service.sync_one("main").await.unwrap();

        assert_eq!(report.matched, 0);
        assert_eq!(report.skipped, 2);
        assert!(store.samples("sub-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_isolates_panel_failures() {
        let broken = FakePanel::new("broken");
        broken.fail_listing();
        let pool = PanelPool::new()
            .with("broken", Arc::new(broken))
            .with("main", Arc::new(panel_with_alice(100, 200)));
        let store = Arc::new(StateStore::in_memory());
        store
            .save_subscription(&subscription("sub-1", ALICE, "main"))
            .await
            .unwrap();
        let service = service(pool, &store);

        let results = service.sync_all().await.unwrap();

        assert_eq!(results.len(), 2);
        for (panel, result) in &results {
            match panel.as_str() {
                "broken" => assert!(matches!(result, Err(ServiceError::Panel(_)))),
                "main" => assert_eq!(result.as_ref().unwrap().matched, 1),
                other => panic!("unexpected panel {}", other),
            }
        }
        assert_eq!(store.samples("sub-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_unknown_panel() {
        let store = Arc::new(StateStore::in_memory());
        let service = service(PanelPool::new(), &store);

        let result = service.sync_one("nowhere").await;

        assert!(matches!(result, Err(ServiceError::UnknownPanel(_))));
    }

    #[tokio::test]
    async fn test_online_status() {
        let panel = Arc::new(panel_with_alice(0, 0));
        let store = Arc::new(StateStore::in_memory());
        let service = service(PanelPool::new().with("main", panel.clone()), &store);
        let sub = subscription("sub-1", ALICE, "main");

        let offline = service.online_status(&sub).await.unwrap();
        assert!(!offline.online);
        assert_eq!(offline.identities, 1);

        panel.set_online(&["42-alice@example.com", "42-stranger@example.com"]);
        let online = service.online_status(&sub).await.unwrap();
        assert!(online.online);
        assert_eq!(online.online_emails, vec!["42-alice@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_usage_report() {
        let store = Arc::new(StateStore::in_memory());
        let pool = PanelPool::new().with("main", Arc::new(panel_with_alice(1024, 2048)));
        let service = service(pool, &store);
        let sub = subscription("sub-1", ALICE, "main");

        let report = service.usage_report(&sub).await.unwrap();

        assert_eq!(report.inbounds.len(), 1);
        assert_eq!(report.inbounds[0].inbound_id, 42);
        assert_eq!(report.up, 1024);
        assert_eq!(report.down, 2048);
        assert_eq!(report.total, 3072);
    }

    #[tokio::test]
    async fn test_sync_once_fails_only_when_every_panel_fails() {
        let store = Arc::new(StateStore::in_memory());
        let broken = |name: &str| {
            let panel = FakePanel::new(name);
            panel.fail_listing();
            Arc::new(panel)
        };

        let all_broken = PanelPool::new()
            .with("a", broken("a"))
            .with("b", broken("b"));
        let result = sync_once(&service(all_broken, &store)).await;
        assert!(matches!(result, Err(ServiceError::AllPanelsFailed(2))));

        let one_healthy = PanelPool::new()
            .with("a", broken("a"))
            .with("main", Arc::new(panel_with_alice(1, 2)));
        assert!(sync_once(&service(one_healthy, &store)).await.is_ok());

        assert!(sync_once(&service(PanelPool::new(), &store)).await.is_ok());
    }
}
