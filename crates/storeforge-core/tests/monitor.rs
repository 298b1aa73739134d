use std::sync::Arc;
use std::time::Duration;
use storeforge_core::{ReadinessMonitor, WorkloadNames};
use storeforge_runtime::{ClusterBackend, MockCluster, ReadinessScript};
use tokio::time::Instant;

fn monitor(cluster: &Arc<MockCluster>, interval_secs: u64) -> ReadinessMonitor {
    ReadinessMonitor::new(
        Arc::clone(cluster) as Arc<dyn ClusterBackend>,
        WorkloadNames::default(),
        Duration::from_secs(interval_secs),
    )
}

#[tokio::test(start_paused = true)]
async fn ready_on_kth_poll() {
    for k in 1..=4u32 {
        let cluster = Arc::new(MockCluster::with_readiness(ReadinessScript::HealthyAfter(k)));
        cluster.insert_namespace("store-k");
        let start = Instant::now();
        assert!(
            monitor(&cluster, 5)
                .wait_for_ready("store-k", Duration::from_secs(60))
                .await
        );
        assert_eq!(start.elapsed(), Duration::from_secs(5 * u64::from(k - 1)));
        assert_eq!(cluster.call_count("namespace_exists"), k as usize);
    }
}

#[tokio::test(start_paused = true)]
async fn never_ready_returns_false_at_deadline() {
    let cluster = Arc::new(MockCluster::with_readiness(ReadinessScript::Never));
    cluster.insert_namespace("store-n");
    let start = Instant::now();
    assert!(
        !monitor(&cluster, 5)
            .wait_for_ready("store-n", Duration::from_secs(30))
            .await
    );
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert_eq!(cluster.call_count("namespace_exists"), 6);
}

#[tokio::test(start_paused = true)]
async fn deadline_not_multiple_of_interval_rounds_up() {
    let cluster = Arc::new(MockCluster::with_readiness(ReadinessScript::Never));
    cluster.insert_namespace("store-r");
    let start = Instant::now();
    assert!(
        !monitor(&cluster, 5)
            .wait_for_ready("store-r", Duration::from_secs(12))
            .await
    );
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    assert_eq!(cluster.call_count("namespace_exists"), 3);
}

#[tokio::test(start_paused = true)]
async fn check_errors_count_as_not_ready() {
    let cluster = Arc::new(MockCluster::new());
    cluster.insert_namespace("store-e");
    cluster.fail_list_pods(Some("apiserver overloaded"));
    let m = monitor(&cluster, 5);

    assert!(!m.wait_for_ready("store-e", Duration::from_secs(10)).await);
    assert_eq!(cluster.call_count("list_pods"), 2);

    cluster.fail_list_pods(None);
    assert!(m.wait_for_ready("store-e", Duration::from_secs(10)).await);
}

#[tokio::test(start_paused = true)]
async fn namespace_appearing_late_is_picked_up() {
    let cluster = Arc::new(MockCluster::new());
    let m = monitor(&cluster, 5);
    let waiter = {
        let cluster = Arc::clone(&cluster);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            cluster.insert_namespace("store-l");
        })
    };
    let start = Instant::now();
    assert!(m.wait_for_ready("store-l", Duration::from_secs(60)).await);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    waiter.await.unwrap();
}
