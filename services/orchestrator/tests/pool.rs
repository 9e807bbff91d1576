//! Integration tests for the pool lifecycle.
//!
//! These tests drive the reconciler and the reservation queue against an
//! in-memory config repository and the local engine:
//! 1. Repository content is swapped between passes
//! 2. Passes are triggered explicitly
//! 3. Engine and pool state are inspected after each step

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodeshare_id::{NodeName, PartyName};
use nodeshare_orchestrator::engine::LocalEngine;
use nodeshare_orchestrator::label::LabelExpr;
use nodeshare_orchestrator::pool::Pool;
use nodeshare_orchestrator::reconciler::{ReconcileError, Reconciler};
use nodeshare_orchestrator::repo::{FetchError, FileTree, MemoryFetcher, RepoFetcher};
use nodeshare_orchestrator::reservation::{ReservationQueue, ReservationState};
use nodeshare_proto::Party;
use nodeshare_reconcile::RemovalState;
use nodeshare_testing::{ConfigRepoFixture, DUMMY_ORCHESTRATOR_URL, DUMMY_REPO_URL};
use tokio::sync::Notify;

struct Harness {
    pool: Arc<Pool>,
    engine: Arc<LocalEngine>,
    fetcher: Arc<MemoryFetcher>,
    reconciler: Reconciler,
    queue: ReservationQueue,
}

impl Harness {
    fn new(fixture: ConfigRepoFixture) -> Self {
        Self::with_repo(Some(DUMMY_REPO_URL), fixture)
    }

    fn with_repo(repo: Option<&str>, fixture: ConfigRepoFixture) -> Self {
        let pool = Arc::new(Pool::new());
        let engine = Arc::new(LocalEngine::new());
        let fetcher = Arc::new(MemoryFetcher::new(fixture.into_files()));
        let reconciler = Reconciler::new(
            pool.clone(),
            engine.clone(),
            fetcher.clone(),
            repo.map(str::to_string),
        );
        Self {
            pool,
            engine,
            fetcher,
            reconciler,
            queue: ReservationQueue::new(),
        }
    }

    fn publish(&self, fixture: ConfigRepoFixture) {
        self.fetcher.set(fixture.into_files());
    }

    fn enqueue(&self, label: &str) -> nodeshare_id::ReservationId {
        self.queue
            .enqueue(jenkins1(), LabelExpr::parse(label).unwrap())
    }

    fn maintain(&self) {
        self.queue.maintain(&self.pool, self.engine.as_ref());
    }

    fn removal(&self, name: &str) -> Option<RemovalState> {
        self.pool
            .view()
            .inventory
            .get(&node(name))
            .map(|n| n.removal)
    }
}

fn node(name: &str) -> NodeName {
    NodeName::parse(name).unwrap()
}

fn jenkins1() -> Party {
    Party::new("https://jenkins1.acme.com", "jenkins1", None).unwrap()
}

fn bound_node(state: Option<ReservationState>) -> String {
    match state {
        Some(ReservationState::Bound { node }) => node.into_inner(),
        other => panic!("expected a bound reservation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_inactive_without_repository() {
    let harness = Harness::with_repo(None, ConfigRepoFixture::dummy());

    let err = harness.reconciler.run_once().await.unwrap_err();
    assert_eq!(err, ReconcileError::NotConfigured);

    assert!(!harness.pool.is_activated());
    assert!(harness.pool.config().is_none());
    assert!(harness
        .pool
        .error()
        .unwrap()
        .to_string()
        .starts_with("repository not configured"));
    assert_eq!(harness.engine.node_count(), 0);
}

#[tokio::test]
async fn test_read_config_from_repository() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    let config = harness.pool.config().unwrap();
    assert_eq!(config.orchestrator_url(), DUMMY_ORCHESTRATOR_URL);
    assert_eq!(
        config.config().get("orchestrator.url").map(String::as_str),
        Some(DUMMY_ORCHESTRATOR_URL)
    );

    let parties: Vec<_> = config.parties().values().cloned().collect();
    assert_eq!(
        parties,
        vec![
            Party::new("https://jenkins1.acme.com", "jenkins1", None).unwrap(),
            Party::new("https://jenkins2.acme.com", "jenkins2", None).unwrap(),
        ]
    );

    assert!(harness.pool.is_activated());
    assert!(harness.pool.error().is_none());
}

#[tokio::test]
async fn test_populate_nodes_and_keep_identity() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    assert_eq!(harness.engine.node_count(), 2);
    assert!(harness.engine.is_online(&node("win1.acme.com")));
    assert!(harness.engine.is_online(&node("solaris1.acme.com")));
    assert_eq!(
        harness.engine.definition(&node("win1.acme.com")).unwrap().labels,
        "windows w2k12"
    );

    let win1 = harness.engine.handle(&node("win1.acme.com")).unwrap();
    let solaris1 = harness.engine.handle(&node("solaris1.acme.com")).unwrap();

    // Unrelated repository change
    harness.publish(ConfigRepoFixture::dummy().with_file("fake_change", "bump"));
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.created + report.updated + report.removed, 0);

    harness.reconciler.run_once().await.unwrap();
    assert_eq!(harness.engine.handle(&node("win1.acme.com")).unwrap(), win1);
    assert_eq!(
        harness.engine.handle(&node("solaris1.acme.com")).unwrap(),
        solaris1
    );
}

#[tokio::test]
async fn test_update_and_rename_nodes() {
    let harness = Harness::new(ConfigRepoFixture::dummy().with_node("win2.acme.com", "windows w2k16"));
    harness.reconciler.run_once().await.unwrap();
    assert_eq!(harness.engine.node_count(), 3);

    let win1 = harness.engine.handle(&node("win1.acme.com")).unwrap();
    let solaris1 = harness.engine.handle(&node("solaris1.acme.com")).unwrap();

    harness.publish(
        ConfigRepoFixture::dummy()
            .with_node("win2.acme.com", "windows w2k16")
            .rename_node("win2.acme.com", "windows.acme.com")
            .with_node("solaris1.acme.com", "solaris12 sparc"),
    );
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.removed, 1);

    assert!(!harness.engine.is_online(&node("win2.acme.com")));
    assert!(harness.engine.is_online(&node("windows.acme.com")));
    assert_eq!(
        harness.engine.definition(&node("windows.acme.com")).unwrap().labels,
        "windows w2k16"
    );
    assert_eq!(
        harness.engine.definition(&node("solaris1.acme.com")).unwrap().labels,
        "solaris12 sparc"
    );

    // Untouched node keeps its identity, updated node is modified in place.
    assert_eq!(harness.engine.handle(&node("win1.acme.com")).unwrap(), win1);
    assert_eq!(
        harness.engine.handle(&node("solaris1.acme.com")).unwrap(),
        solaris1
    );

    let labels = harness.pool.view().inventory.served_labels();
    assert!(labels.contains(&"solaris12".to_string()));
    assert!(!labels.contains(&"solaris11".to_string()));
    assert!(labels.contains(&"windows.acme.com".to_string()));
    assert!(!labels.contains(&"win2.acme.com".to_string()));
}

#[tokio::test]
async fn test_workload_mapping() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    let solaris = harness.enqueue("solaris11");
    let windows = harness.enqueue("windows");
    let by_name = harness.enqueue("solaris1.acme.com");
    let unlabeled = harness.enqueue("");
    let unserved = harness.enqueue("aix");

    harness.maintain();

    assert_eq!(bound_node(harness.queue.state(solaris)), "solaris1.acme.com");
    assert_eq!(bound_node(harness.queue.state(windows)), "win1.acme.com");
    // The only matching node is busy.
    assert_eq!(harness.queue.state(by_name), Some(ReservationState::Pending));
    assert_eq!(harness.queue.state(unserved), Some(ReservationState::Pending));

    let event = harness.queue.complete(solaris, harness.engine.as_ref()).unwrap();
    assert_eq!(event.node.as_str(), "solaris1.acme.com");
    assert_eq!(event.owner, PartyName::parse("jenkins1").unwrap());
    assert!(matches!(
        harness.queue.state(solaris),
        Some(ReservationState::Completed { .. })
    ));

    harness.maintain();
    assert_eq!(bound_node(harness.queue.state(by_name)), "solaris1.acme.com");

    // Work without a label is never scheduled.
    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.maintain();
    assert_eq!(harness.queue.state(unlabeled), Some(ReservationState::Pending));
}

#[tokio::test]
async fn test_wait_until_idle_before_deleting() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    let id = harness.enqueue("solaris11");
    harness.maintain();
    assert_eq!(bound_node(harness.queue.state(id)), "solaris1.acme.com");

    harness.publish(ConfigRepoFixture::dummy().without_node("solaris1.acme.com"));
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.pending_removal, 1);
    assert_eq!(report.removed, 0);

    assert!(harness.engine.is_online(&node("solaris1.acme.com")));
    assert_eq!(
        harness.removal("solaris1.acme.com"),
        Some(RemovalState::PendingRemoval)
    );
    assert!(!harness
        .pool
        .view()
        .inventory
        .served_labels()
        .contains(&"solaris11".to_string()));

    // Still busy on the next pass.
    harness.reconciler.run_once().await.unwrap();
    assert!(harness.engine.is_online(&node("solaris1.acme.com")));

    // New demand is not placed on a node on its way out, even once idle.
    harness.queue.complete(id, harness.engine.as_ref()).unwrap();
    let late = harness.enqueue("solaris11");
    harness.maintain();
    assert_eq!(harness.queue.state(late), Some(ReservationState::Pending));

    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(!harness.engine.is_online(&node("solaris1.acme.com")));
    assert_eq!(harness.removal("solaris1.acme.com"), None);
}

#[tokio::test]
async fn test_pending_removal_cancelled_when_declared_again() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    let id = harness.enqueue("windows");
    harness.maintain();
    let win1 = harness.engine.handle(&node("win1.acme.com")).unwrap();

    harness.publish(ConfigRepoFixture::dummy().without_node("win1.acme.com"));
    harness.reconciler.run_once().await.unwrap();
    assert_eq!(
        harness.removal("win1.acme.com"),
        Some(RemovalState::PendingRemoval)
    );

    harness.publish(ConfigRepoFixture::dummy());
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.reactivated, 1);
    assert_eq!(harness.removal("win1.acme.com"), Some(RemovalState::Active));
    assert_eq!(harness.engine.handle(&node("win1.acme.com")).unwrap(), win1);

    harness.queue.complete(id, harness.engine.as_ref()).unwrap();
    harness.reconciler.run_once().await.unwrap();
    assert!(harness.engine.is_online(&node("win1.acme.com")));
}

#[tokio::test]
async fn test_busy_node_update_is_deferred() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    let id = harness.enqueue("solaris11");
    harness.maintain();

    harness.publish(ConfigRepoFixture::dummy().with_node("solaris1.acme.com", "solaris12 sparc"));
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(
        harness.engine.definition(&node("solaris1.acme.com")).unwrap().labels,
        "solaris11 sparc"
    );

    harness.queue.complete(id, harness.engine.as_ref()).unwrap();
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(
        harness.engine.definition(&node("solaris1.acme.com")).unwrap().labels,
        "solaris12 sparc"
    );
}

#[tokio::test]
async fn test_failed_removal_takes_node_out_of_service() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    harness.publish(ConfigRepoFixture::dummy().without_node("solaris1.acme.com"));
    harness.engine.set_failing(true);
    let err = harness.reconciler.run_once().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Apply { failed: 1, .. }));

    assert!(harness.engine.is_online(&node("solaris1.acme.com")));
    assert_eq!(
        harness.removal("solaris1.acme.com"),
        Some(RemovalState::PendingRemoval)
    );
    let id = harness.enqueue("solaris11");
    harness.maintain();
    assert_eq!(harness.queue.state(id), Some(ReservationState::Pending));

    harness.engine.set_failing(false);
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(!harness.engine.is_online(&node("solaris1.acme.com")));
}

#[tokio::test]
async fn test_reset_pool_adopts_engine_nodes() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();
    let win1 = harness.engine.handle(&node("win1.acme.com")).unwrap();
    let solaris1 = harness.engine.handle(&node("solaris1.acme.com")).unwrap();

    harness.pool.reset();
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.adopted, 2);
    assert_eq!(report.created, 0);
    assert!(harness.pool.is_activated());
    assert_eq!(harness.pool.view().inventory.len(), 2);
    assert_eq!(harness.engine.handle(&node("win1.acme.com")).unwrap(), win1);

    // A definition changed while the pool was blank is applied on adoption.
    harness.pool.reset();
    harness.publish(ConfigRepoFixture::dummy().with_node("solaris1.acme.com", "solaris12 sparc"));
    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.adopted, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(
        harness.engine.handle(&node("solaris1.acme.com")).unwrap(),
        solaris1
    );
    assert_eq!(
        harness
            .pool
            .view()
            .inventory
            .get(&node("solaris1.acme.com"))
            .unwrap()
            .definition
            .labels,
        "solaris12 sparc"
    );

    let report = harness.reconciler.run_once().await.unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.adopted, 0);
}

#[tokio::test]
async fn test_broken_config_keeps_last_good_snapshot() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();
    let before = harness.pool.view();

    harness.publish(
        ConfigRepoFixture::dummy()
            .with_config(&[("enforce", "true")])
            .with_node("new.acme.com", "linux"),
    );
    let err = harness.reconciler.run_once().await.unwrap_err();
    assert!(err.to_string().starts_with("no base URL specified"));
    assert!(harness
        .pool
        .error()
        .unwrap()
        .to_string()
        .starts_with("no base URL specified"));
    assert!(harness.pool.is_activated());
    assert_eq!(harness.pool.view().inventory, before.inventory);
    assert!(!harness.engine.is_online(&node("new.acme.com")));
    assert_eq!(
        harness.pool.config().unwrap().orchestrator_url(),
        DUMMY_ORCHESTRATOR_URL
    );

    harness.publish(ConfigRepoFixture::dummy().without("config"));
    let err = harness.reconciler.run_once().await.unwrap_err();
    assert!(err.to_string().starts_with("no config file found"));

    harness.publish(
        ConfigRepoFixture::dummy()
            .with_node("new.acme.com", "linux")
            .with_file("nodes/broken.acme.com.toml", "labels = [unterminated"),
    );
    assert!(harness.reconciler.run_once().await.is_err());
    assert!(!harness.engine.is_online(&node("new.acme.com")));

    // Fixing the repository clears the error.
    harness.publish(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();
    assert!(harness.pool.error().is_none());
}

#[tokio::test]
async fn test_unreachable_repository() {
    let harness = Harness::new(ConfigRepoFixture::dummy());
    harness.reconciler.run_once().await.unwrap();

    harness.fetcher.set_unreachable("connection refused");
    let err = harness.reconciler.run_once().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Fetch(_)));
    assert_eq!(harness.engine.node_count(), 2);
    assert!(harness.pool.config().is_some());
}

/// Fetcher that parks inside `fetch` until released.
struct GatedFetcher {
    entered: Notify,
    release: Notify,
    tree: FileTree,
}

#[async_trait]
impl RepoFetcher for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<FileTree, FetchError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.tree.clone())
    }
}

#[tokio::test]
async fn test_scheduled_pass_rejected_while_running() {
    let fetcher = Arc::new(GatedFetcher {
        entered: Notify::new(),
        release: Notify::new(),
        tree: FileTree::from(ConfigRepoFixture::dummy().into_files()),
    });
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(Pool::new()),
        Arc::new(LocalEngine::new()),
        fetcher.clone(),
        Some(DUMMY_REPO_URL.to_string()),
    ));

    let running = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.run_once().await }
    });
    fetcher.entered.notified().await;

    assert_eq!(
        reconciler.try_run().await.unwrap_err(),
        ReconcileError::InProgress
    );

    fetcher.release.notify_one();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.created, 2);
    // A rejected scheduled pass does not overwrite the pool error.
    assert!(reconciler.pool().error().is_none());
}
