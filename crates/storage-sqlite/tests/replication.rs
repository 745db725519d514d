//! Core services running against a real SQLite database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tandem_core::context::{WorkspaceContext, WorkspaceRole};
use tandem_core::events::InMemoryEventBus;
use tandem_core::interactions::{InteractionAttribute, InteractionService};
use tandem_core::jobs::{
    Job, JobHandler, JobHandlerRegistry, JobInput, JobOptions, JobOutput, JobService,
    JobServiceConfig, JobStatus, JobType,
};
use tandem_core::mutations::MutationRepositoryTrait;
use tandem_core::nodes::{CreateNodeInput, InitialTransfer, NodeAttributes, NodeService};
use tandem_core::transfers::{Download, DownloadType, TransferRepositoryTrait};
use tandem_core::Result;
use tandem_storage_sqlite::{
    open, InteractionRepository, JobRepository, MutationRepository, NodeRepository,
    TransferRepository,
};

fn attrs(value: Value) -> NodeAttributes {
    value.as_object().cloned().expect("object")
}

struct Replica {
    _dir: tempfile::TempDir,
    nodes: Arc<NodeRepository>,
    mutations: Arc<MutationRepository>,
    interactions: Arc<InteractionRepository>,
    jobs: Arc<JobRepository>,
    transfers: Arc<TransferRepository>,
    bus: Arc<InMemoryEventBus>,
}

impl Replica {
    fn open() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let (pool, writer) = open(dir.path().to_str().expect("utf8")).expect("open");
        Self {
            nodes: Arc::new(NodeRepository::new(pool.clone(), writer.clone())),
            mutations: Arc::new(MutationRepository::new(pool.clone(), writer.clone())),
            interactions: Arc::new(InteractionRepository::new(pool.clone(), writer.clone())),
            jobs: Arc::new(JobRepository::new(pool.clone(), writer.clone())),
            transfers: Arc::new(TransferRepository::new(pool, writer)),
            bus: Arc::new(InMemoryEventBus::new()),
            _dir: dir,
        }
    }

    fn context(&self, user: &str) -> WorkspaceContext {
        WorkspaceContext::new("a1", "w1", user, WorkspaceRole::Collaborator)
    }

    fn node_service(&self, user: &str) -> NodeService {
        NodeService::new(self.context(user), self.nodes.clone(), self.bus.clone())
    }

    fn interaction_service(&self, user: &str) -> InteractionService {
        InteractionService::new(
            self.context(user),
            self.interactions.clone(),
            self.nodes.clone(),
            self.bus.clone(),
        )
    }

    async fn seed_page(&self) {
        let alice = self.node_service("alice");
        alice
            .create_node(
                CreateNodeInput::new(
                    None,
                    attrs(json!({
                        "type": "space",
                        "name": "Team",
                        "collaborators": { "alice": "admin" }
                    })),
                )
                .with_id("space"),
            )
            .await
            .expect("space");
        alice
            .create_node(
                CreateNodeInput::new(
                    Some("space".to_string()),
                    attrs(json!({ "type": "page", "name": "Notes" })),
                )
                .with_id("page"),
            )
            .await
            .expect("page");
    }
}

#[tokio::test]
async fn concurrent_updates_each_land_once_with_their_own_change_record() {
    let replica = Arc::new(Replica::open());
    replica.seed_page().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let replica = Arc::clone(&replica);
        tasks.push(tokio::spawn(async move {
            let service = replica.node_service("alice");
            service
                .update_node("page", move |mut attributes| {
                    attributes.insert("name".to_string(), json!(format!("Notes {}", i)));
                    Ok(attributes)
                })
                .await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("update");
    }

    let page = replica
        .node_service("alice")
        .get_node("page")
        .expect("read")
        .expect("page");
    assert_eq!(page.local_revision, 9);
    assert_eq!(replica.mutations.count_mutations_for_node("page").expect("count"), 9);
}

#[tokio::test]
async fn rejected_writes_leave_no_change_record() {
    let replica = Replica::open();
    replica.seed_page().await;
    let before = replica
        .mutations
        .list_pending_mutations("w1", 100)
        .expect("pending")
        .len();

    // Not a collaborator of the space.
    let mallory = replica.node_service("mallory");
    let denied = mallory
        .create_node(CreateNodeInput::new(
            Some("space".to_string()),
            attrs(json!({ "type": "page", "name": "Intruder" })),
        ))
        .await;
    assert!(denied.is_err());

    let after = replica
        .mutations
        .list_pending_mutations("w1", 100)
        .expect("pending");
    assert_eq!(after.len(), before);

    replica
        .node_service("alice")
        .delete_node("page")
        .await
        .expect("delete");
    assert!(replica.node_service("alice").get_node("page").expect("read").is_none());
    assert_eq!(
        replica.mutations.list_pending_mutations("w1", 100).expect("pending").len(),
        before + 1
    );
}

#[tokio::test]
async fn failed_side_rows_roll_back_the_node_and_its_change_record() {
    let replica = Replica::open();
    replica.seed_page().await;
    let before = replica
        .mutations
        .list_pending_mutations("w1", 100)
        .expect("pending")
        .len();

    // A stale download row already owns the id the new file will use.
    replica
        .transfers
        .create_download(Download::new(
            "photo",
            "w1",
            "/tmp/photo.png",
            DownloadType::Manual,
            "2026-01-01T00:00:00.000Z".to_string(),
        ))
        .await
        .expect("download");

    let result = replica
        .node_service("alice")
        .create_node(
            CreateNodeInput::new(
                Some("space".to_string()),
                attrs(json!({
                    "type": "file",
                    "name": "photo.png",
                    "mimeType": "image/png",
                    "extension": ".png",
                    "size": 3
                })),
            )
            .with_id("photo")
            .with_transfer(InitialTransfer::Download {
                path: "/tmp/other.png".to_string(),
            }),
        )
        .await;
    assert!(result.is_err());

    assert!(replica.node_service("alice").get_node("photo").expect("read").is_none());
    assert_eq!(replica.mutations.count_mutations_for_node("photo").expect("count"), 0);
    assert_eq!(
        replica.mutations.list_pending_mutations("w1", 100).expect("pending").len(),
        before
    );
}

#[tokio::test]
async fn interaction_attributes_never_regress() {
    let replica = Replica::open();
    replica.seed_page().await;
    let service = replica.interaction_service("alice");
    let last = InteractionAttribute::LastSeenAt;

    service
        .set_interaction("page", last, "2026-03-01T10:00:00.000Z".to_string())
        .await
        .expect("seen");
    let current = service
        .set_interaction("page", last, "2026-03-01T09:00:00.000Z".to_string())
        .await
        .expect("older");

    assert_eq!(current.attributes.get(last), Some("2026-03-01T10:00:00.000Z"));
    assert_eq!(current.version, 1);
    let stored = service.get_interaction("page").expect("read").expect("row");
    assert_eq!(stored, current);
}

struct CountingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, _job: &Job) -> Result<JobOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(JobOutput::Success)
    }
}

fn job_service(replica: &Replica, handler: Arc<CountingHandler>) -> Arc<JobService> {
    let registry = JobHandlerRegistry::new().with(JobType::ServerSync, handler);
    JobService::new(
        replica.jobs.clone(),
        registry,
        JobServiceConfig {
            max_concurrency: 4,
            max_idle: Duration::from_millis(100),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(100),
        },
    )
}

fn server_sync(server: &str) -> JobInput {
    JobInput::ServerSync {
        server: server.to_string(),
    }
}

#[tokio::test]
async fn deduplicated_jobs_share_one_row() {
    let replica = Replica::open();
    let jobs = job_service(
        &replica,
        Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        }),
    );

    let first = jobs
        .add_job(
            server_sync("a.example"),
            JobOptions::deduplicate("server", false).with_delay(Duration::from_secs(60)),
        )
        .await
        .expect("first");
    let kept = jobs
        .add_job(
            server_sync("b.example"),
            JobOptions::deduplicate("server", false).with_delay(Duration::from_secs(60)),
        )
        .await
        .expect("kept");
    assert_eq!(kept.id, first.id);
    assert_eq!(jobs.list_jobs().expect("list")[0].input, server_sync("a.example"));

    let replaced = jobs
        .add_job(
            server_sync("c.example"),
            JobOptions::deduplicate("server", true).with_delay(Duration::from_secs(5)),
        )
        .await
        .expect("replaced");
    assert_eq!(replaced.id, first.id);
    let all = jobs.list_jobs().expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].input, server_sync("c.example"));
    assert!(all[0].scheduled_at < first.scheduled_at);
    assert_eq!(all[0].status, JobStatus::Waiting);
}

#[tokio::test]
async fn due_jobs_run_and_leave_the_table() {
    let replica = Replica::open();
    let handler = Arc::new(CountingHandler {
        calls: AtomicUsize::new(0),
    });
    let jobs = job_service(&replica, handler.clone());
    jobs.init().await.expect("init");

    jobs.add_job(server_sync("a.example"), JobOptions::default())
        .await
        .expect("enqueue");

    for _ in 0..300 {
        if handler.calls.load(Ordering::SeqCst) == 1 && jobs.list_jobs().expect("list").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert!(jobs.list_jobs().expect("list").is_empty());
    jobs.close().await;
}
