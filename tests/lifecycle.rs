//! End-to-end pipeline test: a producer polls its source on a singleton
//! interval, a worker drains the queue, and the persist interval reconciles
//! terminal jobs back to the application.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use intervisor::{
    EventKind, InMemoryQueue, Job, JobQueue, JobsProducer, ProducerDriver, ProducerError,
    SchedulerContext, TokioRegistrar,
};

struct SyncProducer {
    source: Mutex<Vec<Value>>,
    persisted: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
}

impl SyncProducer {
    fn new(items: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(items),
            persisted: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl JobsProducer for SyncProducer {
    fn name(&self) -> &str {
        "Sync"
    }

    fn job_name(&self) -> &str {
        "sync-items"
    }

    async fn pending_items(&self) -> Result<Vec<Value>, ProducerError> {
        Ok(self.source.lock().unwrap().clone())
    }

    async fn mark_items_as_processing(&self, items: &[Value]) -> Result<(), ProducerError> {
        let claimed: Vec<Option<&str>> = items.iter().map(|i| i["_id"].as_str()).collect();
        self.source
            .lock()
            .unwrap()
            .retain(|item| !claimed.contains(&item["_id"].as_str()));
        Ok(())
    }

    async fn on_success(&self, jobs: Vec<Job>) -> Result<usize, ProducerError> {
        let count = jobs.len();
        self.persisted
            .lock()
            .unwrap()
            .extend(jobs.into_iter().map(|j| j.id));
        Ok(count)
    }

    async fn on_fail(&self, jobs: Vec<Job>) -> Result<usize, ProducerError> {
        let count = jobs.len();
        self.failed
            .lock()
            .unwrap()
            .extend(jobs.into_iter().map(|j| j.id));
        Ok(count)
    }

    fn forbid_duplicates(&self) -> bool {
        true
    }

    fn production_frequency(&self) -> Duration {
        Duration::from_millis(20)
    }

    fn persistence_frequency(&self) -> Duration {
        Duration::from_millis(30)
    }
}

async fn wait_until<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread")]
async fn produced_jobs_flow_through_worker_to_persistence() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let ctx = SchedulerContext::new();
    let registrar = Arc::new(TokioRegistrar::new());
    ctx.set_registrar(registrar.clone());
    let mut events = ctx.bus().subscribe();

    let queue = Arc::new(InMemoryQueue::new());
    queue.register_worker().await;

    let producer = SyncProducer::new(vec![
        json!({ "_id": "a", "payload": 1 }),
        json!({ "_id": "b", "payload": 2 }),
        json!({ "_id": "poison", "payload": 3 }),
    ]);
    let driver = ProducerDriver::new(
        &ctx,
        Arc::clone(&producer) as Arc<dyn JobsProducer>,
        Arc::clone(&queue) as Arc<dyn JobQueue>,
    );
    driver.spawn();

    // Worker: jobs with a "poison" id fail, everything else completes.
    let worker_queue = Arc::clone(&queue);
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let worker = tokio::spawn(async move {
        while !worker_stop.load(Ordering::Relaxed) {
            if let Some(job) = worker_queue.lease_next().await {
                if job.id == "poison" {
                    worker_queue.fail(&job.id, "poison item").await.unwrap();
                } else {
                    worker_queue.complete(&job.id).await.unwrap();
                }
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    });

    let done = wait_until(Duration::from_secs(5), || {
        producer.persisted.lock().unwrap().len() == 2
            && producer.failed.lock().unwrap().len() == 1
    })
    .await;
    stop.store(true, Ordering::Relaxed);
    registrar.shutdown();
    worker.await.unwrap();
    assert!(done, "pipeline did not reconcile all items in time");

    let mut persisted = producer.persisted.lock().unwrap().clone();
    persisted.sort();
    assert_eq!(persisted, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        producer.failed.lock().unwrap().as_slice(),
        &["poison".to_string()]
    );

    // Every item was claimed out of the source.
    assert!(producer.source.lock().unwrap().is_empty());

    // Both intervals announced themselves and did real work.
    let mut kinds_by_task = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => kinds_by_task.push((event.task.to_string(), event.kind)),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert!(kinds_by_task.contains(&("Sync.produce".to_string(), EventKind::Init)));
    assert!(kinds_by_task.contains(&("Sync.persist".to_string(), EventKind::Init)));
    assert!(kinds_by_task.contains(&("Sync.produce".to_string(), EventKind::Success)));
    assert!(kinds_by_task.contains(&("Sync.persist".to_string(), EventKind::Success)));
}
