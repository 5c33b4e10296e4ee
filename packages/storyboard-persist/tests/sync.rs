//! End-to-end behavior of the scene patch queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use storyboard_persist::sync::{
    merge_patch, EpisodeSceneUpdater, FlushReport, Patch, SceneUpdater, DEFAULT_DEBOUNCE,
};
use storyboard_persist::{
    EpisodeScenePatchQueue, Error, KdfParams, PersistConfig, PersistCore, Result, ScenePatchQueue,
};
use tokio::sync::{Notify, Semaphore};

/// Records scene updates; can fail and can hold calls until released
#[derive(Default)]
struct FakeBackend {
    calls: Mutex<Vec<(String, Value)>>,
    failing: Mutex<bool>,
    gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    async fn record(&self, id: String, patch: &Patch) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.calls.lock().push((id, Value::Object(patch.clone())));
        if *self.failing.lock() {
            return Err(Error::Remote("HTTP 502".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SceneUpdater for FakeBackend {
    async fn update_scene(&self, project_id: &str, scene_id: &str, patch: &Patch) -> Result<()> {
        self.record(format!("{project_id}/{scene_id}"), patch).await
    }
}

#[async_trait]
impl EpisodeSceneUpdater for FakeBackend {
    async fn update_episode_scene(
        &self,
        project_id: &str,
        episode_id: &str,
        scene_id: &str,
        patch: &Patch,
    ) -> Result<()> {
        self.record(format!("{project_id}/{episode_id}/{scene_id}"), patch)
            .await
    }
}

fn patch(value: Value) -> Patch {
    match value {
        Value::Object(map) => map,
        _ => panic!("patch must be an object"),
    }
}

#[tokio::test(start_paused = true)]
async fn two_edits_in_one_window_make_one_call() {
    let backend = Arc::new(FakeBackend::default());
    let queue = ScenePatchQueue::new(backend.clone(), DEFAULT_DEBOUNCE);

    queue.enqueue("p", "s", patch(json!({ "a": 1 })));
    tokio::time::sleep(Duration::from_millis(300)).await;
    queue.enqueue("p", "s", patch(json!({ "b": 2 })));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.calls(), vec![("p/s".to_string(), json!({ "a": 1, "b": 2 }))]);
}

#[tokio::test(start_paused = true)]
async fn context_summary_merges_across_edits() {
    let backend = Arc::new(FakeBackend::default());
    let queue = EpisodeScenePatchQueue::new(backend.clone(), DEFAULT_DEBOUNCE);

    queue.enqueue("p", "e", "s", patch(json!({ "contextSummary": { "x": 1 } })));
    queue.enqueue("p", "e", "s", patch(json!({ "contextSummary": { "y": 2 } })));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        backend.calls(),
        vec![(
            "p/e/s".to_string(),
            json!({ "contextSummary": { "x": 1, "y": 2 } })
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_patch_yields_to_newer_edit() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(FakeBackend::gated(gate.clone()));
    backend.set_failing(true);
    let queue = ScenePatchQueue::new(backend.clone(), DEFAULT_DEBOUNCE);

    queue.enqueue("p", "s", patch(json!({ "a": 1 })));
    let in_flight = tokio::spawn({
        let queue = queue.clone();
        async move { queue.flush_now().await }
    });
    tokio::task::yield_now().await;

    queue.enqueue("p", "s", patch(json!({ "a": 2 })));
    gate.notify_one();
    assert_eq!(in_flight.await.unwrap().requeued, 1);

    backend.set_failing(false);
    gate.notify_one();
    let report = queue.flush_now().await;
    assert_eq!(report, FlushReport { attempted: 1, succeeded: 1, requeued: 0 });

    let calls = backend.calls();
    assert_eq!(calls.last(), Some(&("p/s".to_string(), json!({ "a": 2 }))));
}

#[tokio::test(start_paused = true)]
async fn queues_built_from_core_use_configured_debounce() {
    let core = PersistCore::open(PersistConfig {
        sync_debounce_ms: 50,
        kdf: KdfParams::fast(),
        ..Default::default()
    })
    .unwrap();
    let backend = Arc::new(FakeBackend::default());
    let queue = core.scene_queue(backend.clone());

    queue.enqueue("p", "s", patch(json!({ "title": "t" })));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.calls().len(), 1);
    assert_eq!(queue.pending_len(), 0);
}

#[test]
fn page_hide_flush_without_timer() {
    let backend = Arc::new(FakeBackend::default());
    let queue = EpisodeScenePatchQueue::new(backend.clone(), DEFAULT_DEBOUNCE);

    let report = tokio_test::block_on(async {
        queue.enqueue("p", "e", "s", patch(json!({ "notes": "n" })));
        queue.flush_now().await
    });

    assert_eq!(report.succeeded, 1);
    assert_eq!(queue.pending_len(), 0);
    assert_eq!(backend.calls().len(), 1);
}

// ============================================================================
// RANDOM INTERLEAVINGS
// ============================================================================

const SCENES: [&str; 3] = ["s1", "s2", "s3"];

#[derive(Debug, Clone, Copy, Default)]
enum Failures {
    #[default]
    Never,
    Always,
    EveryOther,
}

/// Scene state as the server sees it after every successful update
#[derive(Default)]
struct RemoteScenes {
    state: Mutex<HashMap<String, Patch>>,
    failures: Mutex<Failures>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

#[async_trait]
impl SceneUpdater for RemoteScenes {
    async fn update_scene(&self, project_id: &str, scene_id: &str, patch: &Patch) -> Result<()> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| Error::Remote(e.to_string()))?;
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = match *self.failures.lock() {
            Failures::Never => false,
            Failures::Always => true,
            Failures::EveryOther => call % 2 == 0,
        };
        if fail {
            return Err(Error::Remote("HTTP 503".into()));
        }

        let mut state = self.state.lock();
        merge_patch(
            state.entry(format!("{project_id}/{scene_id}")).or_default(),
            patch.clone(),
        );
        Ok(())
    }
}

fn random_failures(rng: &mut StdRng) -> Failures {
    match rng.gen_range(0..3) {
        0 => Failures::Never,
        1 => Failures::Always,
        _ => Failures::EveryOther,
    }
}

fn random_patch(rng: &mut StdRng, step: usize) -> Patch {
    let mut patch = Patch::new();
    patch.insert("rev".into(), json!(step));
    for field in ["title", "notes", "shot"] {
        if rng.gen_bool(0.4) {
            patch.insert(field.into(), json!(format!("{field}-{step}")));
        }
    }
    if rng.gen_bool(0.5) {
        let mut summary = Patch::new();
        for field in ["mood", "beat", "cast"] {
            if rng.gen_bool(0.5) {
                summary.insert(field.into(), json!(step));
            }
        }
        patch.insert("contextSummary".into(), Value::Object(summary));
    }
    patch
}

fn enqueue_random(
    queue: &ScenePatchQueue,
    rng: &mut StdRng,
    expected: &mut HashMap<String, Patch>,
    step: &mut usize,
) {
    *step += 1;
    let scene = SCENES[rng.gen_range(0..SCENES.len())];
    let patch = random_patch(rng, *step);
    merge_patch(expected.entry(format!("p/{scene}")).or_default(), patch.clone());
    queue.enqueue("p", scene, patch);
}

async fn run_interleaving(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let remote = Arc::new(RemoteScenes::default());
    // Long enough that only explicit flushes send anything.
    let queue = ScenePatchQueue::new(remote.clone(), Duration::from_secs(3600));
    let mut expected = HashMap::new();
    let mut step = 0;

    for _ in 0..150 {
        match rng.gen_range(0..10) {
            0..=5 => enqueue_random(&queue, &mut rng, &mut expected, &mut step),
            6 | 7 => {
                *remote.failures.lock() = random_failures(&mut rng);
                queue.flush_now().await;
            }
            _ => {
                let gate = Arc::new(Semaphore::new(0));
                *remote.gate.lock() = Some(gate.clone());
                *remote.failures.lock() = random_failures(&mut rng);

                let in_flight = tokio::spawn({
                    let queue = queue.clone();
                    async move { queue.flush_now().await }
                });
                tokio::task::yield_now().await;

                for _ in 0..rng.gen_range(1..4) {
                    enqueue_random(&queue, &mut rng, &mut expected, &mut step);
                }
                *remote.gate.lock() = None;
                gate.add_permits(SCENES.len());
                in_flight.await.unwrap();
            }
        }
    }

    *remote.failures.lock() = Failures::Never;
    let report = queue.flush_now().await;
    assert_eq!(report.requeued, 0, "seed {seed}");
    assert_eq!(queue.pending_len(), 0, "seed {seed}");
    assert_eq!(*remote.state.lock(), expected, "seed {seed}");
}

#[tokio::test]
async fn random_interleavings_lose_no_updates() {
    for seed in 0..32 {
        run_interleaving(seed).await;
    }
}
