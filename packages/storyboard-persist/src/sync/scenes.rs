//! The two scene queues: project scenes and episode scenes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::patch::Patch;
use super::queue::{FlushReport, PatchQueue, RemoteUpdater};
use crate::error::Result;

/// A scene inside a project
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SceneKey {
    /// Owning project
    pub project_id: String,
    /// Scene within the project
    pub scene_id: String,
}

impl SceneKey {
    /// Build a key from its parts
    pub fn new(project_id: impl Into<String>, scene_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            scene_id: scene_id.into(),
        }
    }
}

impl fmt::Display for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.scene_id)
    }
}

/// A scene inside an episode of a project
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeSceneKey {
    /// Owning project
    pub project_id: String,
    /// Episode within the project
    pub episode_id: String,
    /// Scene within the episode
    pub scene_id: String,
}

impl EpisodeSceneKey {
    /// Build a key from its parts
    pub fn new(
        project_id: impl Into<String>,
        episode_id: impl Into<String>,
        scene_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            episode_id: episode_id.into(),
            scene_id: scene_id.into(),
        }
    }
}

impl fmt::Display for EpisodeSceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project_id, self.episode_id, self.scene_id)
    }
}

/// Backend endpoint for project scene updates
#[async_trait]
pub trait SceneUpdater: Send + Sync {
    /// Apply `patch` to one scene. An error leaves the patch queued.
    async fn update_scene(&self, project_id: &str, scene_id: &str, patch: &Patch) -> Result<()>;
}

/// Backend endpoint for episode scene updates
#[async_trait]
pub trait EpisodeSceneUpdater: Send + Sync {
    /// Apply `patch` to one episode scene. An error leaves the patch queued.
    async fn update_episode_scene(
        &self,
        project_id: &str,
        episode_id: &str,
        scene_id: &str,
        patch: &Patch,
    ) -> Result<()>;
}

struct SceneAdapter(Arc<dyn SceneUpdater>);

#[async_trait]
impl RemoteUpdater<SceneKey> for SceneAdapter {
    async fn update_entity(&self, key: &SceneKey, patch: &Patch) -> Result<()> {
        self.0.update_scene(&key.project_id, &key.scene_id, patch).await
    }
}

struct EpisodeSceneAdapter(Arc<dyn EpisodeSceneUpdater>);

#[async_trait]
impl RemoteUpdater<EpisodeSceneKey> for EpisodeSceneAdapter {
    async fn update_entity(&self, key: &EpisodeSceneKey, patch: &Patch) -> Result<()> {
        self.0
            .update_episode_scene(&key.project_id, &key.episode_id, &key.scene_id, patch)
            .await
    }
}

/// Coalescing queue for project scene patches
#[derive(Debug, Clone)]
pub struct ScenePatchQueue {
    queue: PatchQueue<SceneKey>,
}

impl ScenePatchQueue {
    /// Create a queue sending through `updater`, flushing `debounce` after
    /// the first queued edit
    pub fn new(updater: Arc<dyn SceneUpdater>, debounce: Duration) -> Self {
        Self {
            queue: PatchQueue::new("scene", Arc::new(SceneAdapter(updater)), debounce),
        }
    }

    /// Queue a patch for one scene
    pub fn enqueue(&self, project_id: &str, scene_id: &str, patch: Patch) {
        self.queue.enqueue(SceneKey::new(project_id, scene_id), patch);
    }

    /// Send everything pending; see [`PatchQueue::flush`]
    pub async fn flush(&self) -> FlushReport {
        self.queue.flush().await
    }

    /// Cancel the timer and flush, for page hide or shutdown
    pub async fn flush_now(&self) -> FlushReport {
        self.queue.flush_now().await
    }

    /// Number of scenes with unsent edits
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// The coalesced patch waiting for one scene
    pub fn pending_patch(&self, project_id: &str, scene_id: &str) -> Option<Patch> {
        self.queue.pending_patch(&SceneKey::new(project_id, scene_id))
    }

    /// The underlying generic queue
    pub fn inner(&self) -> &PatchQueue<SceneKey> {
        &self.queue
    }
}

/// Coalescing queue for episode scene patches
#[derive(Debug, Clone)]
pub struct EpisodeScenePatchQueue {
    queue: PatchQueue<EpisodeSceneKey>,
}

impl EpisodeScenePatchQueue {
    /// Create a queue sending through `updater`, flushing `debounce` after
    /// the first queued edit
    pub fn new(updater: Arc<dyn EpisodeSceneUpdater>, debounce: Duration) -> Self {
        Self {
            queue: PatchQueue::new(
                "episode scene",
                Arc::new(EpisodeSceneAdapter(updater)),
                debounce,
            ),
        }
    }

    /// Queue a patch for one episode scene
    pub fn enqueue(&self, project_id: &str, episode_id: &str, scene_id: &str, patch: Patch) {
        self.queue
            .enqueue(EpisodeSceneKey::new(project_id, episode_id, scene_id), patch);
    }

    /// Send everything pending; see [`PatchQueue::flush`]
    pub async fn flush(&self) -> FlushReport {
        self.queue.flush().await
    }

    /// Cancel the timer and flush, for page hide or shutdown
    pub async fn flush_now(&self) -> FlushReport {
        self.queue.flush_now().await
    }

    /// Number of scenes with unsent edits
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// The coalesced patch waiting for one scene
    pub fn pending_patch(&self, project_id: &str, episode_id: &str, scene_id: &str) -> Option<Patch> {
        self.queue
            .pending_patch(&EpisodeSceneKey::new(project_id, episode_id, scene_id))
    }

    /// The underlying generic queue
    pub fn inner(&self) -> &PatchQueue<EpisodeSceneKey> {
        &self.queue
    }
}
