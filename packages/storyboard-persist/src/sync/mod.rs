//! # Sync Module
//!
//! Write-coalescing queues between local edits and the backend.
//!
//! ## Flush Protocol
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PATCH QUEUE LIFECYCLE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  enqueue(k, p) ──► pending[k] = merge(pending[k], p) ──► arm timer      │
//! │                                                       (if not armed)    │
//! │                                                                         │
//! │  timer fires / flush_now()                                              │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  items = take(pending)        ◄── synchronous, before any await         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  join_all(update(k, p) for each item)                                   │
//! │        │                                                                │
//! │        ├── ok    ──► dropped                                            │
//! │        └── error ──► pending[k] = merge(failed, pending[k])  (newer     │
//! │                      fields win), warn, no reschedule                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-most-once per flush and best-effort overall; a requeued
//! patch waits for the next enqueue or an explicit flush.

mod patch;
mod queue;
mod scheduler;
mod scenes;

pub use patch::{merge_patch, merged, Patch, DEEP_MERGE_FIELD};
pub use queue::{EntityKey, FlushReport, PatchQueue, RemoteUpdater, DEFAULT_DEBOUNCE};
pub use scheduler::DebounceScheduler;
pub use scenes::{
    EpisodeSceneKey, EpisodeScenePatchQueue, EpisodeSceneUpdater, SceneKey, ScenePatchQueue,
    SceneUpdater,
};
