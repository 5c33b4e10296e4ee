//! # Profiles
//!
//! Named provider configurations stored in the encrypted config document.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConfigDocument (v2)                                                    │
//! │  ├── activeProfileId ──────────────┐                                   │
//! │  └── profiles: [                   ▼                                   │
//! │        { id: cfg_<ms>_<rand7>, name, config: UserConfig,               │
//! │          pricing?, lastTest?, createdAt, updatedAt }, ...              │
//! │      ]                                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The newest profile sits at the front of the list. `activeProfileId`
//! always names an existing profile, or is absent when the list is empty.

mod model;
mod service;

pub use model::{
    ConfigDocument, ConfigProfile, ConnectionTestResult, GenerationParams, Pricing, ProviderType,
    ReasoningEffort, TestStatus, UserConfig,
};
pub use service::{new_profile_id, ProfileDraft, ProfileService, ProfileUpdate};
