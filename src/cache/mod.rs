//! Layer cache for step-by-step image builds
//!
//! Provides content-addressed caching of intermediate images. The cache is
//! the image store itself: an entry is a tagged image named
//! `<namespace>:<key>`, and no separate index is kept.
//!
//! # Key Chain
//!
//! - Each step key hashes the current image identity plus the step
//! - A hit or a committed miss moves the current image to the entry's tag
//! - A changed step therefore invalidates every step after it
//!
//! # Step Outcomes
//!
//! | Outcome | Executes | Commits | Working container |
//! |---------|----------|---------|-------------------|
//! | Cached | no | no | recreated from cached tag |
//! | Built | yes | yes | kept |

pub mod executor;
pub mod key;
pub mod prune;
pub mod session;

pub use key::{cache_tag, derive_key, StepRequest, DEFAULT_KEY_LENGTH};
pub use prune::{prune, PruneReport};
pub use session::{BuildSession, SessionConfig, SessionState, StepOutcome};
