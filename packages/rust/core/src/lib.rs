//! Core link integrity and repair logic for Roadmend.
//!
//! This crate ties together extraction, liveness checking, replacement
//! discovery, and transactional patching into one lease-guarded run
//! (see [`pipeline::Pipeline::run`]).

pub mod extractor;
pub mod generator;
pub mod lock;
pub mod patcher;
pub mod pipeline;
pub mod replacement;

pub use extractor::{LinkIndex, extract_links};
pub use generator::{OpenRouterGenerator, TextGenerator};
pub use lock::{DatabaseLease, FileLease, LeaseToken, RunLease};
pub use patcher::{PatchOutcome, SkipReason, apply_replacement};
pub use pipeline::{Pipeline, ProgressReporter, RunOutcome, RunSummary, SilentProgress};
pub use replacement::{ReplacementAttempt, ReplacementFinder};
