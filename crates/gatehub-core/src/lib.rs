//! Core engine for hub-coordinated quality gates.
//!
//! `gatehub-core` implements the orchestration and aggregation engine that
//! drives quality and security checks across many independently versioned
//! repositories from one control point:
//!
//! - **Config resolution** ([`config`]): layered TOML documents deep-merged
//!   into one effective configuration per unit, with protected identity
//!   fields and aggregated validation errors.
//! - **Dispatch coordination** ([`dispatch`]): triggers remote execution and
//!   polls it to completion under timeout and backoff budgets, producing a
//!   terminal run record for every attempt.
//! - **Report aggregation** ([`report`]): validates fetched result records,
//!   detects drift between configured/ran/succeeded tool states, applies
//!   threshold gates, and produces one consolidated verdict.
//! - **Determinism verification** ([`determinism`]): repeated independent
//!   inspections of a built artifact compared hash-for-hash, with durable
//!   evidence for every variant checked.
//!
//! Tool-specific runners, the remote execution substrate, and artifact
//! signing are external collaborators behind injected traits; this crate
//! contains only the deterministic merge, comparison, and gating logic.
//! Re-running any of these operations on the same inputs produces the same
//! output.

pub mod config;
pub mod determinism;
pub mod dispatch;
pub mod report;
