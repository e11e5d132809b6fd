//! # tree-mirror
//!
//! Keeps a remote content store in step with a local directory tree.
//!
//! A local file is in scope unless git-style ignore rules exclude it. Each
//! reconciliation pass compares content hashes of the in-scope files with
//! the store's listing, uploads what is new or changed, and deletes remote
//! records whose local file is gone. The watch pipeline then keeps the two
//! in step from filesystem notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌─────────────┐
//! │  Walker  │──▶│IgnoreResolver│──▶│ Reconcile │──▶│ RemoteStore │
//! │ git/walk │   │ PatternMatch │   │ plan+exec │   │ http/local  │
//! └──────────┘   └──────────────┘   └─────┬─────┘   └─────────────┘
//!                                         │
//!                                   ┌─────┴─────┐
//!                                   │   Watch   │
//!                                   │  notify   │
//!                                   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`pattern`] | Ignore-file pattern parsing and matching |
//! | [`ignore`] | Hierarchical ignore resolution with a per-directory cache |
//! | [`git`] | Version-control collaborator |
//! | [`walker`] | In-scope file enumeration |
//! | [`models`] | Core data types and content hashing |
//! | [`store`] | Remote store trait and backends |
//! | [`snapshot`] | Paginated remote listing |
//! | [`transfer`] | Single-file upload and delete |
//! | [`reconcile`] | Reconciliation passes |
//! | [`progress`] | Progress reporting |
//! | [`watch`] | Live mirroring |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pass-level errors |

pub mod config;
pub mod error;
pub mod git;
pub mod ignore;
pub mod models;
pub mod pattern;
pub mod progress;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod transfer;
pub mod walker;
pub mod watch;
