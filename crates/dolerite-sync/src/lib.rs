//! State-sync coordination core for a Dolerite VSR replica.
//!
//! When a replica falls so far behind the cluster's committed checkpoint
//! that replaying the log cannot catch it up, it abandons local progress
//! and installs a fresh checkpoint from the cluster. This crate implements
//! the pure core of that process:
//!
//! - **when** a replica may sync: the six-stage lifecycle in [`stage`],
//!   which interleaves sync with the commit pipeline (cancel commit,
//!   quiesce grid) and parks between external events;
//! - **which** checkpoint to install: the per-peer candidate table in
//!   [`target`], promoting a candidate to a canonical [`Target`] only once
//!   a quorum of peers advertises exactly that checkpoint;
//! - **how** the oversized superblock trailers are fetched: the chunked
//!   authenticated assembler in [`trailer`], which reconstructs each
//!   trailer from unordered, duplicated, or stale fragments and releases
//!   it only after the digest check.
//!
//! # Architecture
//!
//! The whole core is a pure, deterministic state machine driven by the
//! replica event loop:
//!
//! ```text
//! Runtime ──SyncEvent──► SyncCoordinator ──SyncAction──► Collaborators
//!                            │                            (commit pipeline,
//!                            └── Stage, TargetQuorum,      grid, source peer,
//!                                Trailer × 3               superblock writer)
//! ```
//!
//! No I/O, no clocks, no locking: the runtime executes the actions and
//! feeds completions back as events. This keeps the core fully
//! simulation-testable.
//!
//! # Key Types
//!
//! - [`SyncCoordinator`]: the event-driven core
//! - [`Stage`]: the sync lifecycle with per-stage payloads
//! - [`TargetQuorum`]: canonical-checkpoint discovery
//! - [`Trailer`]: chunked authenticated assembly

pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod stage;
pub mod target;
pub mod trailer;
pub mod types;

pub use config::{ClusterConfig, REPLICAS_MAX};
pub use coordinator::{
    CommitPipelineStatus, SyncAction, SyncCoordinator, SyncEvent, SyncOutput, TrailerProgress,
};
pub use error::{TrailerError, TrailerResult};
pub use message::{TargetAdvertisement, TrailerChunk, TrailerKind, CHUNK_SIZE_MAX};
pub use stage::{
    AssembledTrailers, RequestTrailers, Stage, StageTag, TrailerFetch, UpdatingSuperblock,
    valid_transition,
};
pub use target::{Target, TargetCandidate, TargetQuorum};
pub use trailer::{Trailer, TrailerDestination, TrailerTotal};
pub use types::{CheckpointId, OpNumber, ReplicaId};
