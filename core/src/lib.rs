// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tessera — Core Library
//!
//! Tessera turns raw deposit events into soulbound attestations that say
//! "a deposit of tier X happened" without ever saying how much was moved.
//!
//! The library owns the part of the system with actual invariants: the
//! pipeline sitting between a noisy event source and the minting call.
//! Chain listeners, the minting contract, and the HTTP surface are all
//! collaborators behind traits.
//!
//! ## Architecture
//!
//! ```text
//! source ──► verifier ──► dedup ──► tier ──► minter ──► storage
//!              │            │                   │
//!              └────────────┴──── events ◄──────┘
//! ```
//!
//! - **tier** — privacy tier classification. Reveals thresholds, never amounts.
//! - **verifier** — structural checks plus a per-wallet sliding-window rate limiter.
//! - **dedup** — duplicate detection by transaction reference or deposit id.
//! - **minter** — the orchestrator around the external minting capability.
//! - **pipeline** — wires everything together per incoming event.
//! - **admin** — credential-gated force-mint.
//! - **source** — deposit sources (mock generator, webhook push).
//! - **events** — broadcast bus for status notifications.
//! - **storage** — sled-backed persistence for deposits and attestations.
//! - **clock** — injectable time source.
//! - **config** — constants and per-component configuration.
//!
//! ## Ground Rules
//!
//! 1. A deposit's processed flag flips exactly once. Everything else is
//!    downstream of that.
//! 2. Duplicates and validation failures are final. No retries.
//! 3. Mint failures leave the deposit untouched, so retrying is always safe.
//! 4. Storage errors propagate. Swallowing one after an external mint is
//!    how you end up with orphaned tokens.

pub mod admin;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod events;
pub mod minter;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod tier;
pub mod types;
pub mod verifier;

pub use types::{Attestation, Deposit, DepositEvent};
