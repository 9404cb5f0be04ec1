//! # Tessera Contracts
//!
//! Token logic behind Tessera attestations.
//!
//! - **Soulbound Registry** — issues non-transferable tokens that record a
//!   deposit's privacy tier and nothing else. Implements the core's
//!   `MintingCapability`, so a node can mint locally without any chain.
//!
//! ## Design Principles
//!
//! 1. Ownership is fixed at mint. There is no transfer path to get wrong.
//! 2. Tokens carry tier labels, never amounts.
//! 3. Every public type is serializable (serde) for wire transport.

pub mod soulbound;

pub use soulbound::{RegistryError, SoulboundRegistry, SoulboundToken};
