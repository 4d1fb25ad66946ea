//! # Weft Testkit
//!
//! Testing utilities for Weft.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: wallets served on a shared in-memory network
//! - **Generators**: Proptest strategies for property-based testing
//! - **Forge**: blocks crafted outside any wallet, valid or tampered
//! - **Faults**: a store whose index writes fail on demand
//!
//! ## Multi-node Tests
//!
//! ```rust,no_run
//! use weft::core::PhotoMetadata;
//! use weft_testkit::fixtures::{eventually, shared_thread, TestNetwork};
//!
//! # async fn example() {
//! let net = TestNetwork::new();
//! let (a, b) = (net.node().await, net.node().await);
//! let id = shared_thread(&[&a, &b], "album").await;
//!
//! let photo = a
//!     .thread(&id)
//!     .await
//!     .add_photo("media", "hello", PhotoMetadata::default())
//!     .await
//!     .unwrap();
//! let b = &b;
//! assert!(eventually(move || async move { b.has_block(&id, &photo).await }).await);
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use weft_testkit::generators::{block_from_params, BlockParams};
//!
//! proptest! {
//!     #[test]
//!     fn blocks_verify(params: BlockParams) {
//!         prop_assert!(block_from_params(&params).verify().is_ok());
//!     }
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::FaultyStore;
pub use fixtures::{
    ancestors_complete, converged, eventually, init_tracing, secret_from_link, settle,
    shared_thread, test_config, BlockForge, TestNetwork, TestNode,
};
pub use generators::{block_from_params, stored_from_params, BlockParams};
