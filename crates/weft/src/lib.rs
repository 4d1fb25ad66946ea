//! # Weft
//!
//! Encrypted, multi-writer thread logs replicated between peers.
//!
//! ## Overview
//!
//! A wallet holds one identity and the threads it belongs to:
//!
//! - **Threads**: named, keyed logs of signed blocks forming a DAG
//! - **Blocks**: immutable entries, encrypted under the thread key
//! - **Membership**: direct invites, invite links, join and leave
//! - **Devices**: other installs of the same user, mirrored into every thread
//! - **Updates**: typed event streams for wallets and threads
//!
//! ## Key Concepts
//!
//! - **Head**: the block local commits build on
//! - **Tips**: branch heads that diverged from the head and await a merge
//! - **Backfill**: missing ancestors are fetched and applied before a block
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft::{serve, Wallet, WalletConfig};
//! use weft::core::{Keypair, PhotoMetadata};
//! use weft::net::MemoryNetwork;
//! use weft::store::MemoryStore;
//!
//! async fn example() -> weft::Result<()> {
//!     let identity = Keypair::generate();
//!     let network = MemoryNetwork::new();
//!     let (transport, incoming) = network.create_transport(identity.public_key()).await;
//!
//!     let wallet = Wallet::with_store(
//!         identity,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(transport),
//!         WalletConfig::default(),
//!     )
//!     .await?;
//!     serve(Arc::clone(&wallet), incoming);
//!
//!     let thread = wallet.add_thread("holiday", Keypair::generate()).await?;
//!     thread.add_photo("media-id", "beach", PhotoMetadata::default()).await?;
//!     let link = thread.add_external_invite().await?.to_link();
//!     println!("share {}", link);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `weft::core` - ids, keys and blocks
//! - `weft::perms` - thread cipher, invite secrets and links
//! - `weft::store` - object store and index
//! - `weft::net` - envelopes and transports

mod backfill;
pub mod config;
pub mod error;
pub mod handlers;
pub mod sealing;
pub mod service;
pub mod thread;
pub mod updates;
pub mod wallet;

pub use weft_core as core;
pub use weft_net as net;
pub use weft_perms as perms;
pub use weft_store as store;

pub use config::WalletConfig;
pub use error::{ErrorKind, Result, WeftError};
pub use service::serve;
pub use thread::Thread;
pub use updates::{Subscription, ThreadUpdate, Update, UpdateBus, UpdateKind};
pub use wallet::Wallet;
