//! # Weft Perms
//!
//! Who can read a thread, and how they get the keys.
//!
//! ## Overview
//!
//! Thread content is encrypted with a 44-byte [`SymmetricKey`]. Membership is
//! granted by handing a new member an [`InviteSecret`]: the thread signing
//! seed, the content key, the thread name and the current peer list.
//!
//! - Direct invites seal the secret for one identity ([`SealedBox`]).
//! - External invites lock it with a bearer key. The key and the invite block
//!   id travel together in an [`InviteLink`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use weft_perms::{build_link, parse_link, InviteSecret, SymmetricKey};
//!
//! // let locked = secret.lock(&bearer)?;
//! // let link = build_link(&invite_block_id, bearer.as_bytes(), &secret.name);
//! // let parsed = parse_link(&link)?;
//! // let secret = InviteSecret::unlock(&locked, &parsed.key)?;
//! ```

pub mod cipher;
pub mod crypto;
pub mod error;
pub mod invite;
pub mod link;
pub mod seal;

pub use cipher::{decrypt, encrypt, generate_key, CipherError, SymmetricKey, KEY_LEN};
pub use crypto::{EphemeralKeyPair, SharedKey, X25519PublicKey, X25519StaticSecret};
pub use error::{PermsError, Result};
pub use invite::InviteSecret;
pub use link::{build_link, parse_link, InviteLink};
pub use seal::SealedBox;
