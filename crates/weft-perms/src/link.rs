//! Shareable external invite links.
//!
//! A link carries the invite block id, the bearer key and the thread name:
//!
//! ```text
//! weft://invite#id=<64 hex>&key=<hex>&name=<hex of utf-8>
//! ```
//!
//! [`parse_link`] only accepts strings that [`build_link`] could have
//! produced, so the two are exact inverses.

use weft_core::BlockId;

use crate::error::{PermsError, Result};

const PREFIX: &str = "weft://invite#";

/// The parts of an external invite link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteLink {
    pub id: BlockId,
    pub key: Vec<u8>,
    pub name: String,
}

impl InviteLink {
    pub fn to_link(&self) -> String {
        build_link(&self.id, &self.key, &self.name)
    }
}

pub fn build_link(id: &BlockId, key: &[u8], name: &str) -> String {
    format!(
        "{}id={}&key={}&name={}",
        PREFIX,
        id.to_hex(),
        hex::encode(key),
        hex::encode(name.as_bytes())
    )
}

pub fn parse_link(link: &str) -> Result<InviteLink> {
    let rest = link
        .strip_prefix(PREFIX)
        .ok_or_else(|| malformed("missing scheme"))?;

    let mut parts = rest.split('&');
    let id = param(parts.next(), "id")?;
    let key = param(parts.next(), "key")?;
    let name = param(parts.next(), "name")?;
    if parts.next().is_some() {
        return Err(malformed("trailing parameters"));
    }

    let parsed = InviteLink {
        id: BlockId::from_hex(id).map_err(|e| malformed(&format!("id: {}", e)))?,
        key: hex::decode(key).map_err(|e| malformed(&format!("key: {}", e)))?,
        name: String::from_utf8(hex::decode(name).map_err(|e| malformed(&format!("name: {}", e)))?)
            .map_err(|_| malformed("name is not utf-8"))?,
    };

    // Reject alternate spellings such as upper-case hex.
    if parsed.to_link() != link {
        return Err(malformed("non-canonical link"));
    }
    Ok(parsed)
}

fn param<'a>(part: Option<&'a str>, name: &str) -> Result<&'a str> {
    part.and_then(|p| p.strip_prefix(name))
        .and_then(|p| p.strip_prefix('='))
        .ok_or_else(|| malformed(&format!("expected {}", name)))
}

fn malformed(msg: &str) -> PermsError {
    PermsError::MalformedLink(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> InviteLink {
        InviteLink {
            id: BlockId::from_bytes([0xab; 32]),
            key: vec![1, 2, 3, 4],
            name: "Summer & Friends".into(),
        }
    }

    #[test]
    fn test_build_parse() {
        let link = sample().to_link();
        assert!(link.starts_with("weft://invite#id=abab"));
        assert_eq!(parse_link(&link).unwrap(), sample());
    }

    #[test]
    fn test_malformed_links() {
        let good = sample().to_link();
        let cases = [
            String::new(),
            "https://example.com".to_string(),
            "weft://invite#".to_string(),
            good.replace("id=", "ix="),
            good.replace("abab", "ABAB"),
            format!("{}&extra=1", good),
            good.replace("&key=", "&key=0"),
            good[..good.len() - 1].to_string(),
            "weft://invite#id=00&key=&name=".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(parse_link(&case), Err(PermsError::MalformedLink(_))),
                "accepted {:?}",
                case
            );
        }
    }

    #[test]
    fn test_invalid_utf8_name() {
        let link = format!(
            "weft://invite#id={}&key=00&name=ff",
            BlockId::from_bytes([1; 32]).to_hex()
        );
        assert!(parse_link(&link).is_err());
    }

    proptest! {
        #[test]
        fn prop_exact_inverse(
            id in any::<[u8; 32]>(),
            key in prop::collection::vec(any::<u8>(), 0..64),
            name in ".{0,40}",
        ) {
            let id = BlockId::from_bytes(id);
            let link = build_link(&id, &key, &name);
            let parsed = parse_link(&link).unwrap();
            prop_assert_eq!(parsed, InviteLink { id, key, name });
        }

        #[test]
        fn prop_arbitrary_strings_never_panic(s in ".{0,200}") {
            if let Ok(parsed) = parse_link(&s) {
                prop_assert_eq!(parsed.to_link(), s);
            }
        }
    }
}
