//! Id-versus-title resolution for user-supplied conversation references
//!
//! The UI hands rename and delete a single string that may be either a server
//! id or a display title. A reference made only of hex digits and hyphens, at
//! least 6 long, is taken to be an id. A title that happens to look like that
//! (e.g. "deadbeef") is misrouted as an id; this is a known limitation and
//! matches what the server side expects.

use serde::{Deserialize, Serialize};

const MIN_ID_LEN: usize = 6;

/// How a reference string is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Id,
    Title,
}

/// Classify a reference as an id or a title
pub fn classify(reference: &str) -> RefKind {
    let looks_like_id = reference.len() >= MIN_ID_LEN
        && reference
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-');

    if looks_like_id {
        RefKind::Id
    } else {
        RefKind::Title
    }
}
