//! Chunk naming: keys, prefixes and ordering.
//!
//! Every chunk of one (session, participant, stream) shares a prefix; the
//! trailing sequence index is rendered as a fixed-width zero-padded decimal
//! so plain byte order equals numeric order. Unpadded indices silently
//! corrupt playback order on longer sessions ("10" sorts before "2"), so the
//! width here is a correctness invariant, not a formatting nicety.

use serde::{Deserialize, Serialize};

use crate::store::ChunkRef;

/// Digits in a rendered sequence index. Bounds a stream at 10^6 chunks,
/// roughly 500 hours at the ingestion endpoint's 2s cadence.
pub const SEQ_WIDTH: usize = 6;

/// Which media stream of a participant a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Camera,
    Screen,
}

impl StreamKind {
    /// Marker placed between the participant id and the sequence index.
    fn separator(self) -> &'static str {
        match self {
            Self::Camera => "_",
            Self::Screen => "-screen",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera => write!(f, "camera"),
            Self::Screen => write!(f, "screen"),
        }
    }
}

/// Composite key of one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub session_id: String,
    pub participant_id: String,
    pub kind: StreamKind,
    pub sequence_index: u32,
}

impl ChunkKey {
    /// Listing prefix shared by all chunks of one stream.
    pub fn prefix(session_id: &str, participant_id: &str, kind: StreamKind) -> String {
        format!("{session_id}_{participant_id}{}", kind.separator())
    }

    /// Full object identifier with the padded sequence index appended.
    pub fn identifier(&self) -> String {
        format!(
            "{}{:0width$}",
            Self::prefix(&self.session_id, &self.participant_id, self.kind),
            self.sequence_index,
            width = SEQ_WIDTH
        )
    }
}

/// Split an identifier into its stem and trailing decimal index.
///
/// Returns `None` when the identifier does not end in digits. Accepts both
/// padded and legacy unpadded indices; stores populated before padding was
/// enforced still list and order correctly through this.
pub fn split_sequence(id: &str) -> Option<(&str, u32)> {
    let digits_from = id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    let (stem, digits) = id.split_at(digits_from);
    digits.parse().ok().map(|seq| (stem, seq))
}

/// Order listed chunks so concatenation reproduces recording order.
///
/// Identifiers with a parseable trailing index compare by (stem, numeric
/// index); anything else falls back to byte order. For padded identifiers
/// the two orders coincide, so this is byte order with a safety net for
/// legacy unpadded uploads.
pub fn sort_refs(refs: &mut [ChunkRef]) {
    refs.sort_by(|a, b| match (split_sequence(&a.id), split_sequence(&b.id)) {
        (Some((stem_a, seq_a)), Some((stem_b, seq_b))) if stem_a == stem_b => seq_a.cmp(&seq_b),
        _ => a.id.cmp(&b.id),
    });
}

/// Count sequence indices missing from an already-sorted listing.
///
/// Gaps are tolerated by reconstruction (chunks lost in transit should not
/// void a whole recording); callers log and report the count instead.
pub fn scan_gaps(sorted: &[ChunkRef]) -> u32 {
    let mut missing = 0;
    let mut prev: Option<u32> = None;
    for r in sorted {
        let Some((_, seq)) = split_sequence(&r.id) else {
            continue;
        };
        if let Some(p) = prev
            && seq > p + 1
        {
            missing += seq - p - 1;
        }
        prev = Some(seq);
    }
    missing
}
