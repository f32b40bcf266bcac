//! Cache key derivation and parsing.
//!
//! Key shapes are deterministic so that any component holding only an id can
//! address the same entry: `note:<id>` for entity snapshots,
//! `note:<id>:views` / `note:<id>:likes` for counter deltas, and
//! `rl:<action>:<scope>:<ident>` for rate-limit windows.

/// Set key tracking note ids with unreconciled counter deltas.
pub const DIRTY_NOTE_SET_KEY: &str = "note:counters:dirty";

const KEY_PREFIX_NOTE: &str = "note:";
const KEY_SUFFIX_VIEWS: &str = "views";
const KEY_SUFFIX_LIKES: &str = "likes";

/// Which counter a counter key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Views,
    Likes,
}

impl CounterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterKind::Views => KEY_SUFFIX_VIEWS,
            CounterKind::Likes => KEY_SUFFIX_LIKES,
        }
    }
}

/// Entity snapshot key for a note.
pub fn note(id: i64) -> String {
    format!("{KEY_PREFIX_NOTE}{id}")
}

/// Views counter key for a note.
pub fn note_views(id: i64) -> String {
    format!("{KEY_PREFIX_NOTE}{id}:{KEY_SUFFIX_VIEWS}")
}

/// Likes counter key for a note.
pub fn note_likes(id: i64) -> String {
    format!("{KEY_PREFIX_NOTE}{id}:{KEY_SUFFIX_LIKES}")
}

/// Counter key for a note and kind.
pub fn note_counter(id: i64, kind: CounterKind) -> String {
    format!("{KEY_PREFIX_NOTE}{id}:{}", kind.as_str())
}

/// Fixed-window rate-limit key for `(action, scope, ident)`.
pub fn rate_limit(action: &str, scope: &str, ident: &str) -> String {
    format!("rl:{action}:{scope}:{ident}")
}

/// Parse a key back into `(note_id, kind)` if it has counter-key shape.
///
/// The increment primitive uses this to decide whether a write should mark
/// the owning note dirty. Keys of any other shape return `None`.
pub fn parse_counter_key(key: &str) -> Option<(i64, CounterKind)> {
    let rest = key.strip_prefix(KEY_PREFIX_NOTE)?;
    let (id_part, suffix) = rest.split_once(':')?;
    let kind = match suffix {
        KEY_SUFFIX_VIEWS => CounterKind::Views,
        KEY_SUFFIX_LIKES => CounterKind::Likes,
        _ => return None,
    };
    let id = id_part.parse::<i64>().ok()?;
    Some((id, kind))
}
