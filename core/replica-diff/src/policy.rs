use serde::{Deserialize, Serialize};

/// How an inbound diff is treated when the receiver has diverged from the
/// sender's snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Apply every edit regardless of the receiver's current value. The last
    /// writer observed by this replica wins.
    #[default]
    LastWriterWins,
    /// Skip `update`/`delete` edits whose recorded old value no longer matches
    /// the receiver, and `add` edits that would overwrite a different value.
    RejectStale,
}
