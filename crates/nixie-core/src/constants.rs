//! System-wide constants
//!
//! TigerStyle: Explicit named bounds, no magic numbers at call sites.

/// Grace period before a disconnected (zombie) node is removed from its
/// group, in milliseconds.
pub const NODE_EXPIRED_MS_DEFAULT: u64 = 30_000;

/// Interval between client reconnect attempts in milliseconds.
pub const CLIENT_RETRY_MS_DEFAULT: u64 = 30_000;

/// Buffer capacity of a watcher channel.
///
/// Watchers are one-shot: a single buffered slot is enough to guarantee that
/// snapshot delivery under the group lock never blocks.
pub const WATCH_CHANNEL_CAPACITY: usize = 1;

const _: () = {
    assert!(WATCH_CHANNEL_CAPACITY >= 1);
    assert!(NODE_EXPIRED_MS_DEFAULT > 0);
};
