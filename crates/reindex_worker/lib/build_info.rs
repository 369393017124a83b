//! Build identity reported by `--version` and the logging bootstrap event.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("REINDEX_WORKER_GIT_COMMIT_HASH");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("REINDEX_WORKER_GIT_COMMIT_HASH")
);

const SHORT_HASH_LEN: usize = 12;

/// First twelve characters of the commit hash, or `unknown` when git was unavailable.
pub fn short_commit_hash() -> &'static str {
    GIT_COMMIT_HASH
        .get(..SHORT_HASH_LEN)
        .unwrap_or(GIT_COMMIT_HASH)
}
