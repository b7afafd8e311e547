/// Default reply timeout for request/reply sends (milliseconds)
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;

/// First session id handed out by a session registry
pub const DEFAULT_SESSION_SEED: u64 = 1000;

/// Maximum number of committed undo groups kept
pub const DEFAULT_MAX_UNDO_GROUPS: usize = 100;

/// Default UI language
pub const DEFAULT_LANG: &str = "en";

/// Host name every package may declare under `hosts`
pub const DEFAULT_HOST_NAME: &str = "easel";

/// Version reported for the built-in host
pub const DEFAULT_HOST_VERSION: &str = env!("CARGO_PKG_VERSION");
