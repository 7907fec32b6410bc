//! Reserved sessions and well-known timestamps.

use crate::json_crdt_patch::clock::Ts;

/// Reserved session IDs.
#[allow(non_snake_case)]
pub mod SESSION {
    /// Reserved by the protocol, cannot be used by users.
    pub const SYSTEM: u64 = 0;
    /// Session of a server-authoritative replica.
    pub const SERVER: u64 = 1;
    /// Global/schema patches applied on all clients identically.
    pub const GLOBAL: u64 = 2;
    /// Local-only patches (e.g. cursor position, not shared).
    pub const LOCAL: u64 = 3;
    /// Smallest session ID handed out to a replica.
    pub const MIN_USER: u64 = 65_536;
    /// Maximum allowed session ID (53-bit safe integer).
    pub const MAX: u64 = 9_007_199_254_740_991;
}

/// Reserved system-session time values.
#[allow(non_snake_case)]
pub mod SYSTEM_SESSION_TIME {
    pub const ORIGIN: u64 = 0;
    pub const UNDEFINED: u64 = 1;
}

/// The origin timestamp: `(SESSION::SYSTEM, SYSTEM_SESSION_TIME::ORIGIN)`.
///
/// Identity of the document root register, and the "before start" anchor of
/// every sequence.
pub const ORIGIN: Ts = Ts::new(SESSION::SYSTEM, SYSTEM_SESSION_TIME::ORIGIN);

/// The "undefined" sentinel. Writing it to an object key deletes the key; the
/// root register points at it until the first `set-root`.
pub const UNDEFINED: Ts = Ts::new(SESSION::SYSTEM, SYSTEM_SESSION_TIME::UNDEFINED);
