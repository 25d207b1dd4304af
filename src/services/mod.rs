pub mod authorize;
pub mod keygen;
pub mod session;
pub mod signing;

use std::time::Duration;

/// Single-use MPC authorizations and two-round signing sessions.
pub const MPC_SESSION_TTL: Duration = Duration::from_secs(60);
pub const SIGNING_SESSION_TTL: Duration = Duration::from_secs(60);

/// Server caps applied to multi-use auth sessions before the policy digest
/// is recomputed.
pub const AUTH_SESSION_MAX_TTL_MS: u64 = 600_000;
pub const AUTH_SESSION_MAX_USES: u32 = 20;
