//! OAuth session layer
//!
//! Authorization Code flow with PKCE (RFC 7636) against a loopback
//! redirect, persistent token storage and transparent refresh.

mod callback;
mod pkce;
mod session;
mod storage;

pub use callback::{CallbackOutcome, CallbackServer, CallbackTarget};
pub use pkce::{PkcePair, code_challenge_s256, generate_state};
pub use session::{LoginOutcome, LoginSlot, LoginStart, OAuthSessionManager, SessionStatus};
pub use storage::{
    EXPIRY_SKEW_SECS, RefreshLock, STORE_VERSION, TokenRecord, TokenStore, UserProfile,
};
