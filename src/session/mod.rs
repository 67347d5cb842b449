//! Session Store (C3): checksum-paired run state plus session token issuance.

mod digest;
mod store;
mod token;

pub use digest::digest_hex;
pub use store::{SessionError, SessionStore, TaskState, TaskStatus};
pub use token::SessionToken;
