//! Core module - Collaborator seams
//!
//! The realtime hub and execution engine depend on two outside decisions:
//! - Authenticator: accept or reject a client credential
//! - SessionDirectory: whether a session id exists
//!
//! Both are traits so deployments can back them with real stores.

pub mod auth;
pub mod sessions;

pub use auth::{Authenticator, Principal, StaticTokenAuthenticator};
pub use sessions::{
    starter_code, InMemorySessionDirectory, SessionDirectory, SessionRecord, DEFAULT_LANGUAGE,
};
