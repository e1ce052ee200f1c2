//! Identifiers, scope sets, secrets, and identity claims.

pub mod client_info;
pub mod id;
pub mod id_token;
pub mod scope;
pub mod secret;
pub mod user;

pub use client_info::*;
pub use id::*;
pub use id_token::{IdToken, IdTokenClaims, IdentityError, decode_jwt_payload};
pub use scope::*;
pub use secret::*;
pub use user::*;
