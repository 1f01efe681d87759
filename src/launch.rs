//! Launch validation: id_token verification, claim extraction, and dispatch.

pub mod claims;
pub mod handlers;
pub mod validator;
