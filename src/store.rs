//! Persistence seams for login state and LTI correlation records.

pub mod context;
pub mod state;
