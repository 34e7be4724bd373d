//! Biometric template handling.

pub mod template;
