// ABOUTME: Configuration crate for Reelbox
// ABOUTME: Exposes environment variable names and typed env parsing helpers

pub mod constants;
pub mod env;
