//! CLI surface.

pub mod install;
