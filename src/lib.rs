// ABOUTME: Library crate for xds-make exposing the client pieces for testing

pub mod build;
pub mod cli;
pub mod project;
pub mod protocol;
pub mod transport;
