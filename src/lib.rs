//! Certdeploy - place certificate bundles on a host and keep its trust store in sync.

pub mod apply;
pub mod cli;
pub mod config;
pub mod converge;
pub mod error;
pub mod listfile;
pub mod plan;
pub mod platform;
pub mod resolve;
pub mod slot;
pub mod trust;
