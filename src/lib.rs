#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod config;
pub mod error;
pub mod install;
pub mod logging;
pub mod mounts;
pub mod parse;
pub mod paths;
pub mod ssh;
pub mod sshfs;
pub mod util;
