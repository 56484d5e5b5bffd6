//! agoractl - command-line client for agorad.

pub mod cli;
pub mod client;
pub mod display;
