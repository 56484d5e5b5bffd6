//! Shared types and pure logic for Agora components.
//!
//! Everything here is deterministic: data model, session state machine,
//! balance and calibration rules, rendering, and evaluation checks.

pub mod balance;
pub mod calibration;
pub mod claims;
pub mod error;
pub mod evaluation;
pub mod limitations;
pub mod reflection;
pub mod render;
pub mod rpc;
pub mod session;
pub mod transcript;
pub mod turn;

pub use claims::{Claim, ConfidenceLabel, Perspective, SourceDocument};
pub use error::{AgoraError, GatewayError};
pub use evaluation::{CaseReport, EvaluationCase, Property, PropertyOutcome};
pub use session::{Session, SessionState};
pub use turn::{Classification, ConfidenceSummary, Role, Turn, TurnReport, Verdict};

/// Crate version, shared by daemon and client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bind address for agorad
pub const DEFAULT_BIND: &str = "127.0.0.1:7870";

/// Default agorad URL for agoractl
pub const DEFAULT_URL: &str = "http://127.0.0.1:7870";

/// System-wide config file path
pub const CONFIG_PATH: &str = "/etc/agora/config.toml";
