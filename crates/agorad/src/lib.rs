//! agorad: balanced, grounded answers on political topics.
//!
//! A single turn flows through scope classification, grounding,
//! perspective synthesis, bias reflection, and uncertainty calibration.
//! The daemon exposes the pipeline over HTTP.

pub mod config;
pub mod conversation;
pub mod evaluation;
pub mod fixtures;
pub mod gateway;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod stages;

pub use config::{Config, Credentials};
pub use conversation::ConversationManager;
pub use evaluation::EvaluationHarness;
pub use pipeline::{ResponsePipeline, Stages};
pub use server::AppState;
