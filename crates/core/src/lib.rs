//! TSpec core engine
//!
//! Turns declarative YAML test specifications into executed, asserted
//! results:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  spec file (.tspec / .tsuite)                                │
//! │    └── spec::RawSpec::from_file                              │
//! │          └── template::resolve      extends + deep merge     │
//! │                └── suite::expand    suite members            │
//! │                      └── data::generate   one spec per row   │
//! │                            └── variables::substitute         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  scheduler::Scheduler   global + per-protocol caps           │
//! │    └── per case: lifecycle setup → runner → extract →        │
//! │                  lifecycle teardown → assertions             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  registry::ProtocolRegistry   http, graphql, grpc, websocket │
//! │                               + plugins                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod assertion;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod path;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod spec;
pub mod suite;
pub mod template;
pub mod types;
pub mod validate;
pub mod variables;

pub use config::EngineConfig;
pub use engine::{Engine, ParseOptions, RunOptions, RunOutcome};
pub use error::{Error, Result};
pub use registry::{ProtocolPlugin, ProtocolRegistry, RunnerOptions, TestRunner, Transport};
pub use scheduler::{ScheduleOptions, Scheduler};
pub use spec::RawSpec;
pub use types::{AssertionResult, ResponseEnvelope, ScheduleResult, Summary, TestCase, TestResult};
