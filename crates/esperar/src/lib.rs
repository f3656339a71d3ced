//! Esperar: lazy locators, named commands and bounded polling
//!
//! Esperar (Spanish: "to wait") turns every element operation into
//! "keep trying until it works or the budget runs out". Locators are
//! descriptions, not handles: they are resolved again on every attempt, so a
//! re-rendered document never leaves a caller holding a dead reference.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    ESPERAR Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Locator    │    │ Retry      │    │ Command    │            │
//! │   │ Chain      │───►│ Dispatcher │───►│ Registry   │            │
//! │   │ (lazy)     │    │ (deadline) │    │ (by name)  │            │
//! │   └────────────┘    └─────┬──────┘    └─────┬──────┘            │
//! │                           │                 ▼                   │
//! │                  ┌────────▼──────┐   ┌────────────┐             │
//! │                  │ Failure       │   │ Resolution │             │
//! │                  │ Reporter      │◄──│ Context    │             │
//! │                  └───────────────┘   └────────────┘             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use esperar::prelude::*;
//!
//! let doc = MemoryDocument::new();
//! let form = doc.append(None, NodeSpec::new("form").id("login")).unwrap();
//! doc.append(Some(&form), NodeSpec::new("button").text("Sign in")).unwrap();
//!
//! let dispatcher = RetryDispatcher::new(Arc::new(CommandRegistry::with_builtins()));
//! let button = dispatcher
//!     .element(&doc, LocatorChain::root("#login"))
//!     .find("button");
//! button.should(&condition::text("sign in")).unwrap();
//! button.click().unwrap();
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Collection conditions over every match of a selector
#[allow(clippy::missing_errors_doc)]
pub mod collection;

/// Commands and the built-in command set
#[allow(clippy::missing_errors_doc)]
pub mod command;

/// Element conditions and text normalization
#[allow(clippy::missing_errors_doc)]
pub mod condition;

/// Layered configuration
#[allow(clippy::missing_errors_doc)]
pub mod config;

/// Subscriber setup
#[allow(clippy::missing_errors_doc)]
pub mod logging;

#[allow(clippy::missing_errors_doc)]
mod dispatcher;
#[allow(clippy::missing_errors_doc)]
mod element;
mod locator;
#[allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
mod memory;
#[allow(clippy::missing_errors_doc)]
mod registry;
#[allow(clippy::missing_errors_doc)]
mod report;
mod result;
mod session;

pub use collection::CollectionCondition;
pub use command::{Command, CommandOutput, Invocation, Resolution, RetryOutcome};
pub use condition::{Check, Condition, Verdict};
pub use config::Configuration;
pub use dispatcher::{Classification, PollState, RetryConfig, RetryDispatcher};
pub use element::{Element, Elements};
pub use locator::{ElementsCollection, LocatorChain, Selector};
pub use logging::LogFormat;
pub use memory::{MemoryDocument, NodeSpec};
pub use registry::CommandRegistry;
pub use report::{Artifact, ArtifactKind, FailureReporter, SnapshotReporter};
pub use result::{EsperarError, EsperarResult};
pub use session::{ElementHandle, ResolutionContext};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::collection::{self, CollectionCondition};
    pub use super::command::{Command, CommandOutput, Invocation, Resolution, RetryOutcome};
    pub use super::condition::{self, Check, Condition, Verdict};
    pub use super::config::Configuration;
    pub use super::dispatcher::{RetryConfig, RetryDispatcher};
    pub use super::element::{Element, Elements};
    pub use super::locator::{ElementsCollection, LocatorChain, Selector};
    pub use super::memory::{MemoryDocument, NodeSpec};
    pub use super::registry::CommandRegistry;
    pub use super::report::{Artifact, ArtifactKind, FailureReporter, SnapshotReporter};
    pub use super::result::{EsperarError, EsperarResult};
    pub use super::session::{ElementHandle, ResolutionContext};
}
