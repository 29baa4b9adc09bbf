//! mirror Capture
//!
//! In-page mutation capture and synchronization engine. Keeps an
//! integer-id mirror of a live [`mirror_dom::DomTree`] in step with the
//! page while processing in small budgeted slices.
//!
//! # Example
//! ```rust,ignore
//! use mirror_capture::{Capture, CaptureConfig, MemorySink, SystemClock};
//!
//! let sink = MemorySink::new();
//! let mut capture = Capture::new(CaptureConfig::default(), Rc::new(SystemClock::new()), sink.clone());
//! capture.start()?;
//! capture.run_until_idle(&mut dom);
//! ```

mod config;
mod cssom;
mod discover;
mod engine;
mod error;
mod mutation;
mod session;
mod traverse;

pub mod encode;
pub mod layout;
pub mod node;
pub mod privacy;
pub mod registry;
pub mod scheduler;
pub mod time;

pub use config::CaptureConfig;
pub use encode::{
    AdoptionEvent, AdoptionTarget, ChangeRecord, EncodeSink, Encoded, Event, MemorySink, OutputBuffer,
    Source, StyleSheetEntry, StyleSheetOperation, StyleSheetState, ROOT_DOCUMENT_ID,
};
pub use engine::Capture;
pub use error::{CaptureError, Result};
pub use layout::{Layout, NoLayout};
pub use privacy::{DefaultPrivacy, Privacy, PrivacyClassifier};
pub use registry::{IdentityRegistry, NodeInfo, NodeMeta, NodeValue, Snapshot};
pub use time::{Clock, ManualClock, SystemClock};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
