#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod accumulator;
pub mod api;
pub mod applier;
pub mod artifact;
pub mod bounded_set;
pub mod config;
pub mod constants;
pub mod escalation;
pub mod kernel;
pub mod logging;
pub mod ndjson_layer;
pub mod pending;
pub mod playback;
pub mod push;
pub mod reconciler;
pub mod redaction;
pub mod retry;
pub mod str_utils;
pub mod types;
pub mod wire;
pub mod ws;

pub use types::*;

pub use config::{Args, ReconcileConfig};
pub use kernel::{Collaborators, ConversationKernel, KernelHandle, UiEvent};
