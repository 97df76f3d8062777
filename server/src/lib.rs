//! Validation orchestration core of the klog language server.
//!
//! The server consumes LSP document lifecycle events, resolves the effective
//! `klog` configuration per document, runs the external validator over the
//! document text, and publishes the interpreted result as diagnostics. The
//! validator itself is an opaque collaborator; this crate owns everything
//! between the editor host and that subprocess.

pub mod codec;

pub(crate) mod capabilities;
pub(crate) mod diagnostics;
pub(crate) mod document;
pub(crate) mod interpret;
pub(crate) mod invoke;
pub(crate) mod protocol;
pub(crate) mod settings;
pub(crate) mod version;

mod session;

pub use session::Session;
