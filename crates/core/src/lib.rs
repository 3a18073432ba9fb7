// crates/core/src/lib.rs
//! Stamper core library.
//!
//! Domain logic for the batch watermarking service: watermark templates and
//! their on-disk store, recursive image discovery, output-path mapping, and
//! the pixel-level watermark composition itself. The HTTP server and job
//! orchestration live in `stamper-server`.

pub mod discovery;
pub mod error;
pub mod format;
pub mod store;
pub mod template;
pub mod watermark;

pub use discovery::{enumerate_images, WorkItem, IMAGE_EXTENSIONS};
pub use error::{ApplyError, DiscoveryError, FormatError, TemplateError};
pub use format::{OutputFormat, OutputMap};
pub use store::TemplateStore;
pub use template::{Position, Template, TemplateKind};
