//! # Service Registry
//!
//! Explicit map from service name to [`ServiceDescriptor`], built once at startup and shared
//! read-only by the engine afterwards.
//!
//! ```text
//! "fileCopy"            -> { metadata, factory }
//! "lsmFileMetadata"     -> { metadata, factory }
//! "archivedLsmMetadata" -> { metadata, factory }
//! "mergeLsmPair"        -> { metadata, factory }
//! ```

pub mod service_registry;

pub use service_registry::{ProcessorFactory, ServiceDescriptor, ServiceRegistry};
