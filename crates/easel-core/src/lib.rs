//! Easel Core Library
//!
//! Core services of the Easel editor shell, independent of any GUI
//! framework: every process (the main process and each window) runs the
//! same set.
//!
//! # Modules
//!
//! - [`ipc`] - Addressed messaging, request/reply sessions and dispatch
//! - [`packages`] - Package discovery, dependency resolution and loading
//! - [`selection`] - Per-type selection replicated across processes
//! - [`undo`] - Grouped undo/redo history
//! - [`context`] - Per-process wiring of the services above
//! - [`events`] - Event sink trait for decoupling from the transport
//! - [`config`] - Application configuration
//! - [`error`] - Error types

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod ipc;
pub mod packages;
pub mod selection;
pub mod undo;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::ProcessContext;
pub use error::{AppError, IpcError, Result};
pub use events::{EventSink, MemoryEventSink, NoOpEventSink, StdoutEventSink};
pub use ipc::{Address, Dispatcher, Endpoint, Message, Router, SendOptions, WindowId};
pub use packages::{PackageError, PackageLoader, PackageManifest};
pub use selection::{SelectOptions, SelectionCoordinator, SelectionEvent};
pub use undo::{Command, UndoCoordinator, UndoError};
