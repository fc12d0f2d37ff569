//! Isolation host for isokit.
//!
//! This crate provides the isolation primitive the toolkit builds on:
//!
//! - [`Environment`]: an isolated execution space with its own modules,
//!   load context, resolution hooks and object table, driven by a dedicated
//!   worker thread
//! - [`ModuleImage`]: the on-disk module format (identity manifest plus an
//!   opaque payload)
//! - [`ObjectRef`]: a handle to an object constructed inside an environment
//! - [`ResolveHook`]: the "module not found" callback surface
//!
//! The host knows nothing about probe paths or load strategies; those live
//! one layer up in `iso_toolkit`.

mod environment;
mod error;
mod hook;
pub mod image;
mod module;
mod object;
mod worker;

pub use environment::{BindMode, Environment, EnvironmentId, EnvironmentSetup};
pub use error::{HostError, HostResult};
pub use hook::{HookId, ResolveHook};
pub use image::{simple_name, ImageManifest, ModuleImage, ModuleImageBuilder};
pub use module::{Binding, LoadedModule, ModuleHandle, ModuleId};
pub use object::{ObjectId, ObjectRef};
pub use worker::panic_message;
