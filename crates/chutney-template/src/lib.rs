//! Chutney Config Templates
//!
//! Turns a node's template plus its bindings into the daemon's config file.
//!
//! # Syntax
//!
//! - `$name` and `${name}` substitute a bound value
//! - `${include:other}` inlines another template from the search path
//! - `$$` is a literal dollar sign
//!
//! Includes are resolved before substitution, so included text is itself a
//! template. Substituted values are never scanned again. Include cycles and
//! nesting beyond [`MAX_INCLUDE_DEPTH`] are errors.
//!
//! # Bindings
//!
//! Values are looked up in four layers, highest precedence first:
//! 1. node-specific computed values (nick, ports, directories)
//! 2. global settings (listen addresses, network-wide authority lines)
//! 3. environment overrides
//! 4. declared defaults
//!
//! A placeholder with no binding is a [`RenderError::MissingVariable`], never
//! an empty substitution.

mod archive;
mod bindings;
mod error;
mod filter;
mod loader;
mod renderer;
mod template;

pub use archive::create_nodes_dir;
pub use bindings::{BindingSource, Bindings};
pub use error::{RenderError, Result};
pub use filter::OptionFilter;
pub use loader::{TemplateLoader, MAX_INCLUDE_DEPTH};
pub use renderer::{make_private_dir, RenderedConfig, Renderer, NETWORK_VARS};
pub use template::{Segment, Template};
