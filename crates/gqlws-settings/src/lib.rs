//! # gqlws-settings
//!
//! Configuration for the gqlws subscription server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GqlWsSettings::default()`]
//! 2. **Settings file**: `~/.gqlws/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `GQLWS_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! let settings = gqlws_settings::load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
