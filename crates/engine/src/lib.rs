//! Bladesheet Engine library.
//!
//! Keeps segmented progress controls on a character sheet in sync with the
//! documents that own them.
//!
//! ## Structure
//!
//! - `use_cases/` - Sync controller, snapshot projector, lifecycle and view state
//! - `infrastructure/` - Ports and in-memory adapters
//! - `config` - Environment configuration
//! - `app` - Application composition

pub mod app;
pub mod config;
pub mod infrastructure;
pub mod use_cases;

pub use app::App;
pub use config::EngineConfig;
