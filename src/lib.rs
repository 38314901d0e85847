//! tabgrove - sorts browser tabs into native tab groups.
//!
//! Tabs are matched to known categories by embedding similarity (LLM fallback),
//! placed into existing groups when a group title is close enough, and whatever
//! is left over is clustered bottom-up and named by the LLM.

pub mod ai_client;
pub mod cache;
pub mod categorizer;
pub mod clustering;
pub mod error;
pub mod host;
pub mod organizer;
pub mod placement;
pub mod settings;
pub mod similarity;
pub mod snapshot;
pub mod tabs;
pub mod utils;

pub use error::{Error, Result};
pub use organizer::{OrganizeReport, TabOrganizer};
