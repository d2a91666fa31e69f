//! Engine UI for homestack
//!
//! The provisioning itself lives in the `declarative` crate. This module
//! wraps it for the terminal:
//! 1. Diffing - show what a pass would change
//! 2. Executing - progress, confirmation and summaries

pub mod differ;
pub mod executor;

pub use differ::{display_diff, display_form, display_object_diff};
pub use executor::{PromptConfirm, SpinnerProgress, UiRetry, print_summary};
