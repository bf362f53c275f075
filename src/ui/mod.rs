//! Terminal output for build progress
//!
//! Uses `cliclack` for styled output in interactive terminals, with plain
//! line-oriented output in CI and when output is piped. Backend command
//! output is streamed separately by the image store.

mod context;
mod output;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_error, outro_success, remark, step_banner, step_cached, step_info,
    step_ok, step_warn,
};
pub use prompts::confirm;
