//! Key command - print the cache key a step would get

use crate::cache::{StepRequest, DEFAULT_KEY_LENGTH};
use crate::cli::args::KeyArgs;
use crate::error::KilnResult;
use serde_json::Value;

/// Execute the key command
pub async fn execute(args: KeyArgs) -> KilnResult<()> {
    let length = args.length.unwrap_or(DEFAULT_KEY_LENGTH);
    let image = args.image.clone();
    println!("{}", step_request(args).key(&image, length));
    Ok(())
}

/// Extra values are read as JSON when they parse, otherwise as strings
fn extra_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn step_request(args: KeyArgs) -> StepRequest {
    let mut step = StepRequest::new(args.command);
    for (k, v) in args.env {
        step = step.env(k, v);
    }
    for (k, v) in args.extra {
        step = step.extra(k, extra_value(v));
    }
    step
}
