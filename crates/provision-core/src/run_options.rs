use serde::Serialize;
use serde_yaml::Value;

/// Reserved entry key: extra attempts after the first.
pub const RETRIES_KEY: &str = "retries";
/// Reserved entry key: `continue` keeps going after an exhausted failure.
pub const ON_ERROR_KEY: &str = "on_error";

// ---------------------------------------------------------------------------
// OnError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Abort,
    Continue,
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-entry execution modifiers.
///
/// `retries = 0` means one attempt total, `retries = 2` up to three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunOptions {
    pub retries: u32,
    pub on_error: OnError,
}

impl RunOptions {
    /// Split the reserved keys off an entry's value.
    ///
    /// Only mapping values carry options; scalars and lists are returned
    /// unchanged with default options. `on_error` values other than
    /// `continue` mean abort.
    pub fn extract(value: &Value) -> Result<(RunOptions, Value), String> {
        let Value::Mapping(mapping) = value else {
            return Ok((RunOptions::default(), value.clone()));
        };
        let mut rest = mapping.clone();
        let mut options = RunOptions::default();

        if let Some(retries) = rest.shift_remove(RETRIES_KEY) {
            options.retries = match &retries {
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| format!("retries must be a non-negative integer, got {n}"))?,
                Value::Null => 0,
                other => return Err(format!("retries must be an integer, got {other:?}")),
            };
        }
        if let Some(on_error) = rest.shift_remove(ON_ERROR_KEY) {
            if on_error.as_str() == Some("continue") {
                options.on_error = OnError::Continue;
            }
        }
        Ok((options, Value::Mapping(rest)))
    }
}
