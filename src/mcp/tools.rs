// MCP tool parameter types

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::params::ParamSet;

/// Parameters shared by the `session`, `spreadsheet` and `email` tools.
///
/// Operation-specific parameters (`cell`, `value`, `name`, ...) are passed
/// alongside these at the top level and collected into `args`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ToolCallParams {
    /// Operation to run within the tool.
    #[schemars(description = "Operation name, case-insensitive (e.g. 'set_value', 'open').")]
    pub operation: String,

    /// File to operate on (path mode).
    #[schemars(description = "Document file path. Ignored when session_id is given.")]
    pub path: Option<String>,

    /// Open session to operate on (session mode).
    #[schemars(description = "Session id from session/open or session/new. Takes precedence over path.")]
    pub session_id: Option<String>,

    /// Where a path-mode write is saved; defaults to `path`.
    #[schemars(description = "Save the edited file here instead of overwriting path. Path mode only.")]
    pub output_path: Option<String>,

    /// Remaining operation-specific parameters.
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl ToolCallParams {
    /// Split into the operation name and the full parameter set the
    /// dispatcher sees.
    pub fn into_parts(self) -> (String, ParamSet) {
        let mut values = self.args;
        for (key, value) in [
            ("path", self.path),
            ("session_id", self.session_id),
            ("output_path", self.output_path),
        ] {
            if let Some(value) = value {
                values.insert(key.to_string(), Value::String(value));
            }
        }
        (self.operation, ParamSet::from(values))
    }
}
