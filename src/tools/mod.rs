//! Tool definitions: each tool is a [`ToolDispatcher`] over its operations.

pub mod email;
pub mod session_ops;
pub mod spreadsheet;

use crate::dispatch::{ToolDispatcher, Toolbox};

impl Toolbox {
    /// The `session`, `spreadsheet` and `email` tools.
    pub fn standard() -> Self {
        Toolbox::new(vec![
            session_ops::tool(),
            spreadsheet::tool(),
            email::tool(),
        ])
    }
}

/// Names of the standard tools, in listing order.
pub const TOOL_NAMES: [&str; 3] = ["session", "spreadsheet", "email"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_toolbox_has_every_tool() {
        let toolbox = Toolbox::standard();
        let names: Vec<&str> = toolbox.tools().iter().map(ToolDispatcher::name).collect();
        assert_eq!(names, TOOL_NAMES);
        for tool in toolbox.tools() {
            assert!(!tool.operations().is_empty(), "{} has no operations", tool.name());
            assert!(!tool.description().is_empty());
        }
    }
}
