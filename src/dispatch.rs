use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::document::DocumentKind;
use crate::error::ToolError;
use crate::params::ParamSet;
use crate::resolve::{self, Access, DocumentContext, DocumentTarget};
use crate::AppState;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Result envelope returned by every operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    /// Short human-readable summary of what happened.
    pub message: String,
    /// Operation-specific payload.
    pub data: Value,
    /// True when the call ran against a live session rather than a file.
    pub session_backed: bool,
}

impl ToolOutput {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
            session_backed: false,
        }
    }

    pub fn with_session_backed(mut self, session_backed: bool) -> Self {
        self.session_backed = session_backed;
        self
    }
}

// ---------------------------------------------------------------------------
// Handler contracts
// ---------------------------------------------------------------------------

/// One named operation within a tool.
pub trait Handler: Send + Sync {
    /// Operation name as registered (matched case-insensitively).
    fn operation(&self) -> &str;

    /// One-line description for listings.
    fn summary(&self) -> &str;

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError>;
}

/// An operation that edits or reads one document.
///
/// `parse` sees only the parameters and must reject every bad input; `apply`
/// runs after the document has been resolved and performs one domain action.
/// Wrap with [`DocumentHandler`] to register it.
pub trait DocumentOperation: Send + Sync {
    type Args;

    const NAME: &'static str;
    const SUMMARY: &'static str;
    const KIND: DocumentKind;
    const ACCESS: Access;

    fn parse(&self, params: &ParamSet) -> Result<Self::Args, ToolError>;

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: Self::Args,
    ) -> Result<ToolOutput, ToolError>;
}

/// Adapts a [`DocumentOperation`] to the [`Handler`] contract.
pub struct DocumentHandler<O>(pub O);

impl<O: DocumentOperation> Handler for DocumentHandler<O> {
    fn operation(&self) -> &str {
        O::NAME
    }

    fn summary(&self) -> &str {
        O::SUMMARY
    }

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
        // All validation happens here, before any file is touched.
        let target = DocumentTarget::from_params(params)?;
        let args = self.0.parse(params)?;
        resolve::with_document(state, &target, O::KIND, O::ACCESS, |ctx| {
            let session_backed = ctx.is_session_backed();
            self.0
                .apply(ctx, args)
                .map(|out| out.with_session_backed(session_backed))
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("operation '{operation}' is already registered for tool '{tool}'")]
pub struct DuplicateOperation {
    pub tool: String,
    pub operation: String,
}

/// Name-to-handler registry for one tool.
pub struct ToolDispatcher {
    tool: &'static str,
    description: &'static str,
    handlers: HashMap<String, Arc<dyn Handler>>,
    /// Normalized names in registration order, for listings.
    order: Vec<String>,
}

impl ToolDispatcher {
    pub fn new(tool: &'static str, description: &'static str) -> Self {
        Self {
            tool,
            description,
            handlers: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.tool
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Register a handler. A duplicate name keeps the first handler.
    pub fn register(&mut self, handler: impl Handler + 'static) {
        if let Err(e) = self.try_register(handler) {
            tracing::warn!("{e}; keeping the first registration");
        }
    }

    pub fn try_register(&mut self, handler: impl Handler + 'static) -> Result<(), DuplicateOperation> {
        let key = normalize(handler.operation());
        if self.handlers.contains_key(&key) {
            return Err(DuplicateOperation {
                tool: self.tool.to_string(),
                operation: handler.operation().to_string(),
            });
        }
        self.order.push(key.clone());
        self.handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Builder form of [`ToolDispatcher::register`].
    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Builder shorthand for a [`DocumentOperation`].
    pub fn with_document<O: DocumentOperation + 'static>(self, op: O) -> Self {
        self.with(DocumentHandler(op))
    }

    /// `(name, summary)` pairs in registration order.
    pub fn operations(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .filter_map(|key| self.handlers.get(key))
            .map(|h| (h.operation(), h.summary()))
            .collect()
    }

    pub fn operation_names(&self) -> Vec<&str> {
        self.operations().into_iter().map(|(name, _)| name).collect()
    }

    /// Look up `operation` (case-insensitively) and run it.
    pub fn execute(
        &self,
        operation: &str,
        state: &AppState,
        params: &ParamSet,
    ) -> Result<ToolOutput, ToolError> {
        if operation.trim().is_empty() {
            return Err(ToolError::missing("operation"));
        }
        let key = normalize(operation);
        let handler = self.handlers.get(&key).ok_or_else(|| {
            ToolError::Validation(format!(
                "Unknown operation '{}' for tool '{}'. Expected one of: {}.",
                operation,
                self.tool,
                self.operation_names().join(", ")
            ))
        })?;
        tracing::debug!(tool = self.tool, operation = %key, "dispatch");
        handler.handle(state, params)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Toolbox
// ---------------------------------------------------------------------------

/// Every tool the server exposes, built once at startup.
pub struct Toolbox {
    tools: Vec<ToolDispatcher>,
}

impl Toolbox {
    pub fn new(tools: Vec<ToolDispatcher>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &[ToolDispatcher] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Result<&ToolDispatcher, ToolError> {
        let wanted = name.trim();
        self.tools
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
                ToolError::Validation(format!(
                    "Unknown tool '{}'. Expected one of: {}.",
                    name,
                    names.join(", ")
                ))
            })
    }

    /// Run one call end to end.
    pub fn call(
        &self,
        tool: &str,
        operation: &str,
        state: &AppState,
        params: &ParamSet,
    ) -> Result<ToolOutput, ToolError> {
        self.tool(tool)?.execute(operation, state, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Handler for Echo {
        fn operation(&self) -> &str {
            self.name
        }

        fn summary(&self) -> &str {
            "echo the parameters"
        }

        fn handle(&self, _state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text: String = params.optional("text", String::new())?;
            Ok(ToolOutput::new(self.name, json!({ "text": text })))
        }
    }

    fn echo(name: &'static str) -> (Echo, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Echo {
                name,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new("demo", "test tool")
            .with(echo("Add").0)
            .with(echo("remove").0)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let d = dispatcher();
        let state = AppState::default();
        let params = ParamSet::new();
        for name in ["add", "ADD", "Add", " aDd "] {
            let out = d.execute(name, &state, &params).unwrap();
            assert_eq!(out.message, "Add");
        }
    }

    #[test]
    fn unknown_operation_names_the_literal_string() {
        let d = dispatcher();
        let err = d
            .execute("Frobnicate", &AppState::default(), &ParamSet::new())
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("Frobnicate"), "got: {msg}");
        assert!(msg.contains("Add, remove"), "got: {msg}");
    }

    #[test]
    fn blank_operation_is_missing_parameter() {
        let err = dispatcher()
            .execute("  ", &AppState::default(), &ParamSet::new())
            .unwrap_err();
        assert!(err.to_string().contains("'operation'"), "got: {err}");
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let (first, first_calls) = echo("add");
        let (second, second_calls) = echo("ADD");
        let mut d = ToolDispatcher::new("demo", "test tool");
        d.try_register(first).unwrap();
        let err = d.try_register(second).unwrap_err();
        assert_eq!(err.operation, "ADD");

        let (third, third_calls) = echo("Add");
        d.register(third);
        d.execute("add", &AppState::default(), &ParamSet::new())
            .unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(d.operation_names(), vec!["add"]);
    }

    #[test]
    fn listing_keeps_registration_order() {
        assert_eq!(dispatcher().operation_names(), vec!["Add", "remove"]);
    }

    #[test]
    fn toolbox_routes_by_tool_name() {
        let toolbox = Toolbox::new(vec![dispatcher()]);
        let params = ParamSet::from_value(json!({ "text": "hi" })).unwrap();
        let out = toolbox
            .call("DEMO", "remove", &AppState::default(), &params)
            .unwrap();
        assert_eq!(out.data, json!({ "text": "hi" }));
        assert!(!out.session_backed);

        let err = toolbox
            .call("nope", "add", &AppState::default(), &params)
            .unwrap_err();
        assert!(err.to_string().contains("'nope'"), "got: {err}");
    }

    #[test]
    fn envelope_serializes_snake_case() {
        let out = ToolOutput::new("ok", json!(1)).with_session_backed(true);
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({ "message": "ok", "data": 1, "session_backed": true })
        );
    }
}
