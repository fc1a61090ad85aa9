//! The `session` tool: open, create, inspect, save and close live documents.

use std::path::PathBuf;

use serde_json::json;

use crate::dispatch::{Handler, ToolDispatcher, ToolOutput};
use crate::document::{Document, DocumentKind};
use crate::error::ToolError;
use crate::params::ParamSet;
use crate::resolve;
use crate::AppState;

pub fn tool() -> ToolDispatcher {
    ToolDispatcher::new(
        "session",
        "Manage in-memory editing sessions. Open a file or create a blank document, \
         pass the returned session_id to spreadsheet/email calls, then save and close.",
    )
    .with(Open)
    .with(New)
    .with(Close)
    .with(List)
    .with(Info)
    .with(Save)
}

fn session_id(params: &ParamSet) -> Result<String, ToolError> {
    params
        .required::<String>("session_id")
        .map(|s| s.trim().to_string())
}

pub struct Open;

impl Handler for Open {
    fn operation(&self) -> &str {
        "open"
    }

    fn summary(&self) -> &str {
        "Load a .json workbook or .eml message into a new session (path)"
    }

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
        let path = PathBuf::from(params.required::<String>("path")?);
        state.paths.check("path", &path)?;
        let id = state.sessions.open(&path)?;
        let info = state.sessions.info(&id)?;
        Ok(ToolOutput::new(
            format!("Opened {} as session {id}", path.display()),
            json!({ "session_id": id, "kind": info.kind, "source": info.source }),
        )
        .with_session_backed(true))
    }
}

pub struct New;

impl Handler for New {
    fn operation(&self) -> &str {
        "new"
    }

    fn summary(&self) -> &str {
        "Create a blank document in a new session (kind: workbook | mail)"
    }

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
        let name = params.required_choice("kind", &DocumentKind::NAMES)?;
        let kind = DocumentKind::from_name(name)
            .ok_or_else(|| ToolError::invalid("kind", name, "workbook or mail"))?;
        let id = state.sessions.insert(Document::blank(kind), None)?;
        Ok(ToolOutput::new(
            format!("Created blank {kind} session {id}"),
            json!({ "session_id": id, "kind": kind }),
        )
        .with_session_backed(true))
    }
}

pub struct Close;

impl Handler for Close {
    fn operation(&self) -> &str {
        "close"
    }

    fn summary(&self) -> &str {
        "Close a session and discard unsaved changes (session_id)"
    }

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
        let id = session_id(params)?;
        let info = state.sessions.close(&id)?;
        Ok(ToolOutput::new(
            format!("Closed session {id}"),
            json!({ "session_id": id, "kind": info.kind, "closed": true }),
        ))
    }
}

pub struct List;

impl Handler for List {
    fn operation(&self) -> &str {
        "list"
    }

    fn summary(&self) -> &str {
        "List open sessions"
    }

    fn handle(&self, state: &AppState, _params: &ParamSet) -> Result<ToolOutput, ToolError> {
        let sessions = state.sessions.list();
        Ok(ToolOutput::new(
            format!("{} open session(s)", sessions.len()),
            json!({ "count": sessions.len(), "sessions": sessions }),
        ))
    }
}

pub struct Info;

impl Handler for Info {
    fn operation(&self) -> &str {
        "info"
    }

    fn summary(&self) -> &str {
        "Describe one session and its document (session_id)"
    }

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
        let id = session_id(params)?;
        let (info, summary) = state
            .sessions
            .with_document(&id, |doc, info| Ok((info.clone(), doc.summary())))?;
        Ok(ToolOutput::new(
            format!("Session {id} holds {}", info.kind.describe()),
            json!({ "session": info, "document": summary }),
        )
        .with_session_backed(true))
    }
}

pub struct Save;

impl Handler for Save {
    fn operation(&self) -> &str {
        "save"
    }

    fn summary(&self) -> &str {
        "Write a session's document to disk (session_id, output_path?; defaults to the opened file)"
    }

    fn handle(&self, state: &AppState, params: &ParamSet) -> Result<ToolOutput, ToolError> {
        let id = session_id(params)?;
        let output = params.maybe::<String>("output_path")?.map(PathBuf::from);

        let dest = state.sessions.with_document(&id, |doc, info| {
            let (param, dest) = match (&output, &info.source) {
                (Some(out), _) => ("output_path", out.clone()),
                (None, Some(source)) => ("path", source.clone()),
                (None, None) => {
                    return Err(ToolError::Validation(format!(
                        "session '{id}' was not opened from a file; supply 'output_path'"
                    )))
                }
            };
            resolve::check_extension(param, &dest, doc.kind())?;
            state.paths.check(param, &dest)?;
            resolve::check_parent_exists(&dest)?;
            doc.save(&dest)?;
            Ok(dest)
        })?;

        tracing::info!(session = %id, path = %dest.display(), "session saved");
        Ok(ToolOutput::new(
            format!("Saved session {id} to {}", dest.display()),
            json!({ "session_id": id, "path": dest }),
        )
        .with_session_backed(true))
    }
}
