//! Document engines.
//!
//! The core only needs three things from a document: load it from a path,
//! save it to a path, and know which kind it is. Everything else belongs to
//! the per-kind engines and the tool handlers built on them.

pub mod mail;
pub mod workbook;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use mail::MailMessage;
pub use workbook::Workbook;

/// Errors raised by the document engines.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("failed to encode document: {0}")]
    Encode(String),
}

/// Which engine a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Workbook,
    Mail,
}

impl DocumentKind {
    pub const NAMES: [&'static str; 2] = ["workbook", "mail"];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Workbook => "workbook",
            DocumentKind::Mail => "mail",
        }
    }

    /// Parse one of [`DocumentKind::NAMES`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "workbook" => Some(DocumentKind::Workbook),
            "mail" => Some(DocumentKind::Mail),
            _ => None,
        }
    }

    /// Infer the kind from a file extension: `.json` workbooks, `.eml` messages.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("json") {
            Some(DocumentKind::Workbook)
        } else if ext.eq_ignore_ascii_case("eml") {
            Some(DocumentKind::Mail)
        } else {
            None
        }
    }

    /// Extension written by this kind's engine.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Workbook => "json",
            DocumentKind::Mail => "eml",
        }
    }

    /// Article + noun, for messages.
    pub fn describe(self) -> &'static str {
        match self {
            DocumentKind::Workbook => "a workbook",
            DocumentKind::Mail => "a mail message",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live document of any supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Workbook(Workbook),
    Mail(MailMessage),
}

impl Document {
    /// Blank document of the given kind.
    pub fn blank(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Workbook => Document::Workbook(Workbook::new()),
            DocumentKind::Mail => Document::Mail(MailMessage::new()),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Workbook(_) => DocumentKind::Workbook,
            Document::Mail(_) => DocumentKind::Mail,
        }
    }

    /// Load a document of a known kind from `path`.
    pub fn load(kind: DocumentKind, path: &Path) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| DocumentError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let document = match kind {
            DocumentKind::Workbook => {
                Document::Workbook(Workbook::from_json(&text).map_err(parse_err)?)
            }
            DocumentKind::Mail => Document::Mail(MailMessage::parse(&text).map_err(parse_err)?),
        };
        tracing::debug!(path = %path.display(), kind = %kind, "document loaded");
        Ok(document)
    }

    /// Write the document to `path`.
    ///
    /// Content goes to a sibling temp file which is then renamed over the
    /// target, so a failed save leaves any existing file intact.
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let contents = match self {
            Document::Workbook(book) => book.to_json().map_err(DocumentError::Encode)?,
            Document::Mail(message) => message.render(),
        };
        let write_err = |source| DocumentError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        let result = std::fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(contents.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| std::fs::rename(&tmp, path));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        tracing::debug!(path = %path.display(), kind = %self.kind(), "document saved");
        Ok(())
    }

    /// Small JSON overview used by `session.info`.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Document::Workbook(book) => serde_json::json!({
                "sheets": book.sheet_names(),
                "cells": book.sheets().iter().map(|s| s.len()).sum::<usize>(),
            }),
            Document::Mail(message) => serde_json::json!({
                "subject": message.header("Subject"),
                "from": message.header("From"),
                "headers": message.headers().len(),
                "body_bytes": message.body().len(),
            }),
        }
    }

    pub fn as_workbook_mut(&mut self) -> Option<&mut Workbook> {
        match self {
            Document::Workbook(book) => Some(book),
            _ => None,
        }
    }

    pub fn as_mail_mut(&mut self) -> Option<&mut MailMessage> {
        match self {
            Document::Mail(message) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            DocumentKind::from_path(Path::new("/a/book.JSON")),
            Some(DocumentKind::Workbook)
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("note.eml")),
            Some(DocumentKind::Mail)
        );
        assert_eq!(DocumentKind::from_path(Path::new("report.xlsx")), None);
        assert_eq!(DocumentKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn kind_names_roundtrip() {
        for name in DocumentKind::NAMES {
            assert_eq!(DocumentKind::from_name(name).unwrap().as_str(), name);
        }
        assert!(DocumentKind::from_name("pdf").is_none());
    }

    #[test]
    fn save_then_load_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        let mut doc = Document::blank(DocumentKind::Workbook);
        doc.as_workbook_mut()
            .unwrap()
            .set("Sheet1", "B2".parse().unwrap(), workbook::CellValue::Number(4.0))
            .unwrap();
        doc.save(&path).unwrap();

        let loaded = Document::load(DocumentKind::Workbook, &path).unwrap();
        assert_eq!(loaded, doc);
        // No temp files left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Document::load(DocumentKind::Workbook, &path).unwrap_err();
        assert!(matches!(err, DocumentError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"), "got: {err}");
    }

    #[test]
    fn save_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.eml");
        let err = Document::blank(DocumentKind::Mail).save(&path).unwrap_err();
        assert!(matches!(err, DocumentError::Write { .. }));
    }

    #[test]
    fn summary_shapes() {
        let book = Document::blank(DocumentKind::Workbook).summary();
        assert_eq!(book["sheets"], serde_json::json!(["Sheet1"]));
        let mail = Document::blank(DocumentKind::Mail).summary();
        assert_eq!(mail["headers"], 0);
    }
}
