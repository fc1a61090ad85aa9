//! Workbook engine: ordered, uniquely named sheets of A1-addressed cells.
//!
//! On disk a workbook is a JSON object:
//!
//! ```json
//! { "sheets": [ { "name": "Sheet1", "cells": { "A1": "Region", "B1": 12.5 } } ] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Last addressable row (Excel limit).
pub const MAX_ROW: u32 = 1_048_576;
/// Last addressable column, `XFD` (Excel limit).
pub const MAX_COL: u32 = 16_384;
/// Longest accepted sheet name.
pub const MAX_SHEET_NAME: usize = 31;

const FORBIDDEN_SHEET_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Errors raised by workbook edits.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkbookError {
    #[error("no sheet named '{name}' (sheets: {available})")]
    SheetNotFound { name: String, available: String },
    #[error("a sheet named '{0}' already exists")]
    DuplicateSheet(String),
    #[error("invalid sheet name '{name}': {reason}")]
    InvalidSheetName { name: String, reason: String },
    #[error("cannot remove '{0}': a workbook must keep at least one sheet")]
    LastSheet(String),
    #[error("sheet index {index} is out of range (0..={max})")]
    IndexOutOfRange { index: usize, max: usize },
    #[error("sheet '{0}' is full: row 1048576 is already in use")]
    SheetFull(String),
}

/// A cell address, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Result<Self, String> {
        if row == 0 || row > MAX_ROW {
            return Err(format!("row {row} is out of range (1..={MAX_ROW})"));
        }
        if col == 0 || col > MAX_COL {
            return Err(format!("column {col} is out of range (1..={MAX_COL})"));
        }
        Ok(Self { row, col })
    }
}

fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

impl FromStr for CellRef {
    type Err = String;

    /// Parses `B7`, `b7` and `$B$7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().replace('$', "");
        let split = text
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| format!("'{s}' is not a cell reference like A1"))?;
        let (letters, digits) = text.split_at(split);
        if letters.is_empty()
            || letters.len() > 3
            || !letters.chars().all(|c| c.is_ascii_alphabetic())
            || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return Err(format!("'{s}' is not a cell reference like A1"));
        }
        let col = letters
            .chars()
            .fold(0u32, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1));
        let row: u32 = digits
            .parse()
            .map_err(|_| format!("'{s}' has an out-of-range row"))?;
        CellRef::new(row, col).map_err(|reason| format!("'{s}': {reason}"))
    }
}

impl Serialize for CellRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Rectangular block of cells, corners inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn contains(&self, cell: CellRef) -> bool {
        (self.start.row..=self.end.row).contains(&cell.row)
            && (self.start.col..=self.end.col).contains(&cell.col)
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for CellRange {
    type Err = String;

    /// Parses `A1:C3` (corners in any order) or a single cell.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = match s.split_once(':') {
            Some((a, b)) => (a.parse::<CellRef>()?, b.parse::<CellRef>()?),
            None => {
                let cell = s.parse::<CellRef>()?;
                (cell, cell)
            }
        };
        Ok(CellRange {
            start: CellRef {
                row: a.row.min(b.row),
                col: a.col.min(b.col),
            },
            end: CellRef {
                row: a.row.max(b.row),
                col: a.col.max(b.col),
            },
        })
    }
}

/// Value stored in a non-empty cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Build from a JSON scalar. Null, arrays and objects have no cell form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(CellValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(CellValue::Number),
            serde_json::Value::String(s) => Some(CellValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Number(n) => serde_json::json!(n),
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// One named sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    pub name: String,
    #[serde(default)]
    cells: BTreeMap<CellRef, CellValue>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn get(&self, cell: CellRef) -> Option<&CellValue> {
        self.cells.get(&cell)
    }

    /// Number of non-empty cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Highest row holding a value, 0 for an empty sheet.
    pub fn last_row(&self) -> u32 {
        self.cells.keys().map(|c| c.row).max().unwrap_or(0)
    }

    /// Values in `range`, row-major, `None` for empty cells.
    pub fn range(&self, range: CellRange) -> Vec<Vec<Option<&CellValue>>> {
        (range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .map(|col| self.cells.get(&CellRef { row, col }))
                    .collect()
            })
            .collect()
    }

    /// Empty every cell in `range`, returning how many held a value.
    pub fn clear(&mut self, range: CellRange) -> usize {
        let before = self.cells.len();
        self.cells.retain(|cell, _| !range.contains(*cell));
        before - self.cells.len()
    }
}

/// A workbook: at least one sheet, names unique ignoring case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// A workbook with a single empty `Sheet1`.
    pub fn new() -> Self {
        Self {
            sheets: vec![Worksheet::new("Sheet1")],
        }
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        let book: Workbook = serde_json::from_str(text).map_err(|e| e.to_string())?;
        if book.sheets.is_empty() {
            return Err("workbook has no sheets".into());
        }
        for (i, sheet) in book.sheets.iter().enumerate() {
            validate_sheet_name(&sheet.name).map_err(|e| e.to_string())?;
            if book.sheets[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&sheet.name))
            {
                return Err(WorkbookError::DuplicateSheet(sheet.name.clone()).to_string());
            }
        }
        Ok(book)
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    fn position(&self, name: &str) -> Result<usize, WorkbookError> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| WorkbookError::SheetNotFound {
                name: name.to_string(),
                available: self.sheet_names().join(", "),
            })
    }

    /// Look a sheet up by name (case-insensitive), or take the first sheet.
    pub fn sheet(&self, name: Option<&str>) -> Result<&Worksheet, WorkbookError> {
        let idx = match name {
            Some(name) => self.position(name)?,
            None => 0,
        };
        Ok(&self.sheets[idx])
    }

    pub fn sheet_mut(&mut self, name: Option<&str>) -> Result<&mut Worksheet, WorkbookError> {
        let idx = match name {
            Some(name) => self.position(name)?,
            None => 0,
        };
        Ok(&mut self.sheets[idx])
    }

    /// Insert a new empty sheet at `index` (default: end). Returns its index.
    pub fn add_sheet(&mut self, name: &str, index: Option<usize>) -> Result<usize, WorkbookError> {
        validate_sheet_name(name)?;
        if self.position(name).is_ok() {
            return Err(WorkbookError::DuplicateSheet(name.to_string()));
        }
        let index = index.unwrap_or(self.sheets.len());
        if index > self.sheets.len() {
            return Err(WorkbookError::IndexOutOfRange {
                index,
                max: self.sheets.len(),
            });
        }
        self.sheets.insert(index, Worksheet::new(name));
        Ok(index)
    }

    pub fn remove_sheet(&mut self, name: &str) -> Result<Worksheet, WorkbookError> {
        let idx = self.position(name)?;
        if self.sheets.len() == 1 {
            return Err(WorkbookError::LastSheet(self.sheets[idx].name.clone()));
        }
        Ok(self.sheets.remove(idx))
    }

    pub fn rename_sheet(&mut self, name: &str, new_name: &str) -> Result<(), WorkbookError> {
        validate_sheet_name(new_name)?;
        let idx = self.position(name)?;
        if let Ok(other) = self.position(new_name) {
            if other != idx {
                return Err(WorkbookError::DuplicateSheet(new_name.to_string()));
            }
        }
        self.sheets[idx].name = new_name.to_string();
        Ok(())
    }

    /// Write one cell, returning the previous value.
    pub fn set(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: CellValue,
    ) -> Result<Option<CellValue>, WorkbookError> {
        let sheet = self.sheet_mut(Some(sheet))?;
        Ok(sheet.cells.insert(cell, value))
    }

    /// Write `values` into the first row below the last used row of a sheet,
    /// starting at column A. Returns the row number written.
    ///
    /// `values` must hold at most [`MAX_COL`] entries.
    pub fn append_row(
        &mut self,
        sheet: Option<&str>,
        values: Vec<Option<CellValue>>,
    ) -> Result<u32, WorkbookError> {
        let sheet = self.sheet_mut(sheet)?;
        let last = sheet.last_row();
        if last >= MAX_ROW {
            return Err(WorkbookError::SheetFull(sheet.name.clone()));
        }
        let row = last + 1;
        for (i, value) in values.into_iter().enumerate() {
            let Some(value) = value else { continue };
            sheet.cells.insert(CellRef { row, col: i as u32 + 1 }, value);
        }
        Ok(row)
    }
}

/// Sheet names follow spreadsheet rules: 1-31 chars, none of `[]:*?/\`.
pub fn validate_sheet_name(name: &str) -> Result<(), WorkbookError> {
    let invalid = |reason: &str| WorkbookError::InvalidSheetName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.chars().count() > MAX_SHEET_NAME {
        return Err(invalid(&format!("longer than {MAX_SHEET_NAME} characters")));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_SHEET_CHARS.contains(c)) {
        return Err(invalid(&format!("contains forbidden character '{c}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> CellRef {
        s.parse().unwrap()
    }

    #[test]
    fn parse_cell_refs() {
        assert_eq!(cell("A1"), CellRef { row: 1, col: 1 });
        assert_eq!(cell("b7"), CellRef { row: 7, col: 2 });
        assert_eq!(cell("$AA$10"), CellRef { row: 10, col: 27 });
        assert_eq!(cell("XFD1048576"), CellRef { row: MAX_ROW, col: MAX_COL });
    }

    #[test]
    fn reject_bad_cell_refs() {
        for bad in ["", "1A", "A", "A0", "XFE1", "A1048577", "A-1", "ABCD1", "A1B"] {
            assert!(bad.parse::<CellRef>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn cell_ref_display_roundtrip() {
        for text in ["A1", "Z9", "AA10", "AZ3", "XFD1048576"] {
            assert_eq!(cell(text).to_string(), text);
        }
    }

    #[test]
    fn ranges_normalize_corners() {
        let range: CellRange = "C3:A1".parse().unwrap();
        assert_eq!(range.to_string(), "A1:C3");
        assert_eq!((range.rows(), range.cols()), (3, 3));
        assert!(range.contains(cell("B2")));
        assert!(!range.contains(cell("D1")));
        let single: CellRange = "B2".parse().unwrap();
        assert_eq!((single.rows(), single.cols()), (1, 1));
    }

    #[test]
    fn json_format() {
        let text = r#"{"sheets":[{"name":"Data","cells":{"A1":"Region","B1":12.5,"C1":true}}]}"#;
        let book = Workbook::from_json(text).unwrap();
        let sheet = book.sheet(Some("data")).unwrap();
        assert_eq!(sheet.get(cell("A1")), Some(&CellValue::Text("Region".into())));
        assert_eq!(sheet.get(cell("B1")), Some(&CellValue::Number(12.5)));
        assert_eq!(sheet.get(cell("C1")), Some(&CellValue::Bool(true)));

        let again = Workbook::from_json(&book.to_json().unwrap()).unwrap();
        assert_eq!(again, book);
    }

    #[test]
    fn json_rejects_invalid_workbooks() {
        assert!(Workbook::from_json(r#"{"sheets":[]}"#).is_err());
        assert!(Workbook::from_json(r#"{"sheets":[{"name":"a"},{"name":"A"}]}"#).is_err());
        assert!(Workbook::from_json(r#"{"sheets":[{"name":"a","cells":{"1A":1}}]}"#).is_err());
    }

    #[test]
    fn sheet_management() {
        let mut book = Workbook::new();
        assert_eq!(book.add_sheet("Totals", None).unwrap(), 1);
        assert_eq!(book.add_sheet("Intro", Some(0)).unwrap(), 0);
        assert_eq!(book.sheet_names(), vec!["Intro", "Sheet1", "Totals"]);

        assert_eq!(
            book.add_sheet("totals", None).unwrap_err(),
            WorkbookError::DuplicateSheet("totals".into())
        );
        assert!(matches!(
            book.add_sheet("Later", Some(9)).unwrap_err(),
            WorkbookError::IndexOutOfRange { index: 9, max: 3 }
        ));

        book.rename_sheet("sheet1", "Raw").unwrap();
        book.rename_sheet("Raw", "RAW").unwrap();
        assert!(book.rename_sheet("RAW", "Totals").is_err());
        book.remove_sheet("Intro").unwrap();
        assert_eq!(book.sheet_names(), vec!["RAW", "Totals"]);
    }

    #[test]
    fn removing_last_sheet_is_refused() {
        let mut book = Workbook::new();
        assert_eq!(
            book.remove_sheet("Sheet1").unwrap_err(),
            WorkbookError::LastSheet("Sheet1".into())
        );
        assert_eq!(book.sheets().len(), 1);
    }

    #[test]
    fn sheet_name_rules() {
        assert!(validate_sheet_name("Q1 2026").is_ok());
        assert!(validate_sheet_name(" ").is_err());
        assert!(validate_sheet_name("a/b").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
    }

    #[test]
    fn append_row_goes_below_last_used_row() {
        let mut book = Workbook::new();
        book.set("Sheet1", cell("C4"), CellValue::Number(1.0)).unwrap();
        let row = book
            .append_row(None, vec![Some(CellValue::Text("a".into())), None, Some(CellValue::Bool(false))])
            .unwrap();
        assert_eq!(row, 5);
        let sheet = book.sheet(None).unwrap();
        assert_eq!(sheet.get(cell("A5")), Some(&CellValue::Text("a".into())));
        assert_eq!(sheet.get(cell("B5")), None);
        assert_eq!(sheet.get(cell("C5")), Some(&CellValue::Bool(false)));
    }

    #[test]
    fn append_row_on_full_sheet_fails() {
        let mut book = Workbook::new();
        let last = CellRef::new(MAX_ROW, 1).unwrap();
        book.set("Sheet1", last, CellValue::Text("keep".into())).unwrap();

        let err = book
            .append_row(None, vec![Some(CellValue::Text("clobber".into()))])
            .unwrap_err();
        assert_eq!(err, WorkbookError::SheetFull("Sheet1".into()));
        assert_eq!(
            book.sheet(None).unwrap().get(last),
            Some(&CellValue::Text("keep".into()))
        );
    }

    #[test]
    fn range_and_clear() {
        let mut book = Workbook::new();
        book.set("Sheet1", cell("A1"), CellValue::Number(1.0)).unwrap();
        book.set("Sheet1", cell("B2"), CellValue::Number(2.0)).unwrap();
        book.set("Sheet1", cell("D4"), CellValue::Number(4.0)).unwrap();
        let range: CellRange = "A1:B2".parse().unwrap();

        let grid = book.sheet(None).unwrap().range(range);
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0][0], Some(&CellValue::Number(1.0)));
        assert_eq!(grid[0][1], None);

        assert_eq!(book.sheet_mut(None).unwrap().clear(range), 2);
        assert_eq!(book.sheet(None).unwrap().len(), 1);
    }

    #[test]
    fn set_returns_previous_value() {
        let mut book = Workbook::new();
        assert_eq!(book.set("Sheet1", cell("A1"), CellValue::Number(1.0)).unwrap(), None);
        assert_eq!(
            book.set("Sheet1", cell("A1"), CellValue::Number(2.0)).unwrap(),
            Some(CellValue::Number(1.0))
        );
        assert!(matches!(
            book.set("Nope", cell("A1"), CellValue::Number(0.0)).unwrap_err(),
            WorkbookError::SheetNotFound { .. }
        ));
    }
}
