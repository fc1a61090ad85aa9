//! The `spreadsheet` tool over the workbook engine.

use serde_json::{json, Value};

use crate::dispatch::{DocumentOperation, ToolDispatcher, ToolOutput};
use crate::document::workbook::{
    self, CellRange, CellRef, CellValue, Workbook, WorkbookError, MAX_COL,
};
use crate::document::DocumentKind;
use crate::error::ToolError;
use crate::params::{FromParam, ParamSet};
use crate::resolve::{Access, DocumentContext};

/// Cells a single `get_range` may return.
pub const MAX_RANGE_CELLS: u64 = 10_000;

const CELL_EXPECTED: &str = "a cell reference from A1 to XFD1048576";
const RANGE_EXPECTED: &str = "a range like A1:C3";
const SHEET_NAME_EXPECTED: &str = "1-31 characters, none of [ ] : * ? / \\";

pub fn tool() -> ToolDispatcher {
    ToolDispatcher::new(
        "spreadsheet",
        "Read and edit .json workbooks: sheets plus A1-addressed cells holding text, \
         numbers or booleans. Address a file with path (output_path to save elsewhere) \
         or an open workbook with session_id.",
    )
    .with_document(ListSheets)
    .with_document(AddSheet)
    .with_document(RemoveSheet)
    .with_document(RenameSheet)
    .with_document(SetValue)
    .with_document(GetValue)
    .with_document(GetRange)
    .with_document(ClearRange)
    .with_document(AppendRow)
}

fn workbook_error(e: WorkbookError) -> ToolError {
    match e {
        WorkbookError::LastSheet(_) | WorkbookError::SheetFull(_) => {
            ToolError::InvalidOperationState(e.to_string())
        }
        other => ToolError::Validation(other.to_string()),
    }
}

fn cell_param(params: &ParamSet, name: &str) -> Result<CellRef, ToolError> {
    let raw: String = params.required(name)?;
    raw.parse()
        .map_err(|_| ToolError::invalid(name, format!("'{raw}'"), CELL_EXPECTED))
}

fn range_param(params: &ParamSet, name: &str) -> Result<CellRange, ToolError> {
    let raw: String = params.required(name)?;
    raw.parse()
        .map_err(|_| ToolError::invalid(name, format!("'{raw}'"), RANGE_EXPECTED))
}

fn sheet_name_param(params: &ParamSet, name: &str) -> Result<String, ToolError> {
    let value: String = params.required(name)?;
    workbook::validate_sheet_name(&value)
        .map_err(|_| ToolError::invalid(name, format!("'{value}'"), SHEET_NAME_EXPECTED))?;
    Ok(value)
}

/// Canonical name of the addressed sheet (first sheet when unspecified).
fn target_sheet(book: &Workbook, sheet: Option<&str>) -> Result<String, ToolError> {
    Ok(book.sheet(sheet).map_err(workbook_error)?.name.clone())
}

fn value_json(value: Option<&CellValue>) -> Value {
    value.map(CellValue::to_json).unwrap_or(Value::Null)
}

pub struct ListSheets;

impl DocumentOperation for ListSheets {
    type Args = ();

    const NAME: &'static str = "list_sheets";
    const SUMMARY: &'static str = "List sheets with their cell counts";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Read;

    fn parse(&self, _params: &ParamSet) -> Result<(), ToolError> {
        Ok(())
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, _args: ()) -> Result<ToolOutput, ToolError> {
        let source = ctx.source().map(|p| p.display().to_string());
        let book = ctx.workbook_mut()?;
        let sheets: Vec<Value> = book
            .sheets()
            .iter()
            .enumerate()
            .map(|(index, s)| json!({ "index": index, "name": s.name, "cells": s.len() }))
            .collect();
        Ok(ToolOutput::new(
            format!("{} sheet(s)", sheets.len()),
            json!({ "sheets": sheets, "source": source }),
        ))
    }
}

pub struct AddSheetArgs {
    name: String,
    index: Option<usize>,
}

pub struct AddSheet;

impl DocumentOperation for AddSheet {
    type Args = AddSheetArgs;

    const NAME: &'static str = "add_sheet";
    const SUMMARY: &'static str = "Add an empty sheet (name, index?; default: last)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<AddSheetArgs, ToolError> {
        Ok(AddSheetArgs {
            name: sheet_name_param(params, "name")?,
            index: params.maybe("index")?,
        })
    }

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: AddSheetArgs,
    ) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let index = book
            .add_sheet(&args.name, args.index)
            .map_err(workbook_error)?;
        Ok(ToolOutput::new(
            format!("Added sheet '{}' at index {index}", args.name),
            json!({ "name": args.name, "index": index, "sheets": book.sheet_names() }),
        ))
    }
}

pub struct RemoveSheet;

impl DocumentOperation for RemoveSheet {
    type Args = String;

    const NAME: &'static str = "remove_sheet";
    const SUMMARY: &'static str = "Remove a sheet (sheet); the last sheet cannot be removed";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<String, ToolError> {
        params.required("sheet")
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, sheet: String) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let removed = book.remove_sheet(&sheet).map_err(workbook_error)?;
        Ok(ToolOutput::new(
            format!("Removed sheet '{}'", removed.name),
            json!({ "removed": removed.name, "cells": removed.len(), "sheets": book.sheet_names() }),
        ))
    }
}

pub struct RenameSheetArgs {
    sheet: String,
    new_name: String,
}

pub struct RenameSheet;

impl DocumentOperation for RenameSheet {
    type Args = RenameSheetArgs;

    const NAME: &'static str = "rename_sheet";
    const SUMMARY: &'static str = "Rename a sheet (sheet, new_name)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<RenameSheetArgs, ToolError> {
        Ok(RenameSheetArgs {
            sheet: params.required("sheet")?,
            new_name: sheet_name_param(params, "new_name")?,
        })
    }

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: RenameSheetArgs,
    ) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let old = target_sheet(book, Some(args.sheet.as_str()))?;
        book.rename_sheet(&old, &args.new_name)
            .map_err(workbook_error)?;
        Ok(ToolOutput::new(
            format!("Renamed sheet '{old}' to '{}'", args.new_name),
            json!({ "old_name": old, "new_name": args.new_name }),
        ))
    }
}

pub struct SetValueArgs {
    cell: CellRef,
    value: CellValue,
    sheet: Option<String>,
}

pub struct SetValue;

/// How `set_value` interprets `value`.
const VALUE_TYPES: [&str; 4] = ["auto", "text", "number", "boolean"];

impl SetValue {
    fn value(params: &ParamSet) -> Result<CellValue, ToolError> {
        let raw = match params.raw("value") {
            Some(raw) if params.is_present("value") => raw,
            _ => return Err(ToolError::missing("value")),
        };
        let coerced = match params.optional_choice("type", &VALUE_TYPES, "auto")? {
            "text" => String::from_param(raw).map(CellValue::Text),
            "number" => f64::from_param(raw).map(CellValue::Number),
            "boolean" => bool::from_param(raw).map(CellValue::Bool),
            _ => CellValue::from_json(raw),
        };
        coerced.ok_or_else(|| {
            ToolError::invalid("value", raw, "text, a number or a boolean matching 'type'")
        })
    }
}

impl DocumentOperation for SetValue {
    type Args = SetValueArgs;

    const NAME: &'static str = "set_value";
    const SUMMARY: &'static str =
        "Write one cell (cell, value, sheet?, type?: auto | text | number | boolean)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<SetValueArgs, ToolError> {
        Ok(SetValueArgs {
            cell: cell_param(params, "cell")?,
            value: Self::value(params)?,
            sheet: params.maybe("sheet")?,
        })
    }

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: SetValueArgs,
    ) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let sheet = target_sheet(book, args.sheet.as_deref())?;
        let value = args.value.to_json();
        let previous = book
            .set(&sheet, args.cell, args.value)
            .map_err(workbook_error)?;
        Ok(ToolOutput::new(
            format!("Set {sheet}!{}", args.cell),
            json!({
                "sheet": sheet,
                "cell": args.cell.to_string(),
                "value": value,
                "previous": value_json(previous.as_ref()),
            }),
        ))
    }
}

pub struct CellArgs {
    cell: CellRef,
    sheet: Option<String>,
}

pub struct GetValue;

impl DocumentOperation for GetValue {
    type Args = CellArgs;

    const NAME: &'static str = "get_value";
    const SUMMARY: &'static str = "Read one cell (cell, sheet?)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Read;

    fn parse(&self, params: &ParamSet) -> Result<CellArgs, ToolError> {
        Ok(CellArgs {
            cell: cell_param(params, "cell")?,
            sheet: params.maybe("sheet")?,
        })
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, args: CellArgs) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let sheet = book.sheet(args.sheet.as_deref()).map_err(workbook_error)?;
        let value = value_json(sheet.get(args.cell));
        let message = if value.is_null() {
            format!("{}!{} is empty", sheet.name, args.cell)
        } else {
            format!("{}!{} = {value}", sheet.name, args.cell)
        };
        Ok(ToolOutput::new(
            message,
            json!({ "sheet": sheet.name, "cell": args.cell.to_string(), "value": value }),
        ))
    }
}

pub struct RangeArgs {
    range: CellRange,
    sheet: Option<String>,
}

fn range_args(params: &ParamSet) -> Result<RangeArgs, ToolError> {
    Ok(RangeArgs {
        range: range_param(params, "range")?,
        sheet: params.maybe("sheet")?,
    })
}

pub struct GetRange;

impl DocumentOperation for GetRange {
    type Args = RangeArgs;

    const NAME: &'static str = "get_range";
    const SUMMARY: &'static str = "Read a block of cells row by row (range, sheet?)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Read;

    fn parse(&self, params: &ParamSet) -> Result<RangeArgs, ToolError> {
        let args = range_args(params)?;
        let cells = u64::from(args.range.rows()) * u64::from(args.range.cols());
        if cells > MAX_RANGE_CELLS {
            return Err(ToolError::invalid(
                "range",
                format!("'{}' ({cells} cells)", args.range),
                &format!("at most {MAX_RANGE_CELLS} cells"),
            ));
        }
        Ok(args)
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, args: RangeArgs) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let sheet = book.sheet(args.sheet.as_deref()).map_err(workbook_error)?;
        let rows: Vec<Vec<Value>> = sheet
            .range(args.range)
            .into_iter()
            .map(|row| row.into_iter().map(value_json).collect())
            .collect();
        Ok(ToolOutput::new(
            format!("Read {}!{}", sheet.name, args.range),
            json!({ "sheet": sheet.name, "range": args.range.to_string(), "rows": rows }),
        ))
    }
}

pub struct ClearRange;

impl DocumentOperation for ClearRange {
    type Args = RangeArgs;

    const NAME: &'static str = "clear_range";
    const SUMMARY: &'static str = "Empty every cell in a block (range, sheet?)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<RangeArgs, ToolError> {
        range_args(params)
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, args: RangeArgs) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let sheet = book
            .sheet_mut(args.sheet.as_deref())
            .map_err(workbook_error)?;
        let cleared = sheet.clear(args.range);
        Ok(ToolOutput::new(
            format!("Cleared {cleared} cell(s) in {}!{}", sheet.name, args.range),
            json!({ "sheet": sheet.name, "range": args.range.to_string(), "cleared": cleared }),
        ))
    }
}

pub struct AppendRowArgs {
    values: Vec<Option<CellValue>>,
    sheet: Option<String>,
}

pub struct AppendRow;

impl DocumentOperation for AppendRow {
    type Args = AppendRowArgs;

    const NAME: &'static str = "append_row";
    const SUMMARY: &'static str =
        "Write values into the row below the last used row, from column A (values, sheet?)";
    const KIND: DocumentKind = DocumentKind::Workbook;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<AppendRowArgs, ToolError> {
        let raw: Vec<Value> = params.required("values")?;
        if raw.is_empty() {
            return Err(ToolError::invalid("values", "[]", "a non-empty list"));
        }
        if raw.len() > MAX_COL as usize {
            return Err(ToolError::invalid(
                "values",
                format!("a list of {} items", raw.len()),
                &format!("at most {MAX_COL} values"),
            ));
        }
        let values = raw
            .iter()
            .map(|v| match v {
                Value::Null => Ok(None),
                other => CellValue::from_json(other).map(Some).ok_or_else(|| {
                    ToolError::invalid("values", other, "a list of text, numbers, booleans or nulls")
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AppendRowArgs {
            values,
            sheet: params.maybe("sheet")?,
        })
    }

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: AppendRowArgs,
    ) -> Result<ToolOutput, ToolError> {
        let book = ctx.workbook_mut()?;
        let sheet = target_sheet(book, args.sheet.as_deref())?;
        let count = args.values.len();
        let row = book
            .append_row(Some(sheet.as_str()), args.values)
            .map_err(workbook_error)?;
        Ok(ToolOutput::new(
            format!("Appended {count} value(s) to {sheet} row {row}"),
            json!({ "sheet": sheet, "row": row }),
        ))
    }
}
