//! The `email` tool over the message engine.

use serde_json::{json, Value};

use crate::dispatch::{DocumentOperation, ToolDispatcher, ToolOutput};
use crate::document::mail;
use crate::document::DocumentKind;
use crate::error::ToolError;
use crate::params::ParamSet;
use crate::resolve::{Access, DocumentContext};

/// Characters of body text included in `summary`.
const PREVIEW_CHARS: usize = 200;

const RECIPIENT_FIELDS: [&str; 3] = ["to", "cc", "bcc"];

pub fn tool() -> ToolDispatcher {
    ToolDispatcher::new(
        "email",
        "Read and edit .eml messages: headers, recipients and body. Address a file with \
         path (output_path to save elsewhere) or an open message with session_id.",
    )
    .with_document(GetHeaders)
    .with_document(GetHeader)
    .with_document(SetHeader)
    .with_document(RemoveHeader)
    .with_document(AddRecipient)
    .with_document(GetBody)
    .with_document(SetBody)
    .with_document(Summary)
}

fn header_name(params: &ParamSet) -> Result<String, ToolError> {
    let name: String = params.required("name")?;
    let name = name.trim().to_string();
    mail::validate_header_name(&name).map_err(|_| {
        ToolError::invalid(
            "name",
            format!("'{name}'"),
            "a header name of printable ASCII without spaces or ':'",
        )
    })?;
    Ok(name)
}

pub struct GetHeaders;

impl DocumentOperation for GetHeaders {
    type Args = ();

    const NAME: &'static str = "get_headers";
    const SUMMARY: &'static str = "List every header in order";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Read;

    fn parse(&self, _params: &ParamSet) -> Result<(), ToolError> {
        Ok(())
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, _args: ()) -> Result<ToolOutput, ToolError> {
        let message = ctx.mail_mut()?;
        let headers: Vec<Value> = message
            .headers()
            .iter()
            .map(|h| json!({ "name": h.name, "value": h.value }))
            .collect();
        Ok(ToolOutput::new(
            format!("{} header(s)", headers.len()),
            json!({ "headers": headers }),
        ))
    }
}

pub struct GetHeader;

impl DocumentOperation for GetHeader {
    type Args = String;

    const NAME: &'static str = "get_header";
    const SUMMARY: &'static str = "Read a header; repeated headers return every value (name)";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Read;

    fn parse(&self, params: &ParamSet) -> Result<String, ToolError> {
        header_name(params)
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, name: String) -> Result<ToolOutput, ToolError> {
        let message = ctx.mail_mut()?;
        let values = message.header_all(&name);
        let text = match values.first() {
            Some(first) => format!("{name}: {first}"),
            None => format!("Header '{name}' is not set"),
        };
        Ok(ToolOutput::new(
            text,
            json!({ "name": name, "value": values.first(), "values": values }),
        ))
    }
}

pub struct SetHeaderArgs {
    name: String,
    value: String,
}

pub struct SetHeader;

impl DocumentOperation for SetHeader {
    type Args = SetHeaderArgs;

    const NAME: &'static str = "set_header";
    const SUMMARY: &'static str = "Set a header, replacing any existing value (name, value)";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<SetHeaderArgs, ToolError> {
        let name = header_name(params)?;
        let value: String = params.required("value")?;
        let value = value.trim().to_string();
        mail::validate_header_value(&value).map_err(|_| {
            ToolError::invalid("value", "a multi-line string", "a single line of text")
        })?;
        Ok(SetHeaderArgs { name, value })
    }

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: SetHeaderArgs,
    ) -> Result<ToolOutput, ToolError> {
        let message = ctx.mail_mut()?;
        let previous = message
            .set_header(&args.name, &args.value)
            .map_err(ToolError::Validation)?;
        Ok(ToolOutput::new(
            format!("Set {}", args.name),
            json!({ "name": args.name, "value": args.value, "previous": previous }),
        ))
    }
}

pub struct RemoveHeader;

impl DocumentOperation for RemoveHeader {
    type Args = String;

    const NAME: &'static str = "remove_header";
    const SUMMARY: &'static str = "Remove every occurrence of a header (name)";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<String, ToolError> {
        header_name(params)
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, name: String) -> Result<ToolOutput, ToolError> {
        let message = ctx.mail_mut()?;
        let removed = message.remove_header(&name);
        if removed == 0 {
            return Err(ToolError::invalid(
                "name",
                format!("'{name}'"),
                "a header present in the message",
            ));
        }
        Ok(ToolOutput::new(
            format!("Removed {removed} '{name}' header(s)"),
            json!({ "name": name, "removed": removed }),
        ))
    }
}

pub struct AddRecipientArgs {
    field: &'static str,
    address: String,
}

pub struct AddRecipient;

impl DocumentOperation for AddRecipient {
    type Args = AddRecipientArgs;

    const NAME: &'static str = "add_recipient";
    const SUMMARY: &'static str = "Append an address to To, Cc or Bcc (field, address)";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<AddRecipientArgs, ToolError> {
        let field = match params.required_choice("field", &RECIPIENT_FIELDS)? {
            "to" => "To",
            "cc" => "Cc",
            _ => "Bcc",
        };
        let address: String = params.required("address")?;
        let address = address.trim().to_string();
        mail::validate_address(&address).map_err(|_| {
            ToolError::invalid(
                "address",
                format!("'{address}'"),
                "an address like name@example.com or Name <name@example.com>",
            )
        })?;
        Ok(AddRecipientArgs { field, address })
    }

    fn apply(
        &self,
        ctx: &mut DocumentContext<'_>,
        args: AddRecipientArgs,
    ) -> Result<ToolOutput, ToolError> {
        let message = ctx.mail_mut()?;
        let value = message
            .add_address(args.field, &args.address)
            .map_err(ToolError::Validation)?;
        Ok(ToolOutput::new(
            format!("Added {} to {}", args.address, args.field),
            json!({ "field": args.field, "value": value }),
        ))
    }
}

pub struct GetBody;

impl DocumentOperation for GetBody {
    type Args = ();

    const NAME: &'static str = "get_body";
    const SUMMARY: &'static str = "Read the message body";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Read;

    fn parse(&self, _params: &ParamSet) -> Result<(), ToolError> {
        Ok(())
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, _args: ()) -> Result<ToolOutput, ToolError> {
        let body = ctx.mail_mut()?.body().to_string();
        Ok(ToolOutput::new(
            format!("Body is {} byte(s)", body.len()),
            json!({ "body": body }),
        ))
    }
}

pub struct SetBody;

impl DocumentOperation for SetBody {
    type Args = String;

    const NAME: &'static str = "set_body";
    const SUMMARY: &'static str = "Replace the message body (body; an empty string clears it)";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Write;

    fn parse(&self, params: &ParamSet) -> Result<String, ToolError> {
        if let Some(body) = params.maybe::<String>("body")? {
            return Ok(body);
        }
        // Blank text is a legitimate body; only a missing or null value is absent.
        match params.raw("body") {
            Some(Value::String(blank)) => Ok(blank.clone()),
            _ => Err(ToolError::missing("body")),
        }
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, body: String) -> Result<ToolOutput, ToolError> {
        let bytes = body.len();
        ctx.mail_mut()?.set_body(body);
        Ok(ToolOutput::new(
            format!("Body set ({bytes} byte(s))"),
            json!({ "body_bytes": bytes }),
        ))
    }
}

pub struct Summary;

impl DocumentOperation for Summary {
    type Args = ();

    const NAME: &'static str = "summary";
    const SUMMARY: &'static str = "Sender, recipients, subject and a body preview";
    const KIND: DocumentKind = DocumentKind::Mail;
    const ACCESS: Access = Access::Read;

    fn parse(&self, _params: &ParamSet) -> Result<(), ToolError> {
        Ok(())
    }

    fn apply(&self, ctx: &mut DocumentContext<'_>, _args: ()) -> Result<ToolOutput, ToolError> {
        let source = ctx.source().map(|p| p.display().to_string());
        let message = ctx.mail_mut()?;
        let preview: String = message.body().chars().take(PREVIEW_CHARS).collect();
        let subject = message.header("Subject").unwrap_or("(no subject)");
        Ok(ToolOutput::new(
            format!("\"{subject}\""),
            json!({
                "from": message.header("From"),
                "to": message.header("To"),
                "cc": message.header("Cc"),
                "subject": message.header("Subject"),
                "date": message.header("Date"),
                "headers": message.headers().len(),
                "body_bytes": message.body().len(),
                "body_preview": preview,
                "source": source,
            }),
        ))
    }
}
