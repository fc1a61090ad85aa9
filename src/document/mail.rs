//! Message engine: RFC 5322 style header block plus a text body.
//!
//! Parsing unfolds continuation lines and accepts LF or CRLF line endings.
//! Rendering always writes CRLF.

/// A single header field. Name matching is case-insensitive; the stored
/// spelling is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailMessage {
    headers: Vec<Header>,
    body: String,
}

impl MailMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let normalized = text.replace("\r\n", "\n");
        let (head, body) = match normalized.find("\n\n") {
            // No header block: the separator is the very first line.
            _ if normalized.starts_with('\n') => ("", &normalized[1..]),
            Some(i) => (&normalized[..i], &normalized[i + 2..]),
            None if normalized.trim().is_empty() => ("", ""),
            // Headers only, possibly with one trailing newline.
            None => (normalized.trim_end_matches('\n'), ""),
        };

        let mut headers: Vec<Header> = Vec::new();
        for (lineno, line) in head.lines().enumerate() {
            if line.starts_with(' ') || line.starts_with('\t') {
                let last = headers.last_mut().ok_or_else(|| {
                    format!("line {}: continuation line before any header", lineno + 1)
                })?;
                last.value.push(' ');
                last.value.push_str(line.trim());
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| format!("line {}: expected 'Name: value'", lineno + 1))?;
            validate_header_name(name).map_err(|e| format!("line {}: {e}", lineno + 1))?;
            headers.push(Header {
                name: name.to_string(),
                value: value.trim().to_string(),
            });
        }
        Ok(Self {
            headers,
            body: body.to_string(),
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for header in &self.headers {
            out.push_str(&header.name);
            out.push_str(": ");
            out.push_str(&header.value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body.replace("\r\n", "\n").replace('\n', "\r\n"));
        out
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Every value of a repeated header, in order.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Replace a header in place (first occurrence; later duplicates are
    /// dropped) or append it. Returns the previous first value.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<Option<String>, String> {
        validate_header_name(name)?;
        validate_header_value(value)?;
        let mut previous = None;
        let mut replaced = false;
        self.headers.retain_mut(|h| {
            if !h.name.eq_ignore_ascii_case(name) {
                return true;
            }
            if replaced {
                return false;
            }
            previous = Some(std::mem::replace(&mut h.value, value.to_string()));
            replaced = true;
            true
        });
        if !replaced {
            self.headers.push(Header {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        Ok(previous)
    }

    /// Remove every occurrence of a header, returning how many were removed.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    /// Append an address to a comma-separated address header.
    pub fn add_address(&mut self, field: &str, address: &str) -> Result<String, String> {
        validate_header_value(address)?;
        let updated = match self.header(field) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {address}"),
            _ => address.to_string(),
        };
        self.set_header(field, &updated)?;
        Ok(updated)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }
}

/// Header names are printable ASCII without spaces or `:`.
pub fn validate_header_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("header name must not be empty".into());
    }
    if !name.bytes().all(|b| (33..=126).contains(&b) && b != b':') {
        return Err(format!(
            "header name '{name}' must be printable ASCII without spaces or ':'"
        ));
    }
    Ok(())
}

/// Header values are single-line.
pub fn validate_header_value(value: &str) -> Result<(), String> {
    if value.contains(['\r', '\n']) {
        return Err("header value must not contain line breaks".into());
    }
    Ok(())
}

/// Loose mailbox check: `local@domain` with an optional `Display <...>` wrapper.
pub fn validate_address(address: &str) -> Result<(), String> {
    let addr = match (address.find('<'), address.rfind('>')) {
        (Some(open), Some(close)) if open < close => &address[open + 1..close],
        _ => address,
    };
    let addr = addr.trim();
    match addr.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !addr.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(format!("'{address}' is not a mail address")),
    }
}
