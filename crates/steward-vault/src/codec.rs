//! Record file codec: a `---` delimited `key: value` header followed by a
//! free-form body.
//!
//! Fields keep their file order and their raw text, so parsing a file and
//! rendering it again reproduces the original bytes. Values are unquoted on
//! access and quoted on assignment only when needed. Multi-line values are
//! written as a `|` block with two-space indented continuation lines.

use crate::error::CodecError;

const DELIMITER: &str = "---";
const BLOCK_INDENT: &str = "  ";

/// One header field as it appears in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    /// Value text after `key:` including any quotes and continuation lines.
    pub raw: String,
    value: String,
}

impl Field {
    fn new(key: impl Into<String>, raw: String) -> Self {
        let value = decode(&raw);
        Self {
            key: key.into(),
            raw,
            value,
        }
    }

    /// Decoded value: unquoted, or the block text for `|` values.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A parsed record file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    fields: Vec<Field>,
    pub body: String,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a record file. The first line must be `---`.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let rest = match text.strip_prefix(DELIMITER) {
            Some(rest) if rest.starts_with('\n') => &rest[1..],
            Some(rest) if rest.starts_with("\r\n") => &rest[2..],
            _ => return Err(CodecError::MissingHeader),
        };

        let mut fields: Vec<Field> = Vec::new();
        let mut offset = 0;
        let mut closed = None;
        for (index, line) in rest.split_inclusive('\n').enumerate() {
            let content = line.trim_end_matches(['\n', '\r']);
            offset += line.len();
            if content == DELIMITER {
                closed = Some(offset);
                break;
            }
            let in_block = fields.last().is_some_and(|f| is_block(&f.raw));
            if content.trim().is_empty() && !(in_block && content.starts_with([' ', '\t'])) {
                continue;
            }
            // Indented lines continue the previous value (lists, folded text).
            if content.starts_with([' ', '\t']) {
                match fields.last_mut() {
                    Some(field) => {
                        field.raw.push('\n');
                        field.raw.push_str(content);
                        field.value = decode(&field.raw);
                        continue;
                    }
                    None => {
                        return Err(CodecError::MalformedLine {
                            line: index + 2,
                            text: content.to_string(),
                        })
                    }
                }
            }
            let Some((key, value)) = content.split_once(':') else {
                return Err(CodecError::MalformedLine {
                    line: index + 2,
                    text: content.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(CodecError::MalformedLine {
                    line: index + 2,
                    text: content.to_string(),
                });
            }
            fields.push(Field::new(key, value.trim().to_string()));
        }

        let end = closed.ok_or(CodecError::UnterminatedHeader)?;
        Ok(Self {
            fields,
            body: rest[end..].to_string(),
        })
    }

    /// Render the document back into file text.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 32 * self.fields.len());
        out.push_str(DELIMITER);
        out.push('\n');
        for field in &self.fields {
            out.push_str(&field.key);
            out.push(':');
            if !field.raw.is_empty() && !field.raw.starts_with('\n') {
                out.push(' ');
            }
            out.push_str(&field.raw);
            out.push('\n');
        }
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&self.body);
        out
    }

    /// Decoded value of a field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(Field::value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.key == key)
    }

    /// Set a field, replacing it in place if present and appending otherwise.
    pub fn set(&mut self, key: &str, value: impl AsRef<str>) {
        let field = Field::new(key, quote(value.as_ref()));
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Remove a field, returning its unquoted value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.fields.iter().position(|f| f.key == key)?;
        Some(self.fields.remove(pos).value)
    }

    /// Fields in file order as `(key, decoded value)`.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (f.key.as_str(), f.value()))
    }

    pub fn raw_fields(&self) -> &[Field] {
        &self.fields
    }
}

/// Strip one pair of matching outer quotes.
pub fn unquote(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

fn is_block(raw: &str) -> bool {
    raw == "|" || raw.starts_with("|\n")
}

fn decode(raw: &str) -> String {
    if !is_block(raw) {
        return unquote(raw).to_string();
    }
    raw.split('\n')
        .skip(1)
        .map(|line| line.strip_prefix(BLOCK_INDENT).unwrap_or(line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote(value: &str) -> String {
    if value.contains(['\n', '\r']) {
        let value = value.replace("\r\n", "\n").replace('\r', "\n");
        let mut raw = String::from("|");
        for line in value.split('\n') {
            raw.push('\n');
            raw.push_str(BLOCK_INDENT);
            raw.push_str(line);
        }
        return raw;
    }
    let needs_quotes = value.is_empty()
        || value.trim() != value
        || value.starts_with(['"', '\'', '[', '{', '#', '&', '*', '!', '|', '>', '%', '@', '`'])
        || value.contains(": ")
        || value.contains(" #");
    if !needs_quotes {
        return value.to_string();
    }
    if value.contains('"') && !value.contains('\'') {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}
