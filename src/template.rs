//! Filename templates
//!
//! A template is plain text with `{placeholder}` fields:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{dialog_id}` | numeric chat id |
//! | `{dialog_name}` | visible chat name |
//! | `{message_id}` | message id |
//! | `{message_date}` | unix seconds of the media timestamp (0 if unknown) |
//! | `{file_name}` | remote file name |
//! | `{file_size}` | declared size in bytes |
//! | `{mime_type}` | declared MIME type (empty if unknown) |
//! | `{download_date}` | unix seconds when the run started |
//!
//! `{{` and `}}` produce literal braces. Every substituted value is sanitised so the
//! result is a single safe path component.

use chrono::Utc;

use crate::TEMP_SUFFIX;
use crate::error::{Error, Result};
use crate::types::TaskSpec;

const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest final name whose temp name still fits a 255-byte path component
const MAX_NAME_LEN: usize = 255 - TEMP_SUFFIX.len();

/// Extensions longer than this are treated as part of the stem when truncating
const MAX_EXT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    DialogId,
    DialogName,
    MessageId,
    MessageDate,
    FileName,
    FileSize,
    MimeType,
    DownloadDate,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name.trim() {
            "dialog_id" => Field::DialogId,
            "dialog_name" => Field::DialogName,
            "message_id" => Field::MessageId,
            "message_date" => Field::MessageDate,
            "file_name" => Field::FileName,
            "file_size" => Field::FileSize,
            "mime_type" => Field::MimeType,
            "download_date" => Field::DownloadDate,
            _ => return None,
        })
    }

    fn value(self, spec: &TaskSpec) -> String {
        match self {
            Field::DialogId => spec.peer.id.to_string(),
            Field::DialogName => spec.peer.name.clone(),
            Field::MessageId => spec.message_id.to_string(),
            Field::MessageDate => spec
                .file
                .date
                .map(|d| d.timestamp())
                .unwrap_or(0)
                .to_string(),
            Field::FileName => spec.file.name.clone(),
            Field::FileSize => spec.file.size.to_string(),
            Field::MimeType => spec.file.mime_type.clone().unwrap_or_default(),
            Field::DownloadDate => Utc::now().timestamp().to_string(),
        }
    }
}

/// Parsed filename template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(Error::Template(format!("unclosed placeholder in {source:?}")));
                    }
                    let field = Field::parse(&name).ok_or_else(|| {
                        Error::Template(format!("unknown placeholder {{{name}}}"))
                    })?;
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Field(field));
                }
                '}' => {
                    return Err(Error::Template(format!("unmatched '}}' in {source:?}")));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        if parts.is_empty() {
            return Err(Error::Template("template is empty".to_string()));
        }

        Ok(Self { parts })
    }

    /// Render the file name for one task
    pub fn render(&self, spec: &TaskSpec) -> Result<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Field(f) => out.push_str(&f.value(spec)),
            }
        }

        let name = sanitize_filename(&out);
        if name.is_empty() {
            return Err(Error::Template(format!(
                "template rendered an empty name for message {}",
                spec.message_id
            )));
        }
        Ok(name)
    }
}

/// Make `input` safe to use as a single file name on Windows, Linux and macOS.
///
/// Path separators, reserved characters and control characters become `_`, leading and
/// trailing whitespace and dots are trimmed, reserved Windows device names get a `_`
/// suffix. Names too long for their temp name to fit a path component lose the end of
/// their stem; the extension is kept.
pub fn sanitize_filename(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut result = replaced
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string();

    let stem_upper = result
        .split('.')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if WINDOWS_RESERVED.contains(&stem_upper.as_str()) {
        result.insert(stem_upper.len(), '_');
    }

    fit_name(&result, "")
}

/// `name` with `_<tag>` inserted before its extension, truncated to fit.
///
/// Used to give colliding rendered names distinct paths.
pub fn with_tag(name: &str, tag: &str) -> String {
    fit_name(name, &format!("_{tag}"))
}

/// Join stem, `insert` and extension, cutting the stem so the result fits MAX_NAME_LEN
fn fit_name(name: &str, insert: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXT_LEN => name.split_at(dot),
        _ => (name, ""),
    };

    let budget = MAX_NAME_LEN.saturating_sub(insert.len() + ext.len());
    let mut cut = stem.len().min(budget);
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{insert}{ext}", &stem[..cut])
}
