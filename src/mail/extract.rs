use chrono::{DateTime, Local};
use mailparse::{DispositionType, MailParseError, ParsedMail};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::message::ExtractionResult;
use crate::error::ExtractError;

pub const DEFAULT_EXTENSION: &str = "igc";

const DUPLICATE_MARKER: &str = "_duplicate_";

/// Output directory plus the names already handed out during one extraction pass.
#[derive(Debug)]
pub struct SaveDir {
    dir: PathBuf,
    /// lowercase, no leading dot
    extension: String,
    used_names: HashSet<String>,
}

impl SaveDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_extension(dir, DEFAULT_EXTENSION)
    }

    pub fn with_extension(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim().trim_start_matches('.').to_ascii_lowercase(),
            used_names: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_unset(&self) -> bool {
        self.dir.as_os_str().is_empty()
    }

    /// True if the final `.`-suffix of `filename` is the target extension, ignoring case.
    pub fn matches(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Reserve an output name for an attachment called `name`.
    ///
    /// Returns `None` when the name does not carry the target extension. A name
    /// already reserved in this pass gets a timestamp and duplicate marker prefixed,
    /// repeatedly if needed, so nothing is overwritten within the pass.
    pub fn allocate(&mut self, name: &str) -> Option<(String, PathBuf)> {
        self.allocate_at(name, Local::now())
    }

    fn allocate_at(&mut self, name: &str, now: DateTime<Local>) -> Option<(String, PathBuf)> {
        let base = base_name(name)?;
        if !self.matches(base) {
            return None;
        }

        let suffix = format!(".{}", self.extension);
        let mut name = if base.to_ascii_lowercase().ends_with(&suffix) {
            base.to_string()
        } else {
            format!("{base}{suffix}")
        };

        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        while self.used_names.contains(&name) {
            name = format!("{stamp}{DUPLICATE_MARKER}{name}");
        }
        self.used_names.insert(name.clone());

        let path = self.dir.join(&name);
        Some((name, path))
    }
}

/// Final path component of an attachment name, with either separator style.
fn base_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        b => Some(b),
    }
}

/// Save every attachment of `raw` whose name carries the target extension.
///
/// An unset output directory makes this a no-op. On a write failure the
/// attachments already saved for this message are returned inside the error.
pub fn extract_attachments(
    raw: &[u8],
    out: &mut SaveDir,
) -> Result<Vec<ExtractionResult>, ExtractError> {
    if out.is_unset() {
        return Ok(Vec::new());
    }

    // Charsets are only decoded on demand, so unknown ones never fail the parse.
    let parsed = mailparse::parse_mail(raw)?;
    check_headers(&parsed)?;
    let mut results = Vec::new();

    if is_multipart(&parsed) {
        let mut leaves = Vec::new();
        collect_leaves(&parsed, &mut leaves);
        if leaves.is_empty() {
            return Err(MailParseError::Generic("multipart body has no parts").into());
        }

        for part in leaves {
            let Some(filename) = part_filename(part) else {
                continue;
            };
            if !out.matches(&filename) {
                continue;
            }
            let Some((name, path)) = out.allocate(&filename) else {
                continue;
            };
            results = save_part(part, name, path, results)?;
        }
        return Ok(results);
    }

    // A single-part body only counts when it is explicitly an attachment.
    let disposition = parsed.get_content_disposition();
    if disposition.disposition != DispositionType::Attachment {
        return Ok(results);
    }
    let Some(filename) = disposition.params.get("filename") else {
        return Ok(results);
    };
    if let Some((name, path)) = out.allocate(filename) {
        results = save_part(&parsed, name, path, results)?;
    }
    Ok(results)
}

/// Read a message file (.eml) from disk and extract from it.
pub fn extract_file(path: &Path, out: &mut SaveDir) -> anyhow::Result<Vec<ExtractionResult>> {
    let raw = fs::read(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    Ok(extract_attachments(&raw, out)?)
}

/// mailparse turns any line without a colon into a header named after the whole
/// line, so a header block is only accepted if every name is a valid field name.
fn check_headers(parsed: &ParsedMail) -> Result<(), MailParseError> {
    if parsed.headers.is_empty() {
        return Err(MailParseError::Generic("message has no header fields"));
    }
    if !parsed.headers.iter().all(|h| is_field_name(&h.get_key())) {
        return Err(MailParseError::Generic("malformed MIME header line"));
    }
    Ok(())
}

/// RFC 5322 field name: printable US-ASCII except the colon.
fn is_field_name(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

fn is_multipart(part: &ParsedMail) -> bool {
    part.ctype.mimetype.starts_with("multipart/") && part.ctype.params.contains_key("boundary")
}

fn collect_leaves<'a, 'b>(part: &'a ParsedMail<'b>, out: &mut Vec<&'a ParsedMail<'b>>) {
    for sub in &part.subparts {
        if is_multipart(sub) {
            collect_leaves(sub, out);
        } else {
            out.push(sub);
        }
    }
}

/// Disposition `filename`, falling back to the content-type `name` parameter.
fn part_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn save_part(
    part: &ParsedMail,
    name: String,
    path: PathBuf,
    mut saved: Vec<ExtractionResult>,
) -> Result<Vec<ExtractionResult>, ExtractError> {
    let body = match part.get_body_raw() {
        Ok(b) => b,
        Err(source) => return Err(ExtractError::Decode { name, saved, source }),
    };

    if let Err(source) = write_file(&path, &body) {
        return Err(ExtractError::Write { path, saved, source });
    }

    saved.push(ExtractionResult {
        filename: name,
        path,
    });
    Ok(saved)
}

fn write_file(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut f = fs::File::create(path)?;
    f.write_all(body)?;
    f.flush()
}
