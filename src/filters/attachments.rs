//! Attachment pipeline
//!
//! Turns the attachments of one fetched message into consume requests:
//! disposition and filename filters, title and correspondent resolution,
//! content sniffing, scratch file and dispatch.

use super::{error_chain, AttachmentScope, CorrespondentSource, IngestError, MailRule, TitleSource};
use crate::consumer::{
    ConsumeDispatcher, ConsumeRequest, CorrespondentDirectory, MimeSupport, TASK_NAME_MAX_CHARS,
};
use crate::mail::{MailAttachment, MailMessage};
use regex_lite::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prefix of every scratch file handed to the consumer
pub const SCRATCH_PREFIX: &str = "mail-consumer-";

/// Longest sanitized filename, in bytes
const MAX_FILENAME_BYTES: usize = 255;

pub struct AttachmentPipeline {
    scratch_dir: PathBuf,
    dispatcher: Arc<dyn ConsumeDispatcher>,
    mime_support: Arc<dyn MimeSupport>,
    correspondents: Arc<dyn CorrespondentDirectory>,
}

impl AttachmentPipeline {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        dispatcher: Arc<dyn ConsumeDispatcher>,
        mime_support: Arc<dyn MimeSupport>,
        correspondents: Arc<dyn CorrespondentDirectory>,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            dispatcher,
            mime_support,
            correspondents,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Dispatch every acceptable attachment of `message`.
    ///
    /// Returns the number of attachments dispatched. Filtered or unsupported
    /// attachments are skipped with a debug log; a scratch or dispatch
    /// failure aborts the rest of the message.
    pub fn handle_message(&self, message: &MailMessage, rule: &MailRule) -> Result<usize, IngestError> {
        if message.attachments.is_empty() {
            return Ok(0);
        }

        let filename_filter = rule
            .filter_attachment_filename
            .as_deref()
            .filter(|glob| !glob.is_empty())
            .map(|glob| (glob, FilenameGlob::new(glob)));

        let correspondent = self.resolve_correspondent(message, rule);
        let mut processed = 0;

        for attachment in &message.attachments {
            if rule.attachment_type == AttachmentScope::AttachmentsOnly
                && attachment.content_disposition != "attachment"
            {
                log::debug!(
                    "Rule {}: Skipping attachment {} with content disposition {}",
                    rule,
                    attachment.filename,
                    attachment.content_disposition
                );
                continue;
            }

            if let Some((glob, pattern)) = &filename_filter {
                match pattern {
                    Some(pattern) if pattern.matches(&attachment.filename) => {}
                    Some(_) => {
                        log::debug!(
                            "Rule {}: Skipping attachment {} not matching {:?}",
                            rule,
                            attachment.filename,
                            glob
                        );
                        continue;
                    }
                    None => {
                        log::warn!("Rule {}: Invalid filename filter {:?}", rule, glob);
                        continue;
                    }
                }
            }

            let title = match rule.assign_title_from {
                TitleSource::FromSubject => message.subject.clone(),
                TitleSource::FromFilename => file_stem(&attachment.filename),
            };

            let mime_type = tree_magic_mini::from_u8(&attachment.payload);
            if !self.mime_support.is_supported(mime_type) {
                log::debug!(
                    "Rule {}: Skipping attachment {} since guessed mime type {} is not supported",
                    rule,
                    attachment.filename,
                    mime_type
                );
                continue;
            }

            let path = self.write_scratch(attachment)?;

            let request = ConsumeRequest {
                path,
                override_filename: sanitize_filename(&attachment.filename),
                override_title: title,
                override_correspondent_id: correspondent,
                override_document_type_id: rule.assign_document_type,
                override_tag_ids: rule.assign_tags.clone(),
                task_name: attachment.filename.chars().take(TASK_NAME_MAX_CHARS).collect(),
            };

            let task_id = self
                .dispatcher
                .dispatch(request)
                .map_err(|source| IngestError::Dispatch {
                    filename: attachment.filename.clone(),
                    source,
                })?;

            log::info!(
                "Rule {}: Consuming attachment {} from mail {} from {} (task {})",
                rule,
                attachment.filename,
                message.subject,
                message.from,
                task_id
            );
            processed += 1;
        }

        Ok(processed)
    }

    /// Correspondent id for a message, or None. Directory failures are
    /// logged and treated as no correspondent.
    fn resolve_correspondent(&self, message: &MailMessage, rule: &MailRule) -> Option<i64> {
        let name = match rule.assign_correspondent_from {
            CorrespondentSource::FromNothing => return None,
            CorrespondentSource::FromCustom => return rule.assign_correspondent,
            CorrespondentSource::FromEmail => message.from.as_str(),
            CorrespondentSource::FromName => message
                .from_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(message.from.as_str()),
        };

        if name.is_empty() {
            return None;
        }

        match self.correspondents.get_or_create(name) {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!(
                    "Rule {}: Error while retrieving correspondent {}: {}",
                    rule,
                    name,
                    error_chain(e.as_ref())
                );
                None
            }
        }
    }

    fn write_scratch(&self, attachment: &MailAttachment) -> Result<PathBuf, IngestError> {
        let scratch_error = |source: std::io::Error| IngestError::Scratch {
            filename: attachment.filename.clone(),
            source,
        };

        std::fs::create_dir_all(&self.scratch_dir).map_err(scratch_error)?;

        let mut file = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(&self.scratch_dir)
            .map_err(scratch_error)?;
        file.write_all(&attachment.payload).map_err(scratch_error)?;
        file.flush().map_err(scratch_error)?;

        // The consumer owns the file from here on
        let (_, path) = file.keep().map_err(|e| scratch_error(e.error))?;
        Ok(path)
    }
}

/// Case-insensitive filename glob. Both sides are lower-cased, so non-ASCII
/// letters fold too.
struct FilenameGlob(Regex);

impl FilenameGlob {
    fn new(glob: &str) -> Option<Self> {
        glob_to_regex(&glob.to_lowercase()).map(FilenameGlob)
    }

    fn matches(&self, filename: &str) -> bool {
        self.0.is_match(&filename.to_lowercase())
    }
}

/// Translate a shell glob (`*`, `?`, `[...]`, `[!...]`) into an anchored
/// regex. None if the result does not compile.
fn glob_to_regex(glob: &str) -> Option<Regex> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; a leading ']' is literal
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }

                let mut class: &[char] = &chars[i..j];
                out.push('[');
                if class.first() == Some(&'!') {
                    out.push('^');
                    class = &class[1..];
                }
                for ch in class {
                    if matches!(ch, '\\' | '[' | ']' | '^') {
                        out.push('\\');
                    }
                    out.push(*ch);
                }
                out.push(']');
                i = j + 1;
            }
            other => out.push_str(&regex_lite::escape(&other.to_string())),
        }
    }
    out.push('$');

    Regex::new(&out).ok()
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Strip characters that are unsafe in filenames
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.len() <= MAX_FILENAME_BYTES {
        return cleaned.to_string();
    }
    let mut end = MAX_FILENAME_BYTES;
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    cleaned[..end].to_string()
}
