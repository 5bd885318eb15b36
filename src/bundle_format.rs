use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use crate::encoding::{self, TextEncoding};
use crate::error::{BundleError, Result};

pub const FORMAT_PREFIX: &str = "# Format:";
pub const DELTA_REFERENCE_LINE: &str = "# Delta Reference: Yes";
pub const FULL_BASE64_FORMAT: &str = "Full Base64";
pub const BASE64_HINT: &str = "(Content:Base64)";
pub const COMMAND_TAG: &str = "PAWS_CMD";

/// Which side of the exchange produced a bundle. Reference bundles are
/// written by us, reply bundles come back from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Cats,
    Dogs,
}

impl BundleKind {
    pub fn emoji(self) -> &'static str {
        match self {
            BundleKind::Cats => "\u{1F408}",
            BundleKind::Dogs => "\u{1F415}",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            BundleKind::Cats => "CATS",
            BundleKind::Dogs => "DOGS",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            BundleKind::Cats => "# Cats Bundle",
            BundleKind::Dogs => "# Dogs Bundle",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "CATS" => Some(BundleKind::Cats),
            "DOGS" => Some(BundleKind::Dogs),
            _ => None,
        }
    }

    pub fn start_marker(self, path: &str, base64: bool) -> String {
        self.marker("START", path, base64)
    }

    pub fn end_marker(self, path: &str, base64: bool) -> String {
        self.marker("END", path, base64)
    }

    fn marker(self, edge: &str, path: &str, base64: bool) -> String {
        let hint = if base64 {
            format!(" {BASE64_HINT}")
        } else {
            String::new()
        };
        format!("{} --- {}_{}_FILE: {}{} ---", self.emoji(), self.tag(), edge, path, hint)
    }
}

/// How the serializer picks per-file representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    /// UTF-8 text where lossless, base64 otherwise.
    #[default]
    Auto,
    /// Decode text files with the given encoding; undecodable files fall back to base64.
    Text(TextEncoding),
    /// Every file is base64, the bundle declares itself fully base64.
    Base64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleHeader {
    pub kind: Option<BundleKind>,
    pub encoding: TextEncoding,
    pub full_base64: bool,
    pub delta_reference: bool,
}

impl Default for BundleHeader {
    fn default() -> Self {
        Self {
            kind: None,
            encoding: TextEncoding::Utf8,
            full_base64: false,
            delta_reference: false,
        }
    }
}

impl BundleHeader {
    /// Text of the `# Format:` line for this header.
    pub fn format_description(&self, any_base64: bool) -> String {
        if self.full_base64 {
            FULL_BASE64_FORMAT.to_string()
        } else if any_base64 {
            format!(
                "Mixed (Primary Encoding: {}, binary files as Base64)",
                self.encoding.label()
            )
        } else {
            format!("Text (Primary Encoding: {})", self.encoding.label())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub header: BundleHeader,
    pub blocks: Vec<FileBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    /// Path exactly as written in the marker; untrusted.
    pub path: String,
    pub binary: bool,
    /// Encoding used to turn `BlockContent::Text` back into bytes.
    pub encoding: TextEncoding,
    pub content: BlockContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContent {
    Text(String),
    Binary(Vec<u8>),
    Delta(Vec<DeltaCommand>),
}

impl FileBlock {
    /// On-disk bytes for a full-content block, `None` for delta blocks.
    pub fn full_bytes(&self) -> Option<Vec<u8>> {
        match &self.content {
            BlockContent::Text(text) => Some(self.encoding.encode(text)),
            BlockContent::Binary(data) => Some(data.clone()),
            BlockContent::Delta(_) => None,
        }
    }

    pub fn delta_commands(&self) -> Option<&[DeltaCommand]> {
        match &self.content {
            BlockContent::Delta(commands) => Some(commands),
            _ => None,
        }
    }
}

/// One line-range edit. Line numbers are 1-based and always refer to the
/// original file, never to the partially patched one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaCommand {
    Replace {
        start: usize,
        end: usize,
        lines: Vec<String>,
    },
    InsertAfter {
        line: usize,
        lines: Vec<String>,
    },
    Delete {
        start: usize,
        end: usize,
    },
    DeleteFile,
}

impl DeltaCommand {
    pub fn payload_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            DeltaCommand::Replace { lines, .. } | DeltaCommand::InsertAfter { lines, .. } => {
                Some(lines)
            }
            DeltaCommand::Delete { .. } | DeltaCommand::DeleteFile => None,
        }
    }

    /// Directive line as it appears inside a block.
    pub fn directive(&self) -> String {
        format!("@@ {COMMAND_TAG} {self} @@")
    }
}

impl fmt::Display for DeltaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaCommand::Replace { start, end, .. } => write!(f, "REPLACE_LINES({start}, {end})"),
            DeltaCommand::InsertAfter { line, .. } => write!(f, "INSERT_AFTER_LINE({line})"),
            DeltaCommand::Delete { start, end } => write!(f, "DELETE_LINES({start}, {end})"),
            DeltaCommand::DeleteFile => write!(f, "DELETE_FILE()"),
        }
    }
}

/// Original line sequences keyed by declared path, taken from a full-content bundle.
#[derive(Debug, Clone, Default)]
pub struct OriginalReference {
    files: HashMap<String, Vec<String>>,
}

impl OriginalReference {
    /// Build the lookup from a parsed reference bundle. Base64 blocks are
    /// included when their bytes decode under the block's encoding.
    pub fn from_bundle(bundle: &Bundle) -> Result<Self> {
        let mut files = HashMap::new();
        for block in &bundle.blocks {
            let text = match &block.content {
                BlockContent::Text(text) => text.clone(),
                BlockContent::Binary(data) => match block.encoding.decode(data) {
                    Ok(text) => text,
                    Err(message) => {
                        warn!(
                            path = %block.path,
                            encoding = %block.encoding,
                            %message,
                            "reference file is not decodable text, delta commands for it will fail"
                        );
                        continue;
                    }
                },
                BlockContent::Delta(_) => {
                    return Err(BundleError::format(
                        &block.path,
                        "a delta reference must carry full content, found delta commands",
                    ))
                }
            };
            files.insert(block.path.clone(), encoding::split_lines(&text));
        }
        Ok(Self { files })
    }

    pub fn insert(&mut self, path: impl Into<String>, lines: Vec<String>) {
        self.files.insert(path.into(), lines);
    }

    pub fn lines(&self, path: &str) -> Option<&[String]> {
        self.files
            .get(path)
            .or_else(|| self.files.get(path.trim_start_matches("./")))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    Extracted,
    Deleted,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub path: String,
    pub status: ExtractStatus,
    pub message: String,
}

impl ExtractionResult {
    pub fn new(path: impl Into<String>, status: ExtractStatus, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ExtractSummary {
    pub fn from_results(results: &[ExtractionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                ExtractStatus::Extracted => summary.extracted += 1,
                ExtractStatus::Deleted => summary.deleted += 1,
                ExtractStatus::Skipped => summary.skipped += 1,
                ExtractStatus::Error => summary.errors += 1,
            }
        }
        summary
    }
}

#[derive(Debug)]
pub struct BundleSummary {
    pub files_text: usize,
    pub files_base64: usize,
    pub bytes_in: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_carry_hint_on_both_edges() {
        let start = BundleKind::Cats.start_marker("img/logo.png", true);
        let end = BundleKind::Cats.end_marker("img/logo.png", true);
        assert_eq!(
            start,
            "\u{1F408} --- CATS_START_FILE: img/logo.png (Content:Base64) ---"
        );
        assert_eq!(
            end,
            "\u{1F408} --- CATS_END_FILE: img/logo.png (Content:Base64) ---"
        );
        assert_eq!(
            BundleKind::Dogs.start_marker("a.txt", false),
            "\u{1F415} --- DOGS_START_FILE: a.txt ---"
        );
    }

    #[test]
    fn test_directive_rendering() {
        let cmd = DeltaCommand::Replace {
            start: 3,
            end: 5,
            lines: vec![],
        };
        assert_eq!(cmd.directive(), "@@ PAWS_CMD REPLACE_LINES(3, 5) @@");
        assert_eq!(
            DeltaCommand::DeleteFile.directive(),
            "@@ PAWS_CMD DELETE_FILE() @@"
        );
    }

    #[test]
    fn test_format_description() {
        let mut header = BundleHeader::default();
        assert_eq!(
            header.format_description(false),
            "Text (Primary Encoding: UTF-8)"
        );
        assert!(header.format_description(true).starts_with("Mixed"));
        header.full_base64 = true;
        assert_eq!(header.format_description(true), FULL_BASE64_FORMAT);
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            ExtractionResult::new("a", ExtractStatus::Extracted, ""),
            ExtractionResult::new("b", ExtractStatus::Error, "boom"),
            ExtractionResult::new("c", ExtractStatus::Skipped, ""),
            ExtractionResult::new("d", ExtractStatus::Extracted, "unchanged"),
        ];
        let summary = ExtractSummary::from_results(&results);
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.deleted, 0);
    }

    #[test]
    fn test_reference_skips_undecodable_binary() {
        let block = |path: &str, data: Vec<u8>| FileBlock {
            path: path.to_string(),
            binary: true,
            encoding: TextEncoding::Utf8,
            content: BlockContent::Binary(data),
        };
        let bundle = Bundle {
            header: BundleHeader::default(),
            blocks: vec![
                block("ok.txt", b"one\ntwo\n".to_vec()),
                block("raw.bin", vec![0xff, 0xfe, 0x00]),
            ],
        };
        let reference = OriginalReference::from_bundle(&bundle).unwrap();
        assert_eq!(reference.len(), 1);
        assert_eq!(
            reference.lines("ok.txt").unwrap(),
            &["one".to_string(), "two".to_string()]
        );
        assert!(reference.lines("raw.bin").is_none());
    }

    #[test]
    fn test_reference_lookup_tolerates_dot_prefix() {
        let mut reference = OriginalReference::default();
        reference.insert("src/app.js", vec!["a".to_string()]);
        assert!(reference.lines("./src/app.js").is_some());
        assert!(reference.lines("src/other.js").is_none());
    }
}
