use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::bundle_format::{
    BlockContent, ExtractStatus, ExtractSummary, ExtractionResult, FileBlock, OriginalReference,
};
use crate::conflict::{self, Decision, OverwritePolicy, Prompter};
use crate::delta::{self, DeltaOutcome};
use crate::encoding::{self, TextEncoding};
use crate::error::BundleError;
use crate::parser::{self, ParseOptions};
use crate::sanitize;
use crate::util;

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub output_dir: PathBuf,
    pub policy: OverwritePolicy,
    /// Original contents for delta replies. Delta directives are only
    /// recognised when this is set.
    pub reference: Option<OriginalReference>,
    pub encoding_override: Option<TextEncoding>,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub results: Vec<ExtractionResult>,
}

impl ExtractReport {
    pub fn summary(&self) -> ExtractSummary {
        ExtractSummary::from_results(&self.results)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ExtractStatus::Error)
    }
}

/// Build the original-content lookup from a full-content reference bundle.
pub fn load_reference(
    text: &str,
    encoding_override: Option<TextEncoding>,
) -> Result<OriginalReference> {
    let outcome = parser::parse_bundle(
        text,
        ParseOptions {
            delta_mode: false,
            encoding_override,
        },
    );
    for issue in &outcome.issues {
        warn!(error = %issue, "reference bundle entry ignored");
    }
    if !outcome.bundle.header.delta_reference {
        info!("reference bundle is not marked '# Delta Reference: Yes'");
    }
    let reference = OriginalReference::from_bundle(&outcome.bundle)
        .context("Failed to build delta reference")?;
    if reference.is_empty() {
        warn!("delta reference contains no usable files");
    } else {
        debug!(files = reference.len(), "delta reference loaded");
    }
    Ok(reference)
}

/// Parse `text` and write its files below `options.output_dir`.
///
/// Only run-level problems (the output root cannot be created) are returned
/// as errors. Everything file-scoped ends up in the report.
pub fn extract_bundle(
    text: &str,
    options: &ExtractOptions,
    prompter: &mut dyn Prompter,
) -> Result<ExtractReport> {
    fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            options.output_dir.display()
        )
    })?;

    let outcome = parser::parse_bundle(
        text,
        ParseOptions {
            delta_mode: options.reference.is_some(),
            encoding_override: options.encoding_override,
        },
    );

    let mut report = ExtractReport::default();
    for issue in outcome.issues {
        report.results.push(error_result(issue_path(&issue), &issue));
    }

    let mut extractor = Extractor {
        root: &options.output_dir,
        reference: options.reference.as_ref(),
        policy: conflict::effective_policy(options.policy, prompter),
        prompter,
        quit: false,
    };

    for block in outcome.bundle.blocks {
        let result = if extractor.quit {
            ExtractionResult::new(&block.path, ExtractStatus::Skipped, "not processed after quit")
        } else {
            extractor.process(&block)
        };
        debug!(path = %result.path, status = ?result.status, "file processed");
        report.results.push(result);
    }

    Ok(report)
}

fn issue_path(issue: &BundleError) -> String {
    match issue {
        BundleError::Format { path, .. }
        | BundleError::Encoding { path, .. }
        | BundleError::DeltaRange { path, .. } => path.clone(),
        BundleError::PathSecurity { raw, .. } => raw.clone(),
        BundleError::Io { path, .. } => path.display().to_string(),
    }
}

fn error_result(path: impl Into<String>, error: &BundleError) -> ExtractionResult {
    ExtractionResult::new(path, ExtractStatus::Error, error.to_string())
}

struct Extractor<'a> {
    root: &'a Path,
    reference: Option<&'a OriginalReference>,
    policy: OverwritePolicy,
    prompter: &'a mut dyn Prompter,
    quit: bool,
}

impl Extractor<'_> {
    fn process(&mut self, block: &FileBlock) -> ExtractionResult {
        let dest = match sanitize::sanitize_path(self.root, &block.path) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(path = %block.path, error = %e, "refusing to write");
                return error_result(&block.path, &e);
            }
        };

        match &block.content {
            BlockContent::Delta(commands) => {
                let Some(original) = self.reference.and_then(|r| r.lines(&block.path)) else {
                    let e = BundleError::format(
                        &block.path,
                        "delta commands given but the reference bundle has no such file",
                    );
                    return error_result(&block.path, &e);
                };
                match delta::apply_delta(&block.path, original, commands) {
                    DeltaOutcome::DeleteFile => self.delete(&block.path, &dest),
                    DeltaOutcome::Patched { lines, skipped } => {
                        let data = block.encoding.encode(&encoding::join_lines(&lines));
                        let note = match skipped.first() {
                            Some(first) => format!(
                                "partially patched: {} delta command(s) skipped, first: {first}",
                                skipped.len()
                            ),
                            None => String::new(),
                        };
                        self.write(&block.path, &dest, &data, note)
                    }
                }
            }
            BlockContent::Text(_) | BlockContent::Binary(_) => {
                let data = block.full_bytes().unwrap_or_default();
                self.write(&block.path, &dest, &data, String::new())
            }
        }
    }

    /// Consult the conflict policy for an existing destination. `None` means go ahead.
    fn resolve_existing(
        &mut self,
        label: &str,
        dest: &Path,
        action: &str,
    ) -> Option<ExtractionResult> {
        match conflict::decide(self.policy, &mut *self.prompter, dest, action) {
            Ok((Decision::Proceed, next)) => {
                self.policy = next;
                None
            }
            Ok((Decision::Skip, next)) => {
                self.policy = next;
                Some(ExtractionResult::new(
                    label,
                    ExtractStatus::Skipped,
                    "destination exists",
                ))
            }
            Ok((Decision::Quit, _)) => {
                info!("extraction stopped by user");
                self.quit = true;
                Some(ExtractionResult::new(
                    label,
                    ExtractStatus::Skipped,
                    "quit requested",
                ))
            }
            Err(e) => {
                self.quit = true;
                Some(error_result(label, &BundleError::io(dest, e)))
            }
        }
    }

    fn write(&mut self, label: &str, dest: &Path, data: &[u8], note: String) -> ExtractionResult {
        match fs::symlink_metadata(dest) {
            Ok(meta) if meta.is_dir() => {
                let e = BundleError::io(
                    dest,
                    io::Error::new(io::ErrorKind::AlreadyExists, "destination is a directory"),
                );
                return error_result(label, &e);
            }
            Ok(meta) => {
                if meta.is_file() && util::same_content(dest, data) {
                    return ExtractionResult::new(label, ExtractStatus::Extracted, "unchanged");
                }
                if let Some(result) = self.resolve_existing(label, dest, "overwrite") {
                    return result;
                }
                if meta.file_type().is_symlink() {
                    info!(path = %dest.display(), "unlinking symlink at destination");
                    if let Err(e) = fs::remove_file(dest) {
                        return error_result(label, &BundleError::io(dest, e));
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return error_result(label, &BundleError::io(dest, e)),
        }

        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                return error_result(label, &BundleError::io(parent, e));
            }
        }
        match fs::write(dest, data) {
            Ok(()) => ExtractionResult::new(label, ExtractStatus::Extracted, note),
            Err(e) => error_result(label, &BundleError::io(dest, e)),
        }
    }

    fn delete(&mut self, label: &str, dest: &Path) -> ExtractionResult {
        match fs::symlink_metadata(dest) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                ExtractionResult::new(label, ExtractStatus::Skipped, "not present")
            }
            Err(e) => error_result(label, &BundleError::io(dest, e)),
            Ok(meta) if meta.is_dir() => {
                let e = BundleError::io(
                    dest,
                    io::Error::new(io::ErrorKind::AlreadyExists, "refusing to delete a directory"),
                );
                error_result(label, &e)
            }
            Ok(_) => {
                if let Some(result) = self.resolve_existing(label, dest, "delete") {
                    return result;
                }
                match fs::remove_file(dest) {
                    Ok(()) => ExtractionResult::new(label, ExtractStatus::Deleted, ""),
                    Err(e) => error_result(label, &BundleError::io(dest, e)),
                }
            }
        }
    }
}
