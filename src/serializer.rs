use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::bundle_format::{
    BundleHeader, BundleKind, BundleSummary, EncodingMode, DELTA_REFERENCE_LINE, FORMAT_PREFIX,
};
use crate::encoding::{self, BinaryReason, Representation, TextEncoding};
use crate::error::{self, BundleError};
use crate::parser;
use crate::util;

/// Base64 payload line width.
const BASE64_LINE_LEN: usize = 76;

#[derive(Debug, Clone, Copy)]
pub struct BundleOptions {
    pub kind: BundleKind,
    pub mode: EncodingMode,
    /// Mark the bundle as usable as a delta reference.
    pub delta_reference: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            kind: BundleKind::Cats,
            mode: EncodingMode::Auto,
            delta_reference: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Forward-slash relative path written into the markers.
    pub path: String,
    pub data: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Serialize files into bundle text, in input order.
///
/// Fails when a path cannot be written into a marker line and read back
/// unchanged (embedded newlines, edge whitespace, a trailing base64 hint).
pub fn encode_bundle(
    files: &[SourceFile],
    options: &BundleOptions,
) -> error::Result<(String, BundleSummary)> {
    if let Some(file) = files
        .iter()
        .find(|f| !parser::marker_preserves_path(options.kind, &f.path))
    {
        return Err(BundleError::format(
            &file.path,
            "path cannot be represented in a file marker",
        ));
    }

    let (primary, full_base64) = match options.mode {
        EncodingMode::Auto => (TextEncoding::Utf8, false),
        EncodingMode::Text(encoding) => (encoding, false),
        EncodingMode::Base64 => (TextEncoding::Utf8, true),
    };

    let representations: Vec<Representation> = files
        .iter()
        .map(|file| {
            if full_base64 {
                Representation::Base64(BinaryReason::Forced)
            } else {
                encoding::classify(&file.data, primary)
            }
        })
        .collect();
    let any_base64 = representations
        .iter()
        .any(|r| matches!(r, Representation::Base64(_)));

    let header = BundleHeader {
        kind: Some(options.kind),
        encoding: primary,
        full_base64,
        delta_reference: options.delta_reference,
    };

    let mut out = String::new();
    out.push_str(options.kind.title());
    out.push('\n');
    out.push_str(&format!("{FORMAT_PREFIX} {}\n", header.format_description(any_base64)));
    if options.delta_reference {
        out.push_str(DELTA_REFERENCE_LINE);
        out.push('\n');
    }
    out.push('\n');

    let mut summary = BundleSummary {
        files_text: 0,
        files_base64: 0,
        bytes_in: 0,
    };

    for (file, representation) in files.iter().zip(representations) {
        summary.bytes_in += file.data.len() as u64;
        let base64 = matches!(representation, Representation::Base64(_));
        out.push_str(&options.kind.start_marker(&file.path, base64));
        out.push('\n');
        match representation {
            Representation::Text(text) => {
                summary.files_text += 1;
                out.push_str(&text);
            }
            Representation::Base64(reason) => {
                debug!(path = %file.path, ?reason, "encoding file as base64");
                summary.files_base64 += 1;
                push_base64(&mut out, &file.data);
            }
        }
        out.push_str(&options.kind.end_marker(&file.path, base64));
        out.push_str("\n\n");
    }

    Ok((out, summary))
}

fn push_base64(out: &mut String, data: &[u8]) {
    let encoded = STANDARD.encode(data);
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(BASE64_LINE_LEN));
        out.push_str(line);
        out.push('\n');
        rest = tail;
    }
}

/// Bundle every file under `inputs` (relative to `base`) into `output`.
/// Uses Tokio for the blocking directory walk and Rayon for parallel reads.
pub async fn create_bundle(
    inputs: &[PathBuf],
    base: &Path,
    output: &Path,
    options: BundleOptions,
) -> Result<BundleSummary> {
    let inputs_owned = inputs.to_vec();
    let base_owned = base.to_path_buf();
    let output_owned = output.to_path_buf();

    let entries = tokio::task::spawn_blocking(move || {
        util::collect_inputs(&inputs_owned, &base_owned, Some(output_owned.as_path()))
    })
    .await??;

    let files = tokio::task::spawn_blocking(move || -> Result<Vec<SourceFile>> {
        entries
            .par_iter()
            .map(|entry| -> Result<SourceFile> {
                let data = util::read_file(&entry.full_path)?;
                Ok(SourceFile::new(entry.relative_path.clone(), data))
            })
            .collect()
    })
    .await??;

    let (text, summary) = encode_bundle(&files, &options)?;

    let mut file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;
    file.write_all(text.as_bytes())?;
    file.flush()?;

    Ok(summary)
}
