use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use paws::{
    BundleKind, BundleOptions, EncodingMode, ExtractOptions, OverwritePolicy, TerminalPrompter,
    TextEncoding,
};

#[derive(Parser)]
#[command(
    name = "paws",
    about = "Bundle file trees for language models and rebuild trees from their replies"
)]
struct Cli {
    /// Enable debug diagnostics on stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files and directories into a single bundle
    Bundle {
        /// Files or directories to include
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Output path for the bundle
        #[arg(long, short)]
        output: PathBuf,
        /// Directory that bundle paths are relative to
        #[arg(long, default_value = ".")]
        base: PathBuf,
        /// Write reply markers instead of reference markers
        #[arg(long)]
        reply: bool,
        /// How file contents are encoded
        #[arg(long, value_enum, default_value_t = EncodingArg::Auto)]
        encoding: EncodingArg,
        /// Mark the bundle as a baseline for delta replies
        #[arg(long)]
        delta_reference: bool,
    },
    /// Write the files of a bundle (or model reply) to disk
    Extract {
        /// Bundle to extract, `-` for stdin
        bundle: PathBuf,
        /// Output root directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
        /// What to do with files that already exist
        #[arg(long, value_enum, default_value_t = PolicyArg::Prompt)]
        policy: PolicyArg,
        /// Reference bundle that delta commands are applied against
        #[arg(long)]
        delta_from: Option<PathBuf>,
        /// Force the text encoding, overriding the bundle header
        #[arg(long, value_enum)]
        encoding: Option<TextArg>,
        /// Print per-file results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EncodingArg {
    Auto,
    Utf8,
    Utf16le,
    Base64,
}

impl From<EncodingArg> for EncodingMode {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Auto => EncodingMode::Auto,
            EncodingArg::Utf8 => EncodingMode::Text(TextEncoding::Utf8),
            EncodingArg::Utf16le => EncodingMode::Text(TextEncoding::Utf16Le),
            EncodingArg::Base64 => EncodingMode::Base64,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TextArg {
    Utf8,
    Utf16le,
}

impl From<TextArg> for TextEncoding {
    fn from(arg: TextArg) -> Self {
        match arg {
            TextArg::Utf8 => TextEncoding::Utf8,
            TextArg::Utf16le => TextEncoding::Utf16Le,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Overwrite,
    Skip,
    Prompt,
}

impl From<PolicyArg> for OverwritePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Overwrite => OverwritePolicy::Overwrite,
            PolicyArg::Skip => OverwritePolicy::Skip,
            PolicyArg::Prompt => OverwritePolicy::Prompt,
        }
    }
}

fn read_bundle_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read bundle from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bundle: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    paws::logging::init(cli.verbose);

    match cli.command {
        Commands::Bundle {
            paths,
            output,
            base,
            reply,
            encoding,
            delta_reference,
        } => {
            println!("Creating bundle...");
            println!("  Base: {}", base.display());
            println!("  Output: {}", output.display());

            let options = BundleOptions {
                kind: if reply { BundleKind::Dogs } else { BundleKind::Cats },
                mode: encoding.into(),
                delta_reference,
            };

            let start = Instant::now();
            let summary = paws::create_bundle(&paths, &base, &output, options).await?;
            let elapsed = start.elapsed();

            println!("\nBundle created successfully!");
            println!("  Text files: {}", summary.files_text);
            println!("  Base64 files: {}", summary.files_base64);
            println!("  Bytes bundled: {}", summary.bytes_in);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Extract {
            bundle,
            output,
            policy,
            delta_from,
            encoding,
            json,
        } => {
            let encoding_override = encoding.map(TextEncoding::from);
            let text = read_bundle_text(&bundle)?;
            let reference = match &delta_from {
                Some(path) => {
                    let reference_text = std::fs::read_to_string(path).with_context(|| {
                        format!("Failed to read reference bundle: {}", path.display())
                    })?;
                    Some(paws::load_reference(&reference_text, encoding_override)?)
                }
                None => None,
            };

            if !json {
                println!("Extracting bundle...");
                println!("  Bundle: {}", bundle.display());
                println!("  Output: {}", output.display());
                if let Some(path) = &delta_from {
                    println!("  Delta reference: {}", path.display());
                }
            }

            let options = ExtractOptions {
                output_dir: output,
                policy: policy.into(),
                reference,
                encoding_override,
            };

            let start = Instant::now();
            let report = tokio::task::spawn_blocking(move || {
                paws::extract_bundle(&text, &options, &mut TerminalPrompter)
            })
            .await??;
            let elapsed = start.elapsed();

            if json {
                println!("{}", serde_json::to_string_pretty(&report.results)?);
            } else {
                let summary = report.summary();
                println!("\nExtraction finished.");
                println!("  Extracted: {}", summary.extracted);
                println!("  Deleted: {}", summary.deleted);
                println!("  Skipped: {}", summary.skipped);
                println!("  Errors: {}", summary.errors);
                for failed in report.errors() {
                    println!("    {}: {}", failed.path, failed.message);
                }
                println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
            }

            Ok(if report.has_errors() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}
