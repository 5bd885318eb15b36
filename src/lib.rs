//! Exchange project file trees with language models as single text bundles.

pub mod bundle_format;
pub mod conflict;
pub mod delta;
pub mod encoding;
pub mod error;
pub mod extract;
pub mod logging;
pub mod parser;
pub mod sanitize;
pub mod serializer;
pub mod util;

pub use bundle_format::{
    BlockContent, Bundle, BundleHeader, BundleKind, DeltaCommand, EncodingMode, ExtractStatus,
    ExtractionResult, FileBlock, OriginalReference,
};
pub use conflict::{OverwritePolicy, Prompter, TerminalPrompter};
pub use encoding::TextEncoding;
pub use error::BundleError;
pub use extract::{extract_bundle, load_reference, ExtractOptions, ExtractReport};
pub use parser::{parse_bundle, ParseOptions};
pub use serializer::{create_bundle, encode_bundle, BundleOptions, SourceFile};
