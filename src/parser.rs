use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::bundle_format::{
    BlockContent, Bundle, BundleHeader, BundleKind, DeltaCommand, FileBlock, FULL_BASE64_FORMAT,
};
use crate::encoding::{self, TextEncoding};
use crate::error::BundleError;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:\S+\s*)?---\s*(CATS|DOGS)_(START|END)_FILE:\s*(.+?)(\s*\(Content:Base64\))?\s*---\s*$",
    )
    .expect("marker pattern is valid")
});

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*@@\s*PAWS_CMD\s*(.*?)\s*@@\s*$").expect("directive pattern is valid")
});

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(REPLACE_LINES|INSERT_AFTER_LINE|DELETE_LINES|DELETE_FILE)\s*\(([^()]*)\)$")
        .expect("command pattern is valid")
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*(Cats|Dogs)\s+Bundle\b").expect("title pattern is valid"));

static FORMAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*Format:\s*(.*?)\s*$").expect("format pattern is valid"));

static PRIMARY_ENCODING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Primary Encoding:\s*([A-Za-z0-9_-]+)").expect("encoding pattern is valid")
});

static DELTA_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^#\s*Delta Reference:\s*yes\s*$").expect("delta reference pattern is valid")
});

/// Label used for issues that do not belong to a file block.
pub const HEADER_LABEL: &str = "(bundle header)";

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Recognise `@@ PAWS_CMD ... @@` directives inside text blocks.
    pub delta_mode: bool,
    /// Caller-supplied encoding; beats both the header and the default.
    pub encoding_override: Option<TextEncoding>,
}

#[derive(Debug)]
pub struct ParseOutcome {
    pub bundle: Bundle,
    /// File-scoped format and encoding problems, in input order.
    pub issues: Vec<BundleError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    Start {
        path: String,
        base64: bool,
    },
    End {
        path: String,
    },
}

#[derive(Debug)]
enum State {
    Outside,
    InsideFile(OpenBlock),
}

#[derive(Debug)]
struct OpenBlock {
    path: String,
    binary: bool,
    buffer: Vec<String>,
    commands: Vec<DeltaCommand>,
    /// Lines seen before the first directive of a delta block.
    preamble: Vec<String>,
}

impl OpenBlock {
    fn new(path: String, binary: bool) -> Self {
        Self {
            path,
            binary,
            buffer: Vec::new(),
            commands: Vec::new(),
            preamble: Vec::new(),
        }
    }
}

/// True for lines the parser would treat as a marker or a delta directive.
pub fn is_structural_line(line: &str) -> bool {
    MARKER_RE.is_match(line) || DIRECTIVE_RE.is_match(line)
}

fn parse_marker(line: &str) -> Option<Marker> {
    let caps = MARKER_RE.captures(line)?;
    BundleKind::from_tag(&caps[1])?;
    let path = caps[3].trim().to_string();
    match &caps[2] {
        "START" => Some(Marker::Start {
            path,
            base64: caps.get(4).is_some(),
        }),
        _ => Some(Marker::End { path }),
    }
}

/// True when `path` written into a marker of `kind` reads back unchanged,
/// with or without the base64 hint.
pub fn marker_preserves_path(kind: BundleKind, path: &str) -> bool {
    !path.is_empty()
        && [false, true].into_iter().all(|base64| {
            matches!(
                parse_marker(&kind.start_marker(path, base64)),
                Some(Marker::Start { path: read, base64: hint }) if read == path && hint == base64
            )
        })
}

/// Parse the body of a directive (`REPLACE_LINES(3, 5)` etc). `None` when the
/// command name or its arguments are not understood.
pub fn parse_command(body: &str) -> Option<DeltaCommand> {
    let caps = COMMAND_RE.captures(body.trim())?;
    let args: Vec<&str> = caps[2]
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    let numbers = args
        .iter()
        .map(|a| a.parse::<usize>().ok())
        .collect::<Option<Vec<usize>>>()?;

    match (&caps[1], numbers.as_slice()) {
        ("REPLACE_LINES", [start, end]) => Some(DeltaCommand::Replace {
            start: *start,
            end: *end,
            lines: Vec::new(),
        }),
        ("INSERT_AFTER_LINE", [line]) => Some(DeltaCommand::InsertAfter {
            line: *line,
            lines: Vec::new(),
        }),
        ("DELETE_LINES", [start, end]) => Some(DeltaCommand::Delete {
            start: *start,
            end: *end,
        }),
        ("DELETE_FILE", []) => Some(DeltaCommand::DeleteFile),
        _ => None,
    }
}

struct Parser {
    options: ParseOptions,
    header: BundleHeader,
    blocks: Vec<FileBlock>,
    issues: Vec<BundleError>,
}

impl Parser {
    fn text_encoding(&self) -> TextEncoding {
        self.options.encoding_override.unwrap_or(self.header.encoding)
    }

    fn transition(&mut self, state: State, line: &str) -> State {
        match (state, parse_marker(line)) {
            (State::Outside, Some(Marker::Start { path, base64 })) => {
                let binary = base64 || self.header.full_base64;
                debug!(path = %path, binary, "start of file block");
                State::InsideFile(OpenBlock::new(path, binary))
            }
            (State::Outside, Some(Marker::End { path })) => {
                warn!(path = %path, "end marker without a matching start marker, ignored");
                self.issues.push(BundleError::format(
                    path,
                    "end marker without a matching start marker",
                ));
                State::Outside
            }
            (State::Outside, None) => {
                self.read_header_line(line);
                State::Outside
            }
            (State::InsideFile(block), Some(Marker::End { path })) => {
                if path == block.path {
                    self.finalize(block);
                } else {
                    warn!(
                        start = %block.path,
                        end = %path,
                        "end marker names a different file, block discarded"
                    );
                    self.issues.push(BundleError::format(
                        block.path,
                        format!("end marker names a different file '{path}'"),
                    ));
                }
                State::Outside
            }
            (State::InsideFile(block), Some(Marker::Start { path, base64 })) => {
                warn!(
                    open = %block.path,
                    next = %path,
                    "start marker inside an open block, unterminated block discarded"
                );
                self.issues.push(BundleError::format(
                    block.path,
                    "missing end marker before the next start marker",
                ));
                let binary = base64 || self.header.full_base64;
                State::InsideFile(OpenBlock::new(path, binary))
            }
            (State::InsideFile(mut block), None) => {
                self.absorb_line(&mut block, line);
                State::InsideFile(block)
            }
        }
    }

    fn read_header_line(&mut self, line: &str) {
        let line = line.trim();
        if let Some(caps) = TITLE_RE.captures(line) {
            self.header.kind = BundleKind::from_tag(&caps[1].to_ascii_uppercase());
        } else if let Some(caps) = FORMAT_RE.captures(line) {
            let description = &caps[1];
            self.header.full_base64 = description.contains(FULL_BASE64_FORMAT);
            if let Some(enc) = PRIMARY_ENCODING_RE.captures(description) {
                match enc[1].parse::<TextEncoding>() {
                    Ok(encoding) => self.header.encoding = encoding,
                    Err(message) => {
                        warn!(%message, "unrecognised primary encoding in header, using UTF-8");
                        self.issues.push(BundleError::format(HEADER_LABEL, message));
                    }
                }
            }
        } else if DELTA_REF_RE.is_match(line) {
            self.header.delta_reference = true;
        }
    }

    fn absorb_line(&mut self, block: &mut OpenBlock, line: &str) {
        if !self.options.delta_mode || block.binary {
            block.buffer.push(line.to_string());
            return;
        }
        let Some(caps) = DIRECTIVE_RE.captures(line) else {
            block.buffer.push(line.to_string());
            return;
        };
        let Some(command) = parse_command(&caps[1]) else {
            warn!(path = %block.path, directive = line.trim(), "unparseable delta directive kept as content");
            block.buffer.push(line.to_string());
            return;
        };

        let buffered = std::mem::take(&mut block.buffer);
        match block.commands.last_mut() {
            None => block.preamble = buffered,
            Some(previous) => close_payload(&block.path, previous, buffered),
        }
        block.commands.push(command);
    }

    fn finalize(&mut self, mut block: OpenBlock) {
        let encoding = self.text_encoding();

        if block.commands.is_empty() {
            let lines = encoding::clean_block_lines(block.buffer);
            let content = if block.binary {
                let packed: String = lines.concat().split_whitespace().collect();
                match STANDARD.decode(packed.as_bytes()) {
                    Ok(data) => BlockContent::Binary(data),
                    Err(e) => {
                        warn!(path = %block.path, error = %e, "invalid base64 content, block discarded");
                        self.issues.push(BundleError::Encoding {
                            path: block.path,
                            encoding: "Base64".to_string(),
                            message: e.to_string(),
                        });
                        return;
                    }
                }
            } else {
                BlockContent::Text(encoding::join_lines(&lines))
            };
            self.blocks.push(FileBlock {
                path: block.path,
                binary: block.binary,
                encoding,
                content,
            });
            return;
        }

        let mut tail = std::mem::take(&mut block.buffer);
        trim_trailing_fence(&mut tail);
        if let Some(last) = block.commands.last_mut() {
            close_payload(&block.path, last, tail);
        }

        let preamble: Vec<String> = block
            .preamble
            .into_iter()
            .filter(|l| !encoding::is_blank(l) && !encoding::is_fence(l))
            .collect();
        if !preamble.is_empty() {
            match block.commands.first_mut().and_then(DeltaCommand::payload_mut) {
                Some(payload) => {
                    let mut merged = preamble;
                    merged.append(payload);
                    *payload = merged;
                }
                None => warn!(
                    path = %block.path,
                    lines = preamble.len(),
                    "content before the first delta directive discarded"
                ),
            }
        }

        let deletes_file = block
            .commands
            .iter()
            .any(|c| matches!(c, DeltaCommand::DeleteFile));
        if deletes_file && block.commands.len() > 1 {
            warn!(path = %block.path, "DELETE_FILE mixed with other commands, block discarded");
            self.issues.push(BundleError::format(
                block.path,
                "DELETE_FILE() must be the only command in its block",
            ));
            return;
        }

        self.blocks.push(FileBlock {
            path: block.path,
            binary: false,
            encoding,
            content: BlockContent::Delta(block.commands),
        });
    }
}

/// Hand buffered lines to `command` as its payload. Delete-type commands take
/// no payload; anything substantive buffered after one is dropped.
fn close_payload(path: &str, command: &mut DeltaCommand, lines: Vec<String>) {
    match command.payload_mut() {
        Some(payload) => *payload = lines,
        None => {
            if lines.iter().any(|l| !encoding::is_blank(l) && !encoding::is_fence(l)) {
                warn!(path, command = %command, "content after a delete command discarded");
            }
        }
    }
}

/// The closing fence of a chat-wrapped block ends up after the last payload.
fn trim_trailing_fence(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| encoding::is_blank(l)) {
        lines.pop();
    }
    if lines.last().is_some_and(|l| encoding::is_fence(l)) {
        lines.pop();
        while lines.last().is_some_and(|l| encoding::is_blank(l)) {
            lines.pop();
        }
    }
}

/// Parse bundle text into file blocks plus file-scoped issues.
pub fn parse_bundle(text: &str, options: ParseOptions) -> ParseOutcome {
    let mut parser = Parser {
        options,
        header: BundleHeader::default(),
        blocks: Vec::new(),
        issues: Vec::new(),
    };

    // Split on '\n' only so carriage returns inside content survive.
    let mut state = State::Outside;
    for line in text.split('\n') {
        state = parser.transition(state, line);
    }

    if let State::InsideFile(block) = state {
        warn!(path = %block.path, "bundle ended inside a file block, block discarded");
        parser
            .issues
            .push(BundleError::format(block.path, "missing end marker at end of input"));
    }

    if let Some(encoding) = options.encoding_override {
        parser.header.encoding = encoding;
    }

    ParseOutcome {
        bundle: Bundle {
            header: parser.header,
            blocks: parser.blocks,
        },
        issues: parser.issues,
    }
}
