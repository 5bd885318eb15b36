use std::fmt;
use std::str::FromStr;

use crate::parser;

/// How many leading bytes are inspected for NUL bytes.
const SNIFF_LEN: usize = 8 * 1024;

/// Primary text encoding of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
}

impl TextEncoding {
    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<String, String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(data)
                .map(str::to_owned)
                .map_err(|e| e.to_string()),
            TextEncoding::Utf16Le => {
                if data.len() % 2 != 0 {
                    return Err(format!("odd byte length {} for UTF-16", data.len()));
                }
                let units: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|e| e.to_string())
            }
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16le" | "utf16le" | "utf-16-le" => Ok(TextEncoding::Utf16Le),
            other => Err(format!("unsupported text encoding: {other}")),
        }
    }
}

/// Why a file went into the bundle as base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryReason {
    NulByte,
    Undecodable,
    /// Decodes fine, but parser cleanup would not give back the same bytes.
    NotLossless,
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    Text(String),
    Base64(BinaryReason),
}

/// Pick text or base64 for one file under the given encoding.
pub fn classify(data: &[u8], encoding: TextEncoding) -> Representation {
    if encoding == TextEncoding::Utf8 && data[..data.len().min(SNIFF_LEN)].contains(&0) {
        return Representation::Base64(BinaryReason::NulByte);
    }
    let text = match encoding.decode(data) {
        Ok(text) => text,
        Err(_) => return Representation::Base64(BinaryReason::Undecodable),
    };
    if text.contains('\0') {
        return Representation::Base64(BinaryReason::NulByte);
    }
    if !is_lossless_text(&text) {
        return Representation::Base64(BinaryReason::NotLossless);
    }
    Representation::Text(text)
}

/// True when `clean_block_lines(split_lines(text))` joined back equals `text`.
pub fn is_lossless_text(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    if !text.ends_with('\n') {
        return false;
    }
    let lines = split_lines(text);
    let (Some(first), Some(last)) = (lines.first(), lines.last()) else {
        return false;
    };
    if is_blank(first) || is_blank(last) || is_fence(first) || is_fence(last) {
        return false;
    }
    !lines.iter().any(|line| parser::is_structural_line(line))
}

/// Split on `\n`, keeping any `\r`. A final newline does not produce an empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').map(str::to_owned).collect()
}

/// Inverse of `split_lines` for newline-terminated text.
pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// A markdown code fence such as ```` ``` ```` or ```` ```rust ````.
pub fn is_fence(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Drop one leading and one trailing fence line, then surrounding blank lines.
pub fn clean_block_lines(mut lines: Vec<String>) -> Vec<String> {
    trim_blank_edges(&mut lines);
    if lines.first().is_some_and(|l| is_fence(l)) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| is_fence(l)) {
        lines.pop();
    }
    trim_blank_edges(&mut lines);
    lines
}

fn trim_blank_edges(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| is_blank(l)) {
        lines.pop();
    }
    let leading = lines.iter().take_while(|l| is_blank(l)).count();
    lines.drain(..leading);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_roundtrip() {
        let text = "h\u{e9}llo \u{1F600}\n";
        let bytes = TextEncoding::Utf16Le.encode(text);
        assert_eq!(bytes.len() % 2, 0);
        assert_eq!(TextEncoding::Utf16Le.decode(&bytes).unwrap(), text);
        assert!(TextEncoding::Utf16Le.decode(&bytes[1..]).is_err());
    }

    #[test]
    fn test_parse_encoding_names() {
        assert_eq!("utf8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("UTF-16LE".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16Le);
        assert!("latin1".parse::<TextEncoding>().is_err());
    }

    #[test]
    fn test_classify_binary_and_text() {
        assert_eq!(
            classify(b"abc\0def", TextEncoding::Utf8),
            Representation::Base64(BinaryReason::NulByte)
        );
        assert_eq!(
            classify(&[0xff, 0xfe, 0x41], TextEncoding::Utf8),
            Representation::Base64(BinaryReason::Undecodable)
        );
        assert_eq!(
            classify(b"fn main() {}\n", TextEncoding::Utf8),
            Representation::Text("fn main() {}\n".to_string())
        );
    }

    #[test]
    fn test_classify_rejects_lossy_text() {
        for sample in [
            "no trailing newline",
            "\nleading blank\n",
            "trailing blank\n\n",
            "```\nfenced\n",
            "x\n\u{1F408} --- CATS_END_FILE: x ---\ny\n",
            "x\n@@ PAWS_CMD DELETE_FILE() @@\n",
        ] {
            assert_eq!(
                classify(sample.as_bytes(), TextEncoding::Utf8),
                Representation::Base64(BinaryReason::NotLossless),
                "sample {sample:?}"
            );
        }
        assert!(matches!(
            classify(b"", TextEncoding::Utf8),
            Representation::Text(_)
        ));
    }

    #[test]
    fn test_split_and_join_keep_carriage_returns() {
        let text = "a\r\nb\r\n";
        let lines = split_lines(text);
        assert_eq!(lines, vec!["a\r", "b\r"]);
        assert_eq!(join_lines(&lines), text);
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("one"), vec!["one"]);
    }

    #[test]
    fn test_clean_block_lines_strips_fences_and_blanks() {
        let lines: Vec<String> = ["", "```javascript", "const a = 1;", "", "```", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(clean_block_lines(lines), vec!["const a = 1;"]);
    }
}
