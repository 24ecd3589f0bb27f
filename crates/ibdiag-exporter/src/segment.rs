//! Dump segmentation
//!
//! Both ibdiagnet reports are a flat text stream in which every entity opens
//! with a header line. Splitting on those headers gives one block per switch
//! or adapter (net dump) or per port (pm dump).

use crate::error::{ExporterError, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Net-dump node header, e.g.
/// `"MF0;leaf-01:MQM8700/U1", SW, 0x0c42a10300a1b2c3, LID 12`
pub const NODE_HEADER_PATTERN: &str = r#"(?m)^[ \t]*"(?P<name>.*)",\s(?P<kind>\w+),\s(?P<guid>0x[[:xdigit:]]{16}),\sLID\s(?P<lid>\d+)"#;

/// Same header, anchored at the start of a block
const NODE_HEADER_ANCHORED: &str =
    r#"\A"(?P<name>.*)",\s(?P<kind>\w+),\s(?P<guid>0x[[:xdigit:]]{16}),\sLID\s(?P<lid>\d+)"#;

/// Read a whole dump file
pub fn read_dump(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| ExporterError::io(path, e))
}

/// Splits dump text into blocks starting at each header match
#[derive(Debug, Clone)]
pub struct BlockSegmenter {
    name: &'static str,
    header: Regex,
}

impl BlockSegmenter {
    pub fn new(name: &'static str, header_pattern: &str) -> Result<Self> {
        let header = Regex::new(header_pattern).map_err(|source| ExporterError::Grammar {
            grammar: name,
            source,
        })?;
        Ok(Self { name, header })
    }

    /// Segmenter for net-dump node blocks
    pub fn net_dump() -> Result<Self> {
        Self::new("net_dump_header", NODE_HEADER_PATTERN)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Blocks in file order, each trimmed. Text before the first header is
    /// dropped; no header at all yields no blocks.
    pub fn segment<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let starts: Vec<usize> = self.header.find_iter(text).map(|m| m.start()).collect();

        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(text.len());
                text[start..end].trim()
            })
            .collect()
    }
}

/// Identity of one net-dump node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub name: String,
    /// Node type token, `SW` or `CA`
    pub kind: String,
    /// Lowercased `0x`-prefixed guid
    pub guid: String,
    pub lid: String,
}

/// Recovers the [`NodeHeader`] of a block
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    anchored: Regex,
}

impl HeaderExtractor {
    pub fn new() -> Result<Self> {
        let anchored = Regex::new(NODE_HEADER_ANCHORED).map_err(|source| ExporterError::Grammar {
            grammar: "net_dump_header_anchored",
            source,
        })?;
        Ok(Self { anchored })
    }

    /// Parse the header at the very start of `block`.
    ///
    /// Segmentation guarantees a header, but a block handed in from elsewhere
    /// may not have one; that is reported rather than assumed.
    pub fn extract(&self, block: &str) -> Result<NodeHeader> {
        let caps = self
            .anchored
            .captures(block)
            .ok_or_else(|| ExporterError::malformed_header(block))?;

        Ok(NodeHeader {
            name: caps["name"].to_string(),
            kind: caps["kind"].to_string(),
            guid: caps["guid"].to_ascii_lowercase(),
            lid: caps["lid"].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"
ibdiagnet fabric dump, generated for tests

"MF0;leaf-01:MQM8700/U1", SW, 0x0c42a10300a1b2c3, LID 12
      1/1/1 : 1   : ACT : LINK UP : 4 : 50G : 4096 : RS_FEC : NO-RTR : 0x0c42a10300d4e5f6 : mlx5_0/1/1/1 : 35 : "node01 HCA-1"

"MF0;spine-01:MQM8700/U1", SW, 0x0C42A10300FFEE01, LID 40
      1/1/1 : 1   : ACT : LINK UP : 4 : 50G : 4096 : RS_FEC : NO-RTR : 0x0c42a10300a1b2c3 : 1/2/1 : 12 : "MF0;leaf-01:MQM8700/U1"
"#;

    #[test]
    fn test_segment_one_block_per_header() {
        let segmenter = BlockSegmenter::net_dump().unwrap();
        let blocks = segmenter.segment(DUMP);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("\"MF0;leaf-01"));
        assert!(blocks[1].starts_with("\"MF0;spine-01"));
        assert!(blocks[1].ends_with("\"MF0;leaf-01:MQM8700/U1\""));
    }

    #[test]
    fn test_segment_concatenation_covers_text_after_first_header() {
        let segmenter = BlockSegmenter::net_dump().unwrap();
        let blocks = segmenter.segment(DUMP);
        let first = DUMP.find("\"MF0;leaf-01").unwrap();

        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(strip(&blocks.concat()), strip(&DUMP[first..]));
    }

    #[test]
    fn test_segment_without_headers_is_empty() {
        let segmenter = BlockSegmenter::net_dump().unwrap();
        assert!(segmenter.segment("no headers in here\n").is_empty());
        assert!(segmenter.segment("").is_empty());
    }

    #[test]
    fn test_header_extract() {
        let segmenter = BlockSegmenter::net_dump().unwrap();
        let extractor = HeaderExtractor::new().unwrap();
        let blocks = segmenter.segment(DUMP);

        let header = extractor.extract(blocks[0]).unwrap();
        assert_eq!(header.name, "MF0;leaf-01:MQM8700/U1");
        assert_eq!(header.kind, "SW");
        assert_eq!(header.guid, "0x0c42a10300a1b2c3");
        assert_eq!(header.lid, "12");
    }

    #[test]
    fn test_header_guid_is_lowercased() {
        let extractor = HeaderExtractor::new().unwrap();
        let header = extractor
            .extract(r#""spine", SW, 0x0C42A10300FFEE01, LID 40"#)
            .unwrap();
        assert_eq!(header.guid, "0x0c42a10300ffee01");
    }

    #[test]
    fn test_header_extract_rejects_block_without_header() {
        let extractor = HeaderExtractor::new().unwrap();
        let result = extractor.extract("      1/1/1 : 1 : ACT : LINK UP");
        assert!(matches!(
            result,
            Err(ExporterError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_read_dump_missing_file() {
        let result = read_dump(Path::new("/nonexistent/ibdiagnet2.net_dump"));
        assert!(matches!(result, Err(ExporterError::Io { .. })));
    }
}
