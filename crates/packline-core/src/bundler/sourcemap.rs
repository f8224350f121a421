//! V3 source maps built from line or position origins.

use serde::Serialize;

/// VLQ-encode a signed integer and append to output string.
fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20; // continuation bit
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapJson<'a> {
    version: u8,
    file: &'a str,
    sources: &'a [String],
    sources_content: &'a [String],
    mappings: String,
}

/// Collects line or position mappings and renders a V3 source map.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: Vec<String>,
    /// (generated line, generated column, source index, source line), all
    /// 0-based.
    mappings: Vec<(u32, u32, u32, u32)>,
}

impl SourceMapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its index.
    pub fn add_source(&mut self, path: &str, content: &str) -> u32 {
        if let Some(existing) = self.sources.iter().position(|s| s == path) {
            return existing as u32;
        }
        let idx = self.sources.len() as u32;
        self.sources.push(path.to_string());
        self.sources_content.push(content.to_string());
        idx
    }

    /// Map generated line `output_line` to `source_line` of `source_idx`.
    pub fn add_line_mapping(&mut self, output_line: u32, source_idx: u32, source_line: u32) {
        self.add_mapping(output_line, 0, source_idx, source_line);
    }

    /// Map generated position `output_line:output_column` to the start of
    /// `source_line` of `source_idx`.
    pub fn add_mapping(
        &mut self,
        output_line: u32,
        output_column: u32,
        source_idx: u32,
        source_line: u32,
    ) {
        self.mappings
            .push((output_line, output_column, source_idx, source_line));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Render the map as JSON.
    #[must_use]
    pub fn generate(&self, file: &str) -> String {
        let mut mappings = String::new();
        let mut line: u32 = 0;
        let mut prev_source: i64 = 0;
        let mut prev_source_line: i64 = 0;

        let mut prev_column: i64 = 0;
        let mut first_in_line = true;

        let mut sorted = self.mappings.clone();
        sorted.sort_unstable();
        sorted.dedup_by_key(|m| (m.0, m.1));

        for (output_line, output_column, source_idx, source_line) in sorted {
            while line < output_line {
                mappings.push(';');
                line += 1;
                prev_column = 0;
                first_in_line = true;
            }
            if !first_in_line {
                mappings.push(',');
            }
            first_in_line = false;
            vlq_encode(i64::from(output_column) - prev_column, &mut mappings);
            prev_column = i64::from(output_column);
            vlq_encode(i64::from(source_idx) - prev_source, &mut mappings);
            vlq_encode(i64::from(source_line) - prev_source_line, &mut mappings);
            vlq_encode(0, &mut mappings);
            prev_source = i64::from(source_idx);
            prev_source_line = i64::from(source_line);
        }

        let json = SourceMapJson {
            version: 3,
            file,
            sources: &self.sources,
            sources_content: &self.sources_content,
            mappings,
        };
        serde_json::to_string(&json).unwrap_or_default()
    }
}
