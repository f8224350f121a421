//! Output name templates.
//!
//! Supported placeholders: `[name]`, `[ext]`, and the digest placeholders
//! `[hash]`, `[chunkhash]` and `[contenthash]`, each with an optional
//! `:N` length (`[chunkhash:8]`). All three digest placeholders expand to
//! the digest of the file being named. Unknown placeholders are kept as
//! written.

use packline_util::hash;

/// Values substituted into a name template.
#[derive(Debug, Clone, Copy)]
pub struct NameParts<'a> {
    pub name: &'a str,
    /// Full hex digest; truncated per placeholder.
    pub hash: &'a str,
    /// Extension without the leading dot.
    pub ext: &'a str,
}

/// Expand `template` with `parts`.
#[must_use]
pub fn render(template: &str, parts: &NameParts<'_>) -> String {
    let mut out = String::with_capacity(template.len() + parts.hash.len());
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        let (key, len) = match token.split_once(':') {
            Some((key, n)) => (key, n.parse::<usize>().ok()),
            None => (token, None),
        };
        match key {
            "name" => out.push_str(parts.name),
            "ext" => out.push_str(parts.ext),
            "hash" | "chunkhash" | "contenthash" => {
                let len = len.unwrap_or(parts.hash.len());
                out.push_str(hash::short(parts.hash, len));
            }
            _ => {
                out.push('[');
                out.push_str(token);
                out.push(']');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Whether `template` embeds a digest.
#[must_use]
pub fn has_digest(template: &str) -> bool {
    ["[hash", "[chunkhash", "[contenthash"]
        .iter()
        .any(|p| template.contains(p))
}

/// Split a file name into stem and extension.
#[must_use]
pub fn stem_and_ext(file_name: &str) -> (&str, &str) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (file_name, ""),
    }
}
