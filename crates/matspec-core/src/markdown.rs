//! Line-level markdown helpers for model-generated specification text.
//!
//! Generated sections are treated as opaque text; these helpers only look at
//! section markers: ATX headings (`## Title`) and bold-only lines
//! (`**TITLE**`), ignoring anything inside fenced code blocks.

/// Level assigned to bold-only lines: below every ATX heading.
const BOLD_LEVEL: usize = 7;

/// A section marker found in a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Index of the marker line.
    pub line: usize,
    /// 1–6 for ATX headings, 7 for bold-only lines.
    pub level: usize,
    pub text: String,
}

impl Marker {
    pub fn is_heading(&self) -> bool {
        self.level < BOLD_LEVEL
    }
}

/// Parse an ATX heading line into `(level, text)`.
pub fn heading(line: &str) -> Option<(usize, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.bytes().take_while(|&b| b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let text = after.trim().trim_end_matches('#').trim_end();
    Some((level, text))
}

/// Text of a line that consists only of bold text, e.g. `**3. SUSTAINABILITY**`.
pub fn bold_line(line: &str) -> Option<&str> {
    let t = line.trim();
    let inner = t
        .strip_prefix("**")
        .and_then(|s| s.strip_suffix("**"))
        .or_else(|| t.strip_prefix("__").and_then(|s| s.strip_suffix("__")))?;
    let inner = inner.trim().trim_end_matches(':').trim_end();
    if inner.is_empty() || inner.contains("**") {
        return None;
    }
    Some(inner)
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// All section markers in document order, skipping fenced code.
pub fn markers(markdown: &str) -> Vec<Marker> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for (i, line) in markdown.lines().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, text)) = heading(line) {
            out.push(Marker {
                line: i,
                level,
                text: text.to_string(),
            });
        } else if let Some(text) = bold_line(line) {
            out.push(Marker {
                line: i,
                level: BOLD_LEVEL,
                text: text.to_string(),
            });
        }
    }
    out
}

/// Title text with emphasis and leading numbering removed, lowercased.
///
/// `**3. Sustainability Considerations:**` becomes `sustainability considerations:`.
fn plain_title(text: &str) -> String {
    let text: String = text.chars().filter(|c| !matches!(c, '*' | '_')).collect();
    let text = text.trim();
    let numbering = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ')'))
        .unwrap_or(text.len());
    let rest = &text[numbering..];
    let text = if numbering > 0 && (rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        rest.trim_start()
    } else {
        text
    };
    text.to_lowercase()
}

/// True when the marker title starts with `keyword` (case-insensitive).
fn title_starts_with(marker: &Marker, keyword: &str) -> bool {
    plain_title(&marker.text).starts_with(&keyword.to_lowercase())
}

/// Level of the top-level sections in a generated reply.
///
/// That is the level of the "Executive Summary" marker when there is one,
/// otherwise the shallowest marker level, ignoring a lone leading `#` title.
fn section_level(all: &[Marker]) -> Option<usize> {
    if let Some(summary) = all.iter().find(|m| title_starts_with(m, "executive summary")) {
        return Some(summary.level);
    }
    let body = match all.split_first() {
        Some((first, rest)) if first.level == 1 && rest.iter().all(|m| m.level > 1) => rest,
        _ => all,
    };
    body.iter().map(|m| m.level).min()
}

/// Index of the first top-level marker whose title starts with `keyword`.
fn find_section(all: &[Marker], keyword: &str, level: Option<usize>) -> Option<usize> {
    let level = level?;
    all.iter()
        .position(|m| m.level == level && title_starts_with(m, keyword))
}

/// True when a top-level section title starts with `keyword`.
///
/// Nested headings never count: `##### Sustainably Harvested Cedar` under a
/// CSI division is material content, not a sustainability section.
pub fn has_section(markdown: &str, keyword: &str) -> bool {
    let all = markers(markdown);
    find_section(&all, keyword, section_level(&all)).is_some()
}

/// Line range `[start, end)` of the section introduced by `markers[idx]`.
fn section_range(markers: &[Marker], idx: usize, total_lines: usize) -> (usize, usize) {
    let start = &markers[idx];
    let end = markers[idx + 1..]
        .iter()
        .find(|m| m.level <= start.level)
        .map(|m| m.line)
        .unwrap_or(total_lines);
    (start.line, end)
}

fn split_lines(markdown: &str, start: usize, end: usize) -> (String, String) {
    let mut rest = Vec::new();
    let mut block = Vec::new();
    for (i, line) in markdown.lines().enumerate() {
        if (start..end).contains(&i) {
            block.push(line);
        } else {
            rest.push(line);
        }
    }
    (
        rest.join("\n").trim().to_string(),
        block.join("\n").trim().to_string(),
    )
}

fn extract_at(markdown: &str, keyword: &str, level: Option<usize>) -> (String, Option<String>) {
    let all = markers(markdown);
    match find_section(&all, keyword, level) {
        Some(idx) => {
            let (start, end) = section_range(&all, idx, markdown.lines().count());
            let (rest, block) = split_lines(markdown, start, end);
            (rest, Some(block))
        }
        None => (markdown.trim().to_string(), None),
    }
}

/// Split off the first top-level section whose title starts with `keyword`.
///
/// Returns the remaining text and the extracted block, marker line and nested
/// subsections included.
pub fn extract_section(markdown: &str, keyword: &str) -> (String, Option<String>) {
    let level = section_level(&markers(markdown));
    extract_at(markdown, keyword, level)
}

/// Remove every top-level section whose title starts with `keyword`.
pub fn strip_sections(markdown: &str, keyword: &str) -> String {
    let level = section_level(&markers(markdown));
    let mut text = markdown.trim().to_string();
    loop {
        let (rest, block) = extract_at(&text, keyword, level);
        if block.is_none() {
            return rest;
        }
        text = rest;
    }
}

/// Shift headings down so the shallowest one sits at `min_level`.
///
/// Relative structure is kept; levels are capped at 6. Text that already
/// starts at or below `min_level` is returned unchanged.
pub fn demote_headings(markdown: &str, min_level: usize) -> String {
    let shallowest = markers(markdown)
        .iter()
        .filter(|m| m.is_heading())
        .map(|m| m.level)
        .min();
    let shift = match shallowest {
        Some(level) if level < min_level => min_level - level,
        _ => return markdown.to_string(),
    };

    let mut out = Vec::new();
    let mut in_fence = false;
    for line in markdown.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        match heading(line) {
            Some((level, text)) if !in_fence => {
                let new_level = (level + shift).min(6);
                out.push(format!("{} {}", "#".repeat(new_level), text));
            }
            _ => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

/// Drop a leading level-1 title line, which would duplicate the section header
/// the formatter adds.
pub fn strip_leading_title(markdown: &str) -> String {
    let trimmed = markdown.trim_start();
    let first = trimmed.lines().next().unwrap_or_default();
    match heading(first) {
        Some((1, _)) => trimmed[first.len()..].trim().to_string(),
        _ => markdown.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
### 1. Executive Summary
Overview text.

### 2. Material Specifications
#### Division 08 - Openings
Curtain wall.

### 3. Sustainability Considerations
- Embodied carbon
#### Sustainable sourcing
FSC timber.

### 4. Alternative Materials
- Fibre cement instead of timber";

    #[test]
    fn parses_atx_headings() {
        assert_eq!(heading("## Title"), Some((2, "Title")));
        assert_eq!(heading("### Closed ###"), Some((3, "Closed")));
        assert_eq!(heading("   # Indented"), Some((1, "Indented")));
        assert_eq!(heading("#hashtag"), None);
        assert_eq!(heading("    # code"), None);
        assert_eq!(heading("####### seven"), None);
    }

    #[test]
    fn bold_lines_are_markers() {
        let md = "**EXECUTIVE SUMMARY**\ntext\n**Note:** inline bold is not a marker";
        let m = markers(md);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].text, "EXECUTIVE SUMMARY");
        assert_eq!(m[0].level, 7);
    }

    #[test]
    fn fenced_code_is_ignored() {
        let md = "```\n# not a heading\n```\n## Real";
        let m = markers(md);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].text, "Real");
    }

    #[test]
    fn has_section_is_case_insensitive() {
        assert!(has_section(SAMPLE, "executive summary"));
        assert!(has_section(SAMPLE, "SUSTAINABILITY"));
        assert!(!has_section("plain text about sustainability", "sustainability"));
    }

    #[test]
    fn titles_ignore_numbering_and_emphasis() {
        let md = "**1. EXECUTIVE SUMMARY**\ntext\n**3. _Sustainability_ Considerations:**\ns";
        assert!(has_section(md, "sustainability"));
        assert_eq!(plain_title("**3.1 Alternative Materials**"), "alternative materials");
        assert_eq!(plain_title("3D printed panels"), "3d printed panels");
    }

    #[test]
    fn nested_material_headings_are_not_sections() {
        let md = "\
### 1. Executive Summary
Timber-led palette.

### 2. Material Specifications
#### Division 06 - Wood
##### Sustainably Harvested Cedar Cladding
Vertical FSC cedar boards, 19 mm.
##### Alternative fixings
Concealed clips.";
        assert!(!has_section(md, "sustainability"));
        assert!(!has_section(md, "alternative materials"));
        let (rest, block) = extract_section(md, "sustainab");
        assert!(block.is_none());
        assert!(rest.contains("FSC cedar"));
        assert_eq!(strip_sections(md, "alternative"), md);
    }

    #[test]
    fn sections_are_found_below_a_leading_title() {
        let md = "# Material Specifications\n## Overview\no\n## Sustainability\ns";
        assert!(has_section(md, "sustainability"));
        assert!(!has_section(md, "material specifications"));
    }

    #[test]
    fn extract_takes_outermost_match_with_children() {
        let (rest, block) = extract_section(SAMPLE, "sustainability");
        let block = block.unwrap();
        assert!(block.starts_with("### 3. Sustainability Considerations"));
        assert!(block.contains("FSC timber."));
        assert!(!block.contains("Alternative Materials"));
        assert!(!rest.contains("Sustainab"));
        assert!(rest.contains("### 4. Alternative Materials"));
        assert!(rest.contains("Curtain wall."));
    }

    #[test]
    fn extract_missing_section_returns_text_unchanged() {
        let (rest, block) = extract_section("### Executive Summary\nx", "alternative materials");
        assert!(block.is_none());
        assert_eq!(rest, "### Executive Summary\nx");
    }

    #[test]
    fn strip_removes_top_level_sections_only() {
        let md = "### A\na\n### Sustainability\ns\n### B\nb\n#### Sustainable note\nn\n### Sustainability, again\nt";
        let out = strip_sections(md, "sustainability");
        assert!(!has_section(&out, "sustainability"));
        assert_eq!(out, "### A\na\n### B\nb\n#### Sustainable note\nn");
    }

    #[test]
    fn demote_shifts_relative_levels() {
        let md = "# Title\n## Sub\n```\n# code\n```\ntext";
        let out = demote_headings(md, 3);
        assert_eq!(out, "### Title\n#### Sub\n```\n# code\n```\ntext");
    }

    #[test]
    fn demote_leaves_deep_headings_alone() {
        let md = "### Already deep\n#### Deeper";
        assert_eq!(demote_headings(md, 3), md);
    }

    #[test]
    fn demote_caps_at_six() {
        let out = demote_headings("# A\n###### F", 3);
        assert_eq!(out, "### A\n###### F");
    }

    #[test]
    fn strips_leading_title_only() {
        let md = "\n# Material Specifications - a.png\n\n### Executive Summary\ntext";
        assert_eq!(strip_leading_title(md), "### Executive Summary\ntext");
        assert_eq!(strip_leading_title("## Keep\nx"), "## Keep\nx");
    }
}
