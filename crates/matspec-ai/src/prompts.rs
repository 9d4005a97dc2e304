//! Instruction templates for the vision and generation stages.

use matspec_core::config::PromptSettings;
use matspec_core::{ConsolidatedContext, ImageMaterials, MaterialRecord, csi};

// ── Vision ──

const VISION_LEAD: &str =
    "Analyze this architectural visualization and identify the materials used.";

/// Body of the vision instruction; replaceable via `prompts.vision_instructions`.
pub const VISION_INSTRUCTIONS: &str = "\
For each material you identify, provide:
1. Material type (use standard architectural terms: glass, concrete, wood, metal, masonry, etc.)
2. Visual characteristics (color, texture, finish, pattern)
3. Approximate coverage/prominence (high/medium/low)
4. Specific architectural observations (e.g., \"curtain wall system\", \"timber cladding\", \"exposed concrete structure\")

Use professional architectural terminology:
- \"Curtain wall\" not \"glass wall system\"
- \"Cladding\" not \"exterior covering\"
- \"Timber\" or \"wood cladding\" not just \"wood\"
- \"CMU\" for concrete masonry units
- \"Low-E glass\" for energy-efficient glazing

Format as a structured list with clear material categories: one heading per material, \
followed by labelled lines for material type, visual characteristics, prominence and observations.";

/// First `max_chars` characters of the brief, with `...` when truncated.
pub fn brief_excerpt(brief: &str, max_chars: usize) -> String {
    let brief = brief.trim();
    match brief.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", brief[..cut].trim_end()),
        None => brief.to_string(),
    }
}

/// Full vision instruction for one image.
pub fn vision_prompt(brief_excerpt: &str, prompts: &PromptSettings) -> String {
    let body = prompts
        .vision_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(VISION_INSTRUCTIONS);
    format!("{VISION_LEAD}\n\nProject context: {brief_excerpt}\n\n{body}")
}

// ── Generation ──

/// Optional sections requested for every generated specification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionOptions {
    pub sustainability: bool,
    pub alternatives: bool,
}

const SPEC_LEAD: &str = "You are an architectural specification writer. Based on the material \
analysis below, create a professional material specification document.";

const SPEC_CORE_SECTIONS: &str = "\
Generate a specification document with these sections:

### 1. EXECUTIVE SUMMARY
   - Overview of material palette
   - Design intent and material selection rationale
   - Key material characteristics

### 2. MATERIAL SPECIFICATIONS (organized by CSI MasterFormat divisions)
   For each material category, provide:
   - Material description (use standard architectural terminology)
   - Performance characteristics
   - Typical applications in this project type
   - Installation considerations
   - Visual/esthetic qualities observed

   Organize materials by CSI divisions:";

const SPEC_SUSTAINABILITY: &str = "
### 3. SUSTAINABILITY CONSIDERATIONS
   - Embodied carbon considerations
   - Recyclability and lifecycle impacts
   - Energy performance implications
   - Sustainable sourcing options
";

const SPEC_ALTERNATIVES: &str = "
### 4. ALTERNATIVE MATERIALS
   - Comparable material options
   - Cost considerations
   - Performance trade-offs
   - Aesthetic alternatives
";

const SPEC_CLOSING: &str = "
Use professional specification language appropriate for architectural documentation.
Acknowledge that these are preliminary specifications based on design intent visualizations.
Include appropriate disclaimers about verifying material selections with manufacturers.

Format in markdown. Do not add a document title. Use level-3 headings (###) for the numbered \
sections above and level-4 headings (####) or deeper inside them. Do not add numbered \
sections other than those listed.
Be specific but acknowledge limitations of visual analysis.";

/// Generation prompt for one image group or the merged set.
pub fn specification_prompt(brief: &str, material_analysis: &str, options: SectionOptions) -> String {
    let mut prompt = format!(
        "{SPEC_LEAD}\n\nPROJECT BRIEF:\n{brief}\n\nMATERIAL ANALYSIS FROM VISUALIZATIONS:\n\
         {material_analysis}\n\n{SPEC_CORE_SECTIONS}\n"
    );
    for (code, name) in csi::DIVISIONS {
        prompt.push_str(&format!("   - Division {code}: {name}\n"));
    }
    if options.sustainability {
        prompt.push_str(SPEC_SUSTAINABILITY);
    }
    if options.alternatives {
        prompt.push_str(SPEC_ALTERNATIVES);
    }
    prompt.push_str(SPEC_CLOSING);
    prompt
}

// ── Material analysis rendering ──

fn render_record(rec: &MaterialRecord) -> String {
    let mut line = format!("{}. {}", rec.position, rec.label());
    if let Some(code) = rec.division() {
        line.push_str(&format!(" [{}]", csi::division_label(code)));
    }
    if let Some(p) = rec.prominence {
        line.push_str(&format!(" (prominence: {p})"));
    }
    if let Some(c) = &rec.characteristics {
        line.push_str(&format!("\n   Visual characteristics: {c}"));
    }
    if let Some(o) = &rec.observations {
        line.push_str(&format!("\n   Observations: {o}"));
    }
    line
}

/// Material analysis text for one image group.
///
/// When parsing found no materials the unparsed reply is passed through.
pub fn image_analysis_text(group: &ImageMaterials) -> String {
    let mut out = format!("Image: {}\n", group.image);
    if group.materials.is_empty() {
        out.push_str("No structured materials were extracted; the raw analysis follows.\n");
        out.push_str(group.raw_reply.trim());
    } else {
        let records: Vec<String> = group.materials.iter().map(render_record).collect();
        out.push_str(&records.join("\n"));
    }
    out
}

/// Material analysis text covering every analysed image.
pub fn consolidated_analysis_text(context: &ConsolidatedContext) -> String {
    let mut parts: Vec<String> = context.groups.iter().map(image_analysis_text).collect();

    let shared: Vec<String> = context
        .merged
        .iter()
        .filter(|m| m.images().len() > 1)
        .map(|m| format!("- {} (seen in {})", m.label, m.images().join(", ")))
        .collect();
    if !shared.is_empty() {
        parts.push(format!(
            "Materials appearing in more than one image:\n{}",
            shared.join("\n")
        ));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use matspec_core::{AnalysisOutcome, ImageAnalysis, Prominence, consolidate};

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(brief_excerpt("short brief", 200), "short brief");
        assert_eq!(brief_excerpt("abcdef", 3), "abc...");
        assert_eq!(brief_excerpt("ééééé", 2), "éé...");
        assert_eq!(brief_excerpt("exactly", 7), "exactly");
    }

    #[test]
    fn vision_prompt_includes_excerpt_and_override() {
        let default = vision_prompt("A library.", &PromptSettings::default());
        assert!(default.contains("Project context: A library."));
        assert!(default.contains("Low-E glass"));

        let custom = PromptSettings {
            vision_instructions: Some("List materials only.".into()),
        };
        let p = vision_prompt("A library.", &custom);
        assert!(p.ends_with("List materials only."));
        assert!(!p.contains("Low-E glass"));
    }

    #[test]
    fn optional_sections_only_when_requested() {
        let plain = specification_prompt("brief", "analysis", SectionOptions::default());
        assert!(plain.contains("EXECUTIVE SUMMARY"));
        assert!(plain.contains("Division 08: Openings"));
        assert!(!plain.contains("SUSTAINABILITY CONSIDERATIONS"));
        assert!(!plain.contains("ALTERNATIVE MATERIALS"));

        let both = specification_prompt(
            "brief",
            "analysis",
            SectionOptions {
                sustainability: true,
                alternatives: true,
            },
        );
        assert!(both.contains("SUSTAINABILITY CONSIDERATIONS"));
        assert!(both.contains("ALTERNATIVE MATERIALS"));
    }

    fn group(image: &str, materials: Vec<MaterialRecord>) -> ImageMaterials {
        ImageMaterials {
            index: 0,
            image: image.into(),
            materials,
            raw_reply: "The facade is mostly glass.".into(),
        }
    }

    #[test]
    fn analysis_text_lists_records() {
        let mut rec = MaterialRecord::new("a.png", 1);
        rec.material_type = Some("Low-E glass".into());
        rec.prominence = Some(Prominence::High);
        rec.characteristics = Some("clear, reflective".into());
        let text = image_analysis_text(&group("a.png", vec![rec]));
        assert!(text.starts_with("Image: a.png\n"));
        assert!(text.contains("1. Low-E glass [Division 08 - Openings] (prominence: high)"));
        assert!(text.contains("Visual characteristics: clear, reflective"));
    }

    #[test]
    fn analysis_text_falls_back_to_raw_reply() {
        let text = image_analysis_text(&group("a.png", vec![]));
        assert!(text.contains("The facade is mostly glass."));
    }

    #[test]
    fn consolidated_text_covers_every_group() {
        let analysis = |index: usize, image: &str| {
            let mut rec = MaterialRecord::new(image, 1);
            rec.material_type = Some("Brick".into());
            ImageAnalysis {
                index,
                image: image.into(),
                outcome: AnalysisOutcome::Analyzed {
                    materials: vec![rec],
                    raw_reply: String::new(),
                },
            }
        };
        let ctx = consolidate("brief", &[analysis(0, "a.png"), analysis(1, "b.png")]);
        let text = consolidated_analysis_text(&ctx);
        let a = text.find("Image: a.png").unwrap();
        let b = text.find("Image: b.png").unwrap();
        assert!(a < b);
        assert!(text.contains("- Brick (seen in a.png, b.png)"));
    }
}
