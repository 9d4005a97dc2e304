//! CSI MasterFormat division lookup for architectural materials.
//!
//! Only the divisions that visualisations can plausibly show are covered
//! (03 Concrete through 10 Specialties). Lookup is keyword based: the keyword
//! that appears earliest in the text wins, so "metal cladding" files under
//! Metals while "cladding panels of zinc" files under Thermal and Moisture
//! Protection.

/// Division codes and titles, in division order.
pub const DIVISIONS: &[(&str, &str)] = &[
    ("03", "Concrete"),
    ("04", "Masonry"),
    ("05", "Metals"),
    ("06", "Wood, Plastics, and Composites"),
    ("07", "Thermal and Moisture Protection"),
    ("08", "Openings"),
    ("09", "Finishes"),
    ("10", "Specialties"),
];

/// Material keyword → division code.
const KEYWORDS: &[(&str, &str)] = &[
    ("concrete", "03"),
    ("precast", "03"),
    ("cast-in-place", "03"),
    ("cementitious", "03"),
    ("masonry", "04"),
    ("brick", "04"),
    ("stone", "04"),
    ("limestone", "04"),
    ("sandstone", "04"),
    ("granite", "04"),
    ("marble", "04"),
    ("terracotta", "04"),
    ("terra cotta", "04"),
    ("cmu", "04"),
    ("metal", "05"),
    ("aluminum", "05"),
    ("aluminium", "05"),
    ("steel", "05"),
    ("copper", "05"),
    ("zinc", "05"),
    ("bronze", "05"),
    ("corten", "05"),
    ("wood", "06"),
    ("timber", "06"),
    ("composite", "06"),
    ("plywood", "06"),
    ("glulam", "06"),
    ("clt", "06"),
    ("bamboo", "06"),
    ("cladding", "07"),
    ("roofing", "07"),
    ("roof", "07"),
    ("membrane", "07"),
    ("insulation", "07"),
    ("waterproofing", "07"),
    ("glass", "08"),
    ("glazing", "08"),
    ("curtain wall", "08"),
    ("storefront", "08"),
    ("window", "08"),
    ("door", "08"),
    ("skylight", "08"),
    ("louver", "08"),
    ("louvre", "08"),
    ("paint", "09"),
    ("plaster", "09"),
    ("gypsum", "09"),
    ("drywall", "09"),
    ("tile", "09"),
    ("terrazzo", "09"),
    ("carpet", "09"),
    ("stucco", "09"),
    ("render", "09"),
    ("flooring", "09"),
    ("ceiling", "09"),
    ("signage", "10"),
    ("wayfinding", "10"),
];

/// Title for a division code.
pub fn division_name(code: &str) -> Option<&'static str> {
    DIVISIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Human-readable division label, e.g. "Division 08 - Openings".
pub fn division_label(code: &str) -> String {
    match division_name(code) {
        Some(name) => format!("Division {code} - {name}"),
        None => format!("Division {code}"),
    }
}

/// Infer the division for a material description.
///
/// Keywords must start at a word boundary ("glass" does not match inside
/// "fibreglass"). Among matches, the earliest position wins and ties go to the
/// longer keyword.
pub fn division_for(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let mut best: Option<(usize, usize, &'static str)> = None;

    for &(keyword, code) in KEYWORDS {
        let Some(pos) = find_word_start(&lower, keyword) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((best_pos, best_len, _)) => {
                pos < best_pos || (pos == best_pos && keyword.len() > best_len)
            }
        };
        if better {
            best = Some((pos, keyword.len(), code));
        }
    }

    best.map(|(_, _, code)| code)
}

/// Byte offset of the first occurrence of `needle` that starts a word.
fn find_word_start(haystack: &str, needle: &str) -> Option<usize> {
    haystack.match_indices(needle).map(|(i, _)| i).find(|&i| {
        haystack[..i]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_common_materials() {
        assert_eq!(division_for("Exposed concrete structure"), Some("03"));
        assert_eq!(division_for("Reclaimed brick"), Some("04"));
        assert_eq!(division_for("CMU"), Some("04"));
        assert_eq!(division_for("Anodized aluminum fins"), Some("05"));
        assert_eq!(division_for("Timber"), Some("06"));
        assert_eq!(division_for("Low-E glass"), Some("08"));
        assert_eq!(division_for("Unitized curtain wall system"), Some("08"));
        assert_eq!(division_for("Lime plaster"), Some("09"));
    }

    #[test]
    fn earliest_keyword_wins() {
        assert_eq!(division_for("Metal cladding"), Some("05"));
        assert_eq!(division_for("Timber cladding"), Some("06"));
        assert_eq!(division_for("Cladding panels of zinc"), Some("07"));
    }

    #[test]
    fn keywords_respect_word_start() {
        assert_eq!(division_for("fibreglass"), None);
        assert_eq!(division_for("Hardwood decking"), None);
        assert_eq!(division_for("wood-look porcelain"), Some("06"));
    }

    #[test]
    fn unknown_material_has_no_division() {
        assert_eq!(division_for("Vegetation"), None);
        assert_eq!(division_for(""), None);
    }

    #[test]
    fn labels() {
        assert_eq!(division_name("08"), Some("Openings"));
        assert_eq!(division_label("05"), "Division 05 - Metals");
        assert_eq!(division_label("42"), "Division 42");
    }
}
