//! Best-effort extraction of material records from a free-text vision reply.
//!
//! An item starts at a markdown heading, a bold-only line, or a top-level
//! numbered line. Top-level bullets start items too when they are siblings in
//! a list of materials, i.e. under a generic heading or another bullet item.
//! Inside an item, lines of the form `Label: value` fill the field the label
//! names; unlabeled lines become observations. Anything that cannot be placed
//! is left empty rather than failing the record.

use matspec_core::markdown;
use matspec_core::{MaterialRecord, Prominence};

/// Headings that introduce commentary rather than a material.
const GENERIC_HEADINGS: &[&str] = &["summary", "overview", "identified", "analysis", "conclusion"];

/// Longest text before `:` still read as a field label.
const MAX_LABEL_CHARS: usize = 40;

const FIELD_SEPARATOR: &str = "; ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Type,
    Characteristics,
    Prominence,
    Observations,
}

/// Map a label such as "Approximate coverage/prominence" to its field.
fn field_for(label: &str) -> Option<Field> {
    let norm: String = label
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || *c == '/')
        .collect();
    let norm = norm.trim();
    let has = |words: &[&str]| words.iter().any(|w| norm.contains(w));

    if has(&["prominen", "coverage"]) {
        Some(Field::Prominence)
    } else if has(&[
        "characteristic",
        "visual",
        "appearance",
        "color",
        "colour",
        "texture",
        "finish",
        "pattern",
    ]) {
        Some(Field::Characteristics)
    } else if has(&["observation", "note", "architectural", "application", "detail"]) {
        Some(Field::Observations)
    } else if norm == "material" || norm == "name" || has(&["type", "category"]) {
        Some(Field::Type)
    } else {
        None
    }
}

/// Split `Label: value` into a known field and its value.
fn labelled(text: &str) -> Option<(Field, String)> {
    let (label, value) = text.split_once(':')?;
    let label = label.trim();
    if label.is_empty() || label.chars().count() > MAX_LABEL_CHARS {
        return None;
    }
    field_for(label).map(|f| (f, value.trim().to_string()))
}

/// Remove emphasis markers.
fn clean(text: &str) -> String {
    text.replace("**", "").replace("__", "").trim().to_string()
}

/// Rest of a `1.` / `12)` numbered line.
fn strip_number(text: &str) -> Option<&str> {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let rest = text[digits..].strip_prefix(['.', ')'])?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

/// Rest of a `- ` / `* ` / `+ ` / `•` bullet line.
fn strip_bullet(text: &str) -> Option<&str> {
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|bullet| text.strip_prefix(bullet))
        .or_else(|| text.strip_prefix('•'))
        .map(str::trim_start)
}

/// Strip one list marker (bullet or number) from a trimmed line.
fn strip_marker(text: &str) -> &str {
    strip_number(text)
        .or_else(|| strip_bullet(text))
        .unwrap_or(text)
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn is_generic(header: &str) -> bool {
    let lower = header.to_lowercase();
    GENERIC_HEADINGS.iter().any(|g| lower.contains(g))
}

/// Prominence stated in free text, read from the clause that mentions it so
/// that "low-e glazing, high prominence" reads as high.
fn stated_prominence(line: &str) -> Option<Prominence> {
    line.split([',', ';', '.', '(', ')'])
        .filter(|clause| {
            let lower = clause.to_lowercase();
            lower.contains("prominen") || lower.contains("coverage")
        })
        .find_map(Prominence::parse)
}

fn join(parts: Vec<String>) -> Option<String> {
    let parts: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
    (!parts.is_empty()).then(|| parts.join(FIELD_SEPARATOR))
}

// ── Item accumulation ──

#[derive(Debug, Default)]
struct Draft {
    header: Option<String>,
    material_type: Option<String>,
    characteristics: Vec<String>,
    prominence: Option<String>,
    observations: Vec<String>,
    body: Vec<String>,
    /// Field whose label had no inline value; following lines continue it.
    pending: Option<Field>,
    /// Opened by a top-level bullet, so the next bullet is a sibling item.
    from_bullet: bool,
}

impl Draft {
    /// Start an item from a heading, bold line, numbered line or bullet.
    fn from_header(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = strip_number(raw).unwrap_or(raw);
        let mut draft = Self::default();

        let cleaned = clean(raw);
        let cleaned = strip_number(&cleaned).unwrap_or(&cleaned);
        if let Some((field, value)) = labelled(cleaned) {
            draft.set(field, value);
            return draft;
        }

        // `**Exposed concrete** - board formed` names the material in bold.
        if let Some(inner) = raw.strip_prefix("**")
            && let Some((bold, rest)) = inner.split_once("**")
        {
            let rest = rest.trim_start_matches([' ', '-', '–', '—', ':']).trim();
            if !bold.trim().is_empty() && !rest.is_empty() {
                let bold = clean(bold);
                let bold = strip_number(&bold).unwrap_or(&bold);
                draft.material_type = Some(bold.trim_end_matches(':').to_string());
                draft.observations.push(clean(rest));
                return draft;
            }
        }

        // `Glass curtain wall: clear glazing` names the material before the colon.
        if let Some((name, rest)) = cleaned.split_once(':') {
            let (name, rest) = (name.trim(), rest.trim());
            if !name.is_empty()
                && name.chars().count() <= MAX_LABEL_CHARS
                && !is_generic(name)
                && !rest.is_empty()
                && !rest.starts_with("//")
            {
                draft.material_type = Some(name.to_string());
                draft.observations.push(rest.to_string());
                return draft;
            }
        }

        let header = cleaned.trim_end_matches(':').trim();
        if !header.is_empty() {
            draft.header = Some(header.to_string());
        }
        draft
    }

    fn has_fields(&self) -> bool {
        self.material_type.is_some()
            || !self.characteristics.is_empty()
            || self.prominence.is_some()
            || !self.observations.is_empty()
    }

    fn set(&mut self, field: Field, value: String) {
        if value.is_empty() {
            self.pending = Some(field);
            return;
        }
        self.pending = None;
        self.put(field, value);
    }

    fn put(&mut self, field: Field, value: String) {
        match field {
            Field::Type if self.material_type.is_none() => self.material_type = Some(value),
            Field::Prominence if self.prominence.is_none() => self.prominence = Some(value),
            Field::Characteristics => self.characteristics.push(value),
            _ => self.observations.push(value),
        }
    }

    fn add_line(&mut self, text: String) {
        match self.pending {
            Some(field) => self.put(field, text),
            None => self.body.push(text),
        }
    }

    fn finish(self, image: &str, position: usize) -> Option<MaterialRecord> {
        let generic = self.header.as_deref().is_some_and(is_generic);
        if generic && !self.has_fields() {
            return None;
        }

        let prominence = self
            .prominence
            .as_deref()
            .and_then(Prominence::parse)
            .or_else(|| {
                self.header
                    .iter()
                    .chain(&self.characteristics)
                    .chain(&self.observations)
                    .chain(&self.body)
                    .find_map(|line| stated_prominence(line))
            });

        let mut observations = Vec::new();
        let material_type = match (self.material_type, self.header) {
            (Some(t), Some(h)) => {
                if !generic && !t.eq_ignore_ascii_case(&h) {
                    observations.push(h);
                }
                Some(t)
            }
            (Some(t), None) => Some(t),
            (None, Some(h)) if !generic => Some(h),
            (None, _) => None,
        };
        observations.extend(self.observations);
        observations.extend(self.body);

        let mut record = MaterialRecord::new(image, position);
        record.material_type = material_type;
        record.characteristics = join(self.characteristics);
        record.prominence = prominence;
        record.observations = join(observations);
        (!record.is_empty()).then_some(record)
    }
}

struct Items {
    done: Vec<Draft>,
    current: Option<Draft>,
}

impl Items {
    fn start(&mut self, draft: Draft) {
        if let Some(prev) = self.current.replace(draft) {
            self.done.push(prev);
        }
    }

    /// A non-field bullet opens a new item when it follows a generic heading,
    /// another bullet item, or nothing at all.
    fn bullet_opens_item(&self) -> bool {
        self.current.as_ref().is_none_or(|d| {
            d.from_bullet || d.header.as_deref().is_some_and(is_generic)
        })
    }

    /// A type label opens a new item unless the current one still lacks a type.
    fn wants_new_item(&self) -> bool {
        self.current
            .as_ref()
            .is_none_or(|d| d.material_type.is_some())
    }

    fn field(&mut self, field: Field, value: String) {
        if field == Field::Type && self.wants_new_item() {
            self.start(Draft::default());
        }
        self.current
            .get_or_insert_with(Draft::default)
            .set(field, value);
    }
}

/// Extract material records from one vision reply.
///
/// Returns an empty list when nothing recognisable was found; the caller keeps
/// the raw reply for that case.
pub fn parse_materials(image: &str, reply: &str) -> Vec<MaterialRecord> {
    let mut items = Items {
        done: Vec::new(),
        current: None,
    };
    let mut in_fence = false;

    for raw in reply.lines() {
        if is_fence(raw) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || raw.trim().is_empty() {
            continue;
        }

        if let Some((_, text)) = markdown::heading(raw) {
            items.start(Draft::from_header(text));
            continue;
        }
        if markdown::bold_line(raw).is_some() {
            // `**Visual characteristics:**` on its own line is a label, not an item.
            match labelled(&clean(raw)) {
                Some((field, value)) => items.field(field, value),
                None => items.start(Draft::from_header(raw)),
            }
            continue;
        }

        let top_level = !raw.starts_with([' ', '\t']);
        let trimmed = raw.trim();
        if top_level && let Some(rest) = strip_number(trimmed) {
            match labelled(&clean(rest)) {
                Some((field, value)) => items.field(field, value),
                None => items.start(Draft::from_header(rest)),
            }
            continue;
        }
        if top_level
            && let Some(rest) = strip_bullet(trimmed)
            && labelled(&clean(rest)).is_none()
            && items.bullet_opens_item()
        {
            let mut draft = Draft::from_header(rest);
            draft.from_bullet = true;
            items.start(draft);
            continue;
        }

        let text = clean(strip_marker(trimmed));
        if text.is_empty() {
            continue;
        }
        match labelled(&text) {
            Some((field, value)) => items.field(field, value),
            // Lines before the first item are preamble.
            None => {
                if let Some(draft) = items.current.as_mut() {
                    draft.add_line(text);
                }
            }
        }
    }

    if let Some(last) = items.current.take() {
        items.done.push(last);
    }

    let mut records = Vec::new();
    for draft in items.done {
        if let Some(record) = draft.finish(image, records.len() + 1) {
            records.push(record);
        }
    }
    tracing::debug!(image, count = records.len(), "parsed vision reply");
    records
}
