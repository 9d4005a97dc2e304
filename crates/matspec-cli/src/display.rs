//! Console output for `matspec generate`.
//!
//! Results go to stdout; progress and failures go to stderr so a redirected
//! stdout stays readable.

use std::path::Path;

use matspec_core::{ImageAnalysis, SpecificationDocument, SpecificationSection, csi};
use matspec_store::SkippedImage;

use crate::pipeline::{ItemFailure, Progress};

const RULE: &str = "============================================================";

// ── Status lines ──

pub fn ok(message: &str) {
    println!("[OK] {message}");
}

pub fn info(message: &str) {
    println!("[INFO] {message}");
}

pub fn warning(message: &str) {
    eprintln!("[WARNING] {message}");
}

pub fn error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_header(images_dir: &Path, brief: &Path, output_dir: &Path) {
    println!("{RULE}");
    println!("Material Specification Generator");
    println!("{RULE}");
    println!("  {:<26} {}", "Images", images_dir.display());
    println!("  {:<26} {}", "Brief", brief.display());
    println!("  {:<26} {}", "Output", output_dir.display());
    println!();
}

pub fn print_skipped(skipped: &[SkippedImage]) {
    for s in skipped {
        warning(&format!("Skipped {}: {}", s.name, s.reason));
    }
}

// ── Progress ──

/// One stderr line per completed image and per generated section.
pub struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn image_analyzed(&self, done: usize, total: usize, analysis: &ImageAnalysis) {
        eprintln!("{}", analysis_line(done, total, analysis));
    }

    fn section_generated(&self, done: usize, total: usize, section: &SpecificationSection) {
        let status = if section.is_generated() {
            "specified"
        } else {
            "FAILED"
        };
        eprintln!("  [{done}/{total}] {:<26} {status}", section.source.describe());
    }
}

fn analysis_line(done: usize, total: usize, analysis: &ImageAnalysis) -> String {
    let status = match analysis.failure() {
        Some(f) => format!("FAILED ({})", f.message),
        None => match analysis.materials().len() {
            0 => "analysed, no materials parsed".to_string(),
            1 => "analysed, 1 material".to_string(),
            n => format!("analysed, {n} materials"),
        },
    };
    format!("  [{done}/{total}] {:<26} {status}", analysis.image)
}

// ── Results ──

/// Per-image material table.
pub fn print_material_tables(analyses: &[ImageAnalysis]) {
    println!();
    for analysis in analyses.iter().filter(|a| a.is_analyzed()) {
        for line in material_table(analysis) {
            println!("{line}");
        }
        println!();
    }
}

fn material_table(analysis: &ImageAnalysis) -> Vec<String> {
    let mut out = vec![format!("=== {} ===", analysis.image)];
    let materials = analysis.materials();
    if materials.is_empty() {
        out.push("  (no structured materials; the raw analysis is used for generation)".into());
        return out;
    }
    for m in materials {
        let division = m
            .division()
            .map(csi::division_label)
            .unwrap_or_else(|| "Unclassified".to_string());
        let prominence = m.prominence.map(|p| p.as_str()).unwrap_or("-");
        out.push(format!(
            "  {:<26} {:<8} {division}",
            truncate(m.label(), 26),
            prominence
        ));
    }
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Failure list; identical messages collapse into one line.
pub fn print_failures(failures: &[ItemFailure]) {
    for line in failure_lines(failures) {
        eprintln!("{line}");
    }
}

fn failure_lines(failures: &[ItemFailure]) -> Vec<String> {
    let Some(first) = failures.first() else {
        return Vec::new();
    };
    let shared = failures
        .iter()
        .all(|f| f.failure.message == first.failure.message && f.failure.kind == first.failure.kind);
    if shared && failures.len() > 1 {
        let items: Vec<&str> = failures.iter().map(|f| f.item.as_str()).collect();
        return vec![
            format!(
                "[ERROR] {} items failed: {}",
                failures.len(),
                first.failure.message
            ),
            format!("        Affected: {}", items.join(", ")),
            format!("        Next step: {}", first.failure.kind.hint()),
        ];
    }
    failures
        .iter()
        .map(|f| {
            format!(
                "[ERROR] {} ({}): {}\n        Next step: {}",
                f.item,
                f.stage.as_str(),
                f.failure.message,
                f.failure.kind.hint()
            )
        })
        .collect()
}

pub fn print_summary(document: &SpecificationDocument, written: &Path) {
    println!("{RULE}");
    ok(&format!(
        "{} of {} images specified",
        document.generated_count(),
        document.images_total
    ));
    if document.failed_count() > 0 {
        warning(&format!(
            "{} section(s) unavailable; see the placeholders in the document",
            document.failed_count()
        ));
    }
    ok(&format!("Specification written to {}", written.display()));
}
