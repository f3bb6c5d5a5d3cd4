use crate::analysis::AnalysisResult;
use crate::core::model::SharedDataElement;
use crate::shared_data::ResolveOutcome;
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.len()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_warning(text: &str) {
    println!("{}", text.yellow());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

/// Confidence in `0.0..=1.0` coloured by band
pub fn confidence_badge(confidence: f64) -> ColoredString {
    let text = format!("{:.0}%", confidence * 100.0);
    if confidence >= 0.8 {
        text.green()
    } else if confidence >= 0.5 {
        text.yellow()
    } else {
        text.red()
    }
}

pub fn print_analysis(field_name: &str, result: &AnalysisResult) {
    println!(
        "{} -> {} [{}] {} via {}",
        field_name.bold(),
        result.ai_generated_name.bright_white(),
        result.semantic_type,
        confidence_badge(result.confidence),
        result.provider.dimmed()
    );
    if let Some(formula) = &result.calculation_formula {
        println!("    formula: {}", formula);
    }
}

pub fn print_element(element: &SharedDataElement) {
    println!(
        "#{:<4} {:<13} {:<30} v{} {}",
        element.id,
        element.element_type.to_string(),
        element.element_name,
        element.version,
        element.current_value
    );
}

pub fn print_outcome(outcome: &ResolveOutcome) {
    let action = if outcome.created {
        "created".green()
    } else if outcome.updated {
        "updated".yellow()
    } else {
        "matched".blue()
    };
    let score = outcome
        .score
        .map(|s| format!(" (score {:.2})", s))
        .unwrap_or_default();

    println!(
        "{} #{} {}{}",
        action,
        outcome.element.id,
        outcome.element.element_name,
        score
    );
}
