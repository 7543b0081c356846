use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::FlowCommand;

/// Lower-case, strip diacritics, trim and collapse whitespace runs.
///
/// The second lowercase pass catches compatibility decompositions that expand
/// into upper-case letters, which keeps the function idempotent.
pub fn normalize_text(input: &str) -> String {
    let folded: String = input
        .to_lowercase()
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_optional(input: Option<&str>) -> String {
    normalize_text(input.unwrap_or_default())
}

/// Recognises next/back/reset commands by intent name, quick-action payload
/// or a bare keyword. `text` must already be normalized.
pub fn parse_flow_command(intent: Option<&str>, text: &str) -> Option<FlowCommand> {
    if let Some(intent) = intent {
        match intent.trim() {
            "next_step" | "flow.next" => return Some(FlowCommand::Next),
            "back_step" | "flow.back" => return Some(FlowCommand::Back),
            "reset_flow" | "flow.reset" => return Some(FlowCommand::Reset),
            _ => {}
        }
    }

    match text.trim_start_matches('/') {
        "next_step" | "next" | "suivant" | "continue" | "continuer" => Some(FlowCommand::Next),
        "back_step" | "back" | "previous" | "retour" | "precedent" => Some(FlowCommand::Back),
        "reset_flow" | "reset" | "restart" | "recommencer" | "annuler" => {
            Some(FlowCommand::Reset)
        }
        _ => None,
    }
}

pub(crate) fn contains_any(input: &str, needles: &[String]) -> bool {
    needles.iter().any(|needle| input.contains(needle.as_str()))
}
