use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use sp_core::{ContentKind, PlayerError, Value};
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::script::ScriptLine;

fn label_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("label regex must compile"))
}

fn speaker_prefix_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_ ]{0,31}):\s+(\S.*)$")
            .expect("speaker prefix regex must compile")
    })
}

fn template_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\$\{([^{}]+)\}").expect("template regex must compile"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedText<'a> {
    pub kind: ContentKind,
    pub speaker: Option<&'a str>,
    pub body: &'a str,
    pub label: Option<&'a str>,
}

/// Sorts a text line into label, comment, empty, dialogue or narration.
pub fn classify_text<'a>(content: &'a str, speaker: Option<&'a str>) -> ClassifiedText<'a> {
    let trimmed = content.trim();
    let plain = |kind| ClassifiedText {
        kind,
        speaker: None,
        body: trimmed,
        label: None,
    };

    if let Some(name) = trimmed.strip_prefix('#') {
        return ClassifiedText {
            label: Some(name.trim()),
            ..plain(ContentKind::Label)
        };
    }
    if trimmed.starts_with("//") {
        return plain(ContentKind::Comment);
    }
    if trimmed.is_empty() {
        return plain(ContentKind::Empty);
    }
    if let Some(speaker) = speaker.filter(|speaker| !speaker.trim().is_empty()) {
        return ClassifiedText {
            speaker: Some(speaker.trim()),
            ..plain(ContentKind::Dialogue)
        };
    }
    if let Some(captures) = speaker_prefix_regex().captures(trimmed) {
        if let (Some(name), Some(body)) = (captures.get(1), captures.get(2)) {
            return ClassifiedText {
                kind: ContentKind::Dialogue,
                speaker: Some(name.as_str().trim_end()),
                body: body.as_str(),
                label: None,
            };
        }
    }
    plain(ContentKind::Narration)
}

pub fn is_valid_label_name(name: &str) -> bool {
    label_name_regex().is_match(name)
}

/// Replaces `${name}` with the variable's text form; unknown names stay as written.
pub fn interpolate(text: &str, variables: &BTreeMap<String, Value>) -> String {
    template_regex()
        .replace_all(text, |captures: &Captures<'_>| {
            let name = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            match variables.get(name) {
                Some(value) => value.to_text(),
                None => captures
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .into_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessReport {
    pub labels: usize,
    pub errors: Vec<String>,
    pub total_errors: usize,
}

/// Registers every label in the loaded script and validates command lines.
///
/// At most `max_errors` messages are kept. With `continue_on_error` unset any
/// error fails the call; otherwise errors are logged and returned in the report.
pub fn preprocess(
    context: &mut ExecutionContext,
    continue_on_error: bool,
    max_errors: usize,
) -> Result<PreprocessReport, PlayerError> {
    let Some(script) = context.script().cloned() else {
        return Err(PlayerError::validation("no script is loaded"));
    };

    let mut report = PreprocessReport::default();
    let push_error = |report: &mut PreprocessReport, message: String| {
        report.total_errors += 1;
        if report.errors.len() < max_errors {
            report.errors.push(message);
        }
    };

    for (index, line) in script.lines().iter().enumerate() {
        match line {
            ScriptLine::Text { content, metadata } => {
                let classified = classify_text(content, metadata.speaker.as_deref());
                let Some(label) = classified.label else {
                    continue;
                };
                if !is_valid_label_name(label) {
                    push_error(
                        &mut report,
                        format!("line {}: invalid label name \"{}\"", index, label),
                    );
                    continue;
                }
                match context.register_label(label, index) {
                    Ok(()) => report.labels += 1,
                    Err(error) => push_error(&mut report, format!("line {}: {}", index, error)),
                }
            }
            ScriptLine::Command(command) => {
                if let Err(message) = command.validate() {
                    push_error(
                        &mut report,
                        format!("line {}: command \"{}\" {}", index, command.kind(), message),
                    );
                }
            }
            ScriptLine::Unknown => {}
        }
    }

    if report.total_errors > 0 {
        if !continue_on_error {
            return Err(PlayerError::Preprocessing {
                script: script.name().to_string(),
                errors: report.errors,
            });
        }
        for message in &report.errors {
            warn!(script = script.name(), "{}", message);
        }
    }
    debug!(
        script = script.name(),
        labels = report.labels,
        errors = report.total_errors,
        "script preprocessed"
    );
    Ok(report)
}
