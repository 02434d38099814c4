use async_trait::async_trait;
use sp_core::{ContentKind, PlayerError};
use sp_runtime::TextRenderer;
use tokio_util::sync::CancellationToken;

/// Prints every rendered line as a `TEXT_JSON:` protocol line.
#[derive(Debug, Default)]
pub(crate) struct ConsoleTextRenderer;

#[async_trait]
impl TextRenderer for ConsoleTextRenderer {
    async fn render_text(
        &self,
        speaker: Option<&str>,
        text: &str,
        _kind: ContentKind,
        _cancel: CancellationToken,
    ) -> Result<(), PlayerError> {
        println!("{}", format_text_line(speaker, text));
        Ok(())
    }
}

pub(crate) fn format_text_line(speaker: Option<&str>, text: &str) -> String {
    let shown = match speaker {
        Some(speaker) => format!("{}: {}", speaker, text),
        None => text.to_string(),
    };
    format!(
        "TEXT_JSON:{}",
        serde_json::to_string(&shown).unwrap_or_else(|_| "\"\"".to_string())
    )
}
