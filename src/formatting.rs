// src/formatting.rs

use crate::core::Alert;

/// A trait for formatting an alert into message text.
pub trait TextFormatter: Send + Sync {
    fn format(&self, alert: &Alert) -> String;
}

/// A formatter for chat webhooks that renders a short, readable message.
pub struct PlainTextFormatter;

impl TextFormatter for PlainTextFormatter {
    fn format(&self, alert: &Alert) -> String {
        let content = alert.content.trim();
        if content.is_empty() {
            format!("[alert #{}] {}", alert.id, alert.title)
        } else {
            format!(
                "[alert #{}] {}\n```\n{}\n```\n{}",
                alert.id,
                alert.title,
                content,
                alert.created_at.to_rfc3339()
            )
        }
    }
}
