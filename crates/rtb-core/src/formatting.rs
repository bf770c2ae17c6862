//! Rendering of delivered items (Telegram HTML, timestamps, hashtags).

use chrono::{DateTime, FixedOffset, Utc};

use crate::domain::Notification;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `YYYY-MM-DD HH:MM:SS` in the display offset.
pub fn format_timestamp(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// `#keyword` tag; inner whitespace becomes `_` so the tag stays one token.
pub fn hashtag(keyword: &str) -> String {
    let joined = keyword.split_whitespace().collect::<Vec<_>>().join("_");
    format!("#{joined}")
}

/// Telegram HTML body for one delivered item. The keyword line is omitted
/// when the group has no keyword filter.
pub fn render_notification_html(n: &Notification, offset: FixedOffset) -> String {
    let mut out = format!("<b>{}</b>\n\n", escape_html(&n.title));
    out.push_str(&format!("🌐 <b>Link:</b> {}\n\n", escape_html(&n.link)));

    if !n.matched_keywords.is_empty() {
        let tags = n
            .matched_keywords
            .iter()
            .map(|k| escape_html(&hashtag(k)))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("🔍 <b>Keywords:</b> {tags}\n\n"));
    }

    out.push_str(&format!("🏷️ <b>Group:</b> {}\n\n", escape_html(&n.group)));
    out.push_str(&format!(
        "🕒 <b>Time:</b> {}",
        format_timestamp(n.published_at, offset)
    ));
    out
}
