//! Batch summary: the one message sent after each batch.

use chrono::{DateTime, Utc};
use leafcheck_core::types::{RunResult, mask_email};
use serde::Serialize;

pub const SUMMARY_TITLE: &str = "🎁 Leaflow auto check-in";

/// Aggregate of one batch, ready to render.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub title: String,
    /// HTML-safe body (Telegram `parse_mode=HTML`).
    pub body: String,
    pub success: usize,
    pub total: usize,
}

impl BatchSummary {
    pub fn build(results: &[RunResult], at: DateTime<Utc>) -> Self {
        let success = results.iter().filter(|r| r.success).count();
        let total = results.len();

        let mut body = format!(
            "{SUMMARY_TITLE}\n📊 Success: {success}/{total}\n📅 Date: {}\n\n",
            at.format("%Y/%m/%d")
        );
        for r in results {
            body.push_str(&format!("Account: {}\n", escape_html(&mask_email(&r.email))));
            if r.success {
                body.push_str(&format!("✅  {}\n", escape_html(&r.result)));
                body.push_str(&format!("💰  Balance: {}\n\n", escape_html(&r.balance)));
            } else {
                body.push_str(&format!("❌  {}\n\n", escape_html(&r.result)));
            }
        }

        Self {
            title: SUMMARY_TITLE.to_string(),
            body: body.trim_end().to_string(),
            success,
            total,
        }
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 1, 15, 0).unwrap()
    }

    #[test]
    fn test_empty_batch_reports_zero_of_zero() {
        let s = BatchSummary::build(&[], at());
        assert!(s.body.contains("0/0"));
        assert!(s.body.contains("2026/10/18"));
        assert_eq!((s.success, s.total), (0, 0));
    }

    #[test]
    fn test_accounts_masked_and_escaped() {
        let results = vec![
            RunResult::new("ab@example.com", true, "+1 <b>bonus</b>", "3 & 4元"),
            RunResult::failure("carol@example.com", "Check-in failed: no button"),
        ];
        let s = BatchSummary::build(&results, at());
        assert!(s.body.contains("Success: 1/2"));
        assert!(s.body.contains("ab***@example.com"));
        assert!(s.body.contains("car***@example.com"));
        assert!(!s.body.contains("carol@"));
        assert!(s.body.contains("+1 &lt;b&gt;bonus&lt;/b&gt;"));
        assert!(s.body.contains("3 &amp; 4元"));
        assert!(s.body.contains("❌  Check-in failed: no button"));
        // balance only shown for successes
        assert_eq!(s.body.matches("Balance").count(), 1);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"'"), "a&lt;b&gt;&amp;&quot;&#x27;");
    }
}
