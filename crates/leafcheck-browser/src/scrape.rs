//! Text heuristics over scraped page content.
//!
//! These depend entirely on the site's current wording. Kept as pure
//! functions so the matching rules can be tested without a browser.

use regex::Regex;
use std::sync::LazyLock;

/// Entry-point labels on the dashboard/workspaces page, most specific first.
pub const ENTRY_TEXTS: &[&str] = &["签到试用", "每日签到", "立即签到"];

/// Labels of the control that actually claims the reward.
pub const CLAIM_TEXTS: &[&str] = &["立即签到", "签到"];

/// Wording shown once today's reward has been claimed.
pub const ALREADY_CLAIMED_TEXTS: &[&str] = &["已签到", "今日已签到", "already checked in"];

/// Result text used when the click went through but nothing readable came back.
pub const NO_REWARD_TEXT: &str = "Check-in submitted, no reward text captured";

static AMOUNT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").ok());

/// Whether the page text says today's reward is already claimed.
pub fn is_already_claimed(text: &str) -> bool {
    let lower = text.to_lowercase();
    ALREADY_CLAIMED_TEXTS.iter().any(|t| lower.contains(t))
}

/// Pick the most plausible check-in result from visible notification texts,
/// then from the page body.
///
/// Notification candidates win when they mention the check-in and are longer
/// than the bare button label, or show a `+` reward. A notice that still has
/// a claim button line is the unchanged dialog and is skipped. Body lines win
/// when they pair today's date with an amount, or read like a success message.
pub fn pick_result_text(notices: &[String], body: &str, today: &str) -> Option<String> {
    for notice in notices.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if shows_claim_button(notice) {
            continue;
        }
        if (notice.contains("签到") && notice.chars().count() > 4) || notice.contains('+') {
            return Some(notice.to_string());
        }
    }

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains(today) && (line.contains('+') || line.contains('元')) {
            return Some(format!("Check-in record {line}"));
        }
        let success_like = line.contains("签到成功") || line.contains("获得") || line.contains("恭喜");
        if success_like && line.chars().count() < 50 {
            return Some(line.to_string());
        }
    }

    if is_already_claimed(body) {
        return Some("Checked in (button state updated)".to_string());
    }
    None
}

fn shows_claim_button(notice: &str) -> bool {
    notice
        .lines()
        .map(str::trim)
        .any(|line| CLAIM_TEXTS.contains(&line))
}

/// Extract a balance such as `12.50元` from page text: the first number on a
/// line carrying a currency marker.
pub fn extract_balance(text: &str) -> Option<String> {
    let re = AMOUNT_RE.as_ref()?;
    text.lines()
        .filter(|line| line.contains('¥') || line.contains('￥') || line.contains('元'))
        .find_map(|line| re.find(line))
        .map(|m| format!("{}元", m.as_str()))
}

/// Split a `k=v; k2=v2` cookie header into pairs.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|item| item.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Whether a URL looks like a logged-in page.
pub fn looks_logged_in(url: &str) -> bool {
    url.contains("dashboard") || url.contains("workspaces") || !url.contains("login")
}
