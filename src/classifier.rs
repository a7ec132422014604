//! Message classifier - ordered pattern rules over message content
//!
//! Every inbound message maps to exactly one [`Category`]. Classification is a
//! pure function over the message text: an explicit ordered list of
//! predicate-to-category rules evaluated top-down, specific patterns before
//! generic ones. Rule order is the tie-breaker; there is no confidence score.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fixed category set for inbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TradingSignal,
    SignalUpdate,
    WeeklyRecap,
    AnalysisVideo,
    MarketCommentary,
    Media,
    AdminAnnouncement,
}

impl Category {
    /// Stable string form used in the SQLite tables
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TradingSignal => "trading_signal",
            Category::SignalUpdate => "signal_update",
            Category::WeeklyRecap => "weekly_recap",
            Category::AnalysisVideo => "analysis_video",
            Category::MarketCommentary => "market_commentary",
            Category::Media => "media",
            Category::AdminAnnouncement => "admin_announcement",
        }
    }

    /// Parse the stored string form back into a category
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trading_signal" => Some(Category::TradingSignal),
            "signal_update" => Some(Category::SignalUpdate),
            "weekly_recap" => Some(Category::WeeklyRecap),
            "analysis_video" => Some(Category::AnalysisVideo),
            "market_commentary" => Some(Category::MarketCommentary),
            "media" => Some(Category::Media),
            "admin_announcement" => Some(Category::AdminAnnouncement),
            _ => None,
        }
    }
}

// Recap: recap keyword plus aggregate statistics tokens
static RECAP_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(recap|weekly\s+(results|performance))\b").unwrap());
static RECAP_STATS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(win\s*rate|total\s+trades|winning\s+trades|losing\s+trades|pips)\b")
        .unwrap()
});

// Trading signal: direction token plus a TP/SL/entry token plus a numeric price
static SIGNAL_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(buy|sell|long|short)\b").unwrap());
static SIGNAL_LEVELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(tp\s*\d*|sl|take[\s-]?profit|stop[\s-]?loss|entry)\b").unwrap()
});
static PRICE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(\.\d+)?").unwrap());

// Signal update: progress references to a previously posted signal
static UPDATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(tp\s*\d*\s+hit|sl\s+hit|hit\s+tp|break[\s-]?even|move\s+sl|close[d]?\s+(half|all|position)|secure[d]?\s+profits?|still\s+running)\b",
    )
    .unwrap()
});

// Admin: broadcast markers and housekeeping keywords
static ADMIN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(@everyone|@here|\bannouncement\b|\bserver\s+rules\b|\bwelcome\s+to\b)")
        .unwrap()
});

// Analysis: date-coded titles (210825, 21/08/25, Aug 25) or analysis phrasing
static DATE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\b\d{6}\b|\b\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}\b|\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\s+\d{1,2}\b)",
    )
    .unwrap()
});
static ANALYSIS_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\banalysis\b|\bdaily\b.*\breview\b|\bmarket\b.*\bupdate\b|\boutlook\b)")
        .unwrap()
});

/// Assign a category to a message body
///
/// Total and deterministic: the first matching rule wins, and the fallthrough
/// is always `MarketCommentary`. Weekly recaps are checked before signals so a
/// recap quoting BUY/SELL lines is not misread as a fresh signal, and signal
/// rules run before admin so a broadcast-tagged signal still routes as one.
pub fn classify(text: &str, has_media: bool) -> Category {
    let trimmed = text.trim();

    if RECAP_KEYWORD.is_match(trimmed) && RECAP_STATS.is_match(trimmed) {
        return Category::WeeklyRecap;
    }

    if SIGNAL_ACTION.is_match(trimmed)
        && SIGNAL_LEVELS.is_match(trimmed)
        && PRICE_TOKEN.is_match(trimmed)
    {
        return Category::TradingSignal;
    }

    if UPDATE_PATTERN.is_match(trimmed) {
        return Category::SignalUpdate;
    }

    if ADMIN_PATTERN.is_match(trimmed) {
        return Category::AdminAnnouncement;
    }

    if DATE_CODE.is_match(trimmed) || ANALYSIS_PHRASE.is_match(trimmed) {
        return Category::AnalysisVideo;
    }

    if trimmed.is_empty() && has_media {
        return Category::Media;
    }

    Category::MarketCommentary
}

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());
static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

/// Maximum body length forwarded to a destination (room left for headers)
const MAX_BODY_CHARS: usize = 1900;

/// Normalize message text before routing or comparison
///
/// Collapses runs of blank lines, squeezes repeated spaces, trims, and
/// truncates to the destination limit with an ellipsis.
pub fn clean_message_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let collapsed = BLANK_RUNS.replace_all(text, "\n\n");
    let squeezed = SPACE_RUNS.replace_all(&collapsed, " ");
    let cleaned = squeezed.trim();

    if cleaned.chars().count() > MAX_BODY_CHARS {
        let head: String = cleaned.chars().take(MAX_BODY_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        cleaned.to_string()
    }
}

/// Structured fields extracted from a trading signal body
///
/// Used for log enrichment only; routing never depends on these fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalInfo {
    pub symbol: Option<String>,
    pub action: Option<String>,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

static SYMBOL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(XAU/USD|XAG/USD|WTI|BRENT|[A-Z]{3}/[A-Z]{3})\b").unwrap()
});
static BUY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(BUY|LONG)\b").unwrap());
static SELL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(SELL|SHORT)\b").unwrap());
static ENTRY_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:ENTRY|BUY|SELL)[\s:@]*([0-9]+\.?[0-9]*)\b").unwrap());
static SL_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:SL|STOP[\s-]?LOSS)[\s:]*([0-9]+\.?[0-9]*)\b").unwrap());
static TP_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:TP|TAKE[\s-]?PROFIT)[\s:]*([0-9]+\.?[0-9]*)\b").unwrap());

/// Pull symbol, direction and price levels out of a signal body
pub fn extract_signal_info(text: &str) -> SignalInfo {
    let upper = text.to_uppercase();
    let mut info = SignalInfo::default();

    if let Some(m) = SYMBOL_PATTERN.find(&upper) {
        info.symbol = Some(m.as_str().to_string());
    }

    if BUY_PATTERN.is_match(&upper) {
        info.action = Some("BUY".to_string());
    } else if SELL_PATTERN.is_match(&upper) {
        info.action = Some("SELL".to_string());
    }

    info.entry = ENTRY_PRICE
        .captures(&upper)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    info.stop_loss = SL_PRICE
        .captures(&upper)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    info.take_profit = TP_PRICE
        .captures(&upper)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_signal_classification() {
        let body = "BUY @ 3373/3371\nTP 3375\nTP 3378\nSL 3370";
        assert_eq!(classify(body, false), Category::TradingSignal);

        assert_eq!(
            classify("SELL EUR/USD\nEntry 1.0850\nSL 1.0880\nTP 1.0800", false),
            Category::TradingSignal
        );
    }

    #[test]
    fn test_weekly_recap_classification() {
        let body = "Weekly Trade Recap\nTotal Trades: 98\nWinning Trades: 85\nWin Rate: 87%";
        assert_eq!(classify(body, false), Category::WeeklyRecap);
    }

    #[test]
    fn test_recap_beats_signal_tokens() {
        // A recap quoting signal lines must still classify as a recap
        let body = "Weekly Recap\nBest trade: BUY gold TP 3375 hit\nWin Rate: 90%\nTotal Trades: 40";
        assert_eq!(classify(body, false), Category::WeeklyRecap);
    }

    #[test]
    fn test_signal_update_classification() {
        assert_eq!(classify("TP1 hit! Secure profits 🔥", false), Category::SignalUpdate);
        assert_eq!(classify("Move SL to breakeven", false), Category::SignalUpdate);
    }

    #[test]
    fn test_admin_classification() {
        assert_eq!(
            classify("@everyone welcome to the channel, read the server rules", false),
            Category::AdminAnnouncement
        );
    }

    #[test]
    fn test_signal_beats_admin_broadcast_tag() {
        // Broadcast-tagged signal still routes as a signal (rule priority)
        let body = "@everyone BUY gold now\nTP 3375\nSL 3360";
        assert_eq!(classify(body, false), Category::TradingSignal);
    }

    #[test]
    fn test_analysis_classification() {
        assert_eq!(classify("210825 Gold outlook video", false), Category::AnalysisVideo);
        assert_eq!(classify("Daily market review for Aug 25", false), Category::AnalysisVideo);
        assert_eq!(classify("XAUUSD analysis", false), Category::AnalysisVideo);
    }

    #[test]
    fn test_media_and_commentary_fallthrough() {
        assert_eq!(classify("", true), Category::Media);
        assert_eq!(classify("gold looking strong today", false), Category::MarketCommentary);
    }

    #[test]
    fn test_clean_message_text() {
        let messy = "line one   with   spaces\n\n\n\n\nline two\n";
        assert_eq!(clean_message_text(messy), "line one with spaces\n\nline two");
        assert_eq!(clean_message_text(""), "");
    }

    #[test]
    fn test_clean_message_text_truncates() {
        let long = "x".repeat(5000);
        let cleaned = clean_message_text(&long);
        assert_eq!(cleaned.chars().count(), 1900);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn test_extract_signal_info() {
        let body = "BUY XAU/USD @ 3373\nTP 3375\nSL 3370";
        let info = extract_signal_info(body);
        assert_eq!(info.symbol.as_deref(), Some("XAU/USD"));
        assert_eq!(info.action.as_deref(), Some("BUY"));
        assert_eq!(info.take_profit, Some(3375.0));
        assert_eq!(info.stop_loss, Some(3370.0));
    }

    #[test]
    fn test_classify_is_total() {
        // Any input lands in exactly one category without panicking
        for text in ["", "???", "1234", "BUY", "recap", "\n\n\n"] {
            let _ = classify(text, false);
        }
    }
}
