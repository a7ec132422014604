//! Destination-specific message formatting
//!
//! Pure functions of (category, destination role, body, signal number); no
//! state is read or mutated here. The VIP destination gets numbered headers,
//! the free destination gets the sample footer / upsell variants.

use super::types::DestinationRole;
use crate::classifier::Category;

/// Footer appended to sampled signals on the free destination
pub const SAMPLE_FOOTER: &str =
    "🔥 This is a free sample signal. VIP members receive every signal in real time.";

/// Upsell appended to the free weekly recap
pub const RECAP_UPSELL: &str =
    "⭐ Every trade behind these numbers was posted live in VIP. Upgrade to get them all.";

/// Format a message body for one destination
///
/// VIP trading signals carry a `Trading Signal #N` header; the free copy
/// omits the number and carries the sample footer instead. Weekly recaps get
/// their per-role headers unconditionally.
pub fn format_for(
    category: Category,
    role: DestinationRole,
    body: &str,
    signal_number: Option<i64>,
) -> String {
    match (category, role) {
        (Category::TradingSignal, DestinationRole::Primary) => match signal_number {
            Some(n) => format!("📈 Trading Signal #{}\n\n{}", n, body),
            None => format!("📈 Trading Signal\n\n{}", body),
        },
        (Category::TradingSignal, DestinationRole::Secondary) => {
            format!("{}\n\n{}", body, SAMPLE_FOOTER)
        }
        (Category::WeeklyRecap, DestinationRole::Primary) => {
            format!("📊 Weekly Performance Recap\n\n{}", body)
        }
        (Category::WeeklyRecap, DestinationRole::Secondary) => {
            format!("🏆 VIP Weekly Results\n\n{}\n\n{}", body, RECAP_UPSELL)
        }
        (Category::SignalUpdate, _) => format!("🔔 Signal Update\n\n{}", body),
        (Category::AnalysisVideo, _) => format!("📊 Market Analysis\n\n{}", body),
        _ => body.to_string(),
    }
}
