//! Bid Scoring (C6, spec.md §4.6).
//!
//! A pure, deterministic function: no I/O, no clock reads beyond the
//! offer's own `created_at` (supplied, not sampled). Grounded on the
//! teacher's small directly-testable pure modules (`fee.rs`) — a dense
//! `#[cfg(test)]` table of literal inputs/outputs is the right shape here,
//! not property tests, since spec.md's scenario 1 nails down exact scores.

use crate::models::VendorOffer;
use rust_decimal::prelude::ToPrimitive;

/// Score one offer. Exposed separately from `rank` so the decision engine's
/// audit log can record the components that produced a ranking.
pub fn score(offer: &VendorOffer) -> f64 {
    let mut total = 0.0;

    if offer.stock_confirmed {
        total += 1000.0;
    }

    let price = offer.price_quote.as_decimal().to_f64().unwrap_or(0.0);
    total += (500.0 - price * 200.0).max(0.0);

    let hours = parse_eta_hours(&offer.delivery_eta).min(72.0);
    total += (300.0 - hours * 4.0).max(0.0);

    total += offer.wholesaler_reliability_score as f64 * 1.5;

    let rating = offer.wholesaler_average_rating.as_decimal().to_f64().unwrap_or(0.0);
    total += rating * 10.0;

    total
}

/// Parse an ETA string into hours. Recognized units: `H`/`hour`, `D`/`day`,
/// `min`, case-insensitive. Unparseable input defaults to 24 hours.
fn parse_eta_hours(eta: &str) -> f64 {
    let trimmed = eta.trim();
    let lower = trimmed.to_lowercase();

    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    let Ok(value) = digits.parse::<f64>() else {
        return 24.0;
    };
    if digits.is_empty() {
        return 24.0;
    }

    if lower.contains("min") {
        value / 60.0
    } else if lower.contains('d') {
        value * 24.0
    } else if lower.contains('h') {
        value
    } else {
        24.0
    }
}

/// Rank offers by descending score with the tie-breakers from spec.md §4.6:
/// stock-confirmed first, then lower price, then earlier `created_at`.
pub fn rank(offers: &[VendorOffer]) -> Vec<&VendorOffer> {
    let mut scored: Vec<(&VendorOffer, f64)> = offers.iter().map(|o| (o, score(o))).collect();

    scored.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.stock_confirmed.cmp(&a.stock_confirmed))
            .then_with(|| a.price_quote.as_decimal().cmp(&b.price_quote.as_decimal()))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    scored.into_iter().map(|(o, _)| o).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{OfferId, OrderId, WholesalerId};
    use crate::models::OfferStatus;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn offer(
        wholesaler: i64,
        price: &str,
        eta: &str,
        stock_confirmed: bool,
        reliability: i32,
        rating: &str,
    ) -> VendorOffer {
        VendorOffer {
            id: OfferId(wholesaler),
            order_id: OrderId(1),
            wholesaler_id: WholesalerId(wholesaler),
            price_quote: crate::money::Money::new_positive(price.parse::<Decimal>().unwrap()).unwrap(),
            delivery_eta: eta.to_string(),
            stock_confirmed,
            status: OfferStatus::Pending,
            created_at: Utc::now(),
            wholesaler_reliability_score: reliability,
            wholesaler_average_rating: crate::money::Money::new(rating.parse::<Decimal>().unwrap()).unwrap(),
            wholesaler_active: true,
        }
    }

    #[test]
    fn scenario_1_happy_award_scores() {
        // spec.md scenario 1: W1 scores 1452, W2 scores 1309.
        let w1 = offer(1, "95", "2H", true, 80, "4");
        let w2 = offer(2, "90", "1D", true, 50, "3");

        assert!((score(&w1) - 1452.0).abs() < 0.001);
        assert!((score(&w2) - 1309.0).abs() < 0.001);

        let ranked = rank(&[w1, w2]);
        assert_eq!(ranked[0].wholesaler_id, WholesalerId(1));
    }

    #[test]
    fn eta_parsing_handles_minutes_and_days() {
        assert_eq!(parse_eta_hours("30min"), 0.5);
        assert_eq!(parse_eta_hours("2D"), 48.0);
        assert_eq!(parse_eta_hours("2H"), 2.0);
        assert_eq!(parse_eta_hours("garbage"), 24.0);
    }

    #[test]
    fn eta_clamps_at_72_hours() {
        let far = offer(1, "0", "30D", true, 0, "0");
        let near = offer(2, "0", "3D", true, 0, "0");
        assert!(score(&near) > score(&far));
    }

    #[test]
    fn tie_breaker_prefers_stock_confirmed() {
        let confirmed = offer(1, "100", "1H", true, 0, "0");
        let unconfirmed = offer(2, "100", "1H", false, 34, "0");
        // roughly equal totals but stock_confirmed dominates via the +1000 term
        assert!(score(&confirmed) > score(&unconfirmed));
    }

    #[test]
    fn ranking_is_deterministic() {
        let offers = vec![
            offer(1, "95", "2H", true, 80, "4"),
            offer(2, "90", "1D", true, 50, "3"),
        ];
        let r1: Vec<_> = rank(&offers).iter().map(|o| o.wholesaler_id).collect();
        let r2: Vec<_> = rank(&offers).iter().map(|o| o.wholesaler_id).collect();
        assert_eq!(r1, r2);
    }
}
