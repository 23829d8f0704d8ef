//! Profit ladder evaluation.
//!
//! Pure mapping from (position, mark price, ladder, excursion) to the stop
//! price the position should carry. No I/O and no state: the caller owns the
//! excursion record and the committed ladder level and feeds them back in.
//!
//! ## Target per level
//!
//! | Level            | Target                                                   |
//! |------------------|----------------------------------------------------------|
//! | 0 (below L1)     | none                                                     |
//! | fixed (L1, L2)   | floor `entry · (1 ± lock_profit/100)`                    |
//! | trailing (L3)    | more protective of floor and `excursion · (1 ∓ trail/100)` |
//!
//! The live level follows current profit. The level the guard has already
//! committed (`Position::ladder_level`) is evaluated as well and the more
//! protective of the two targets wins, so a pullback into a lower band never
//! emits a weaker stop than the one already earned.

use sg_core::{LadderConfig, Position, SymbolPrecision};

use crate::excursion::advance;

/// A stop price the position should be moved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetStop {
    pub price: f64,
    /// Ladder level that produced `price`.
    pub level: u8,
    /// `price` came from the trailing leg rather than the fixed floor.
    pub trailing: bool,
    /// Profit locked in at `price`, in percent of entry.
    pub locked_profit_percent: f64,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Signed profit of the mark price, positive when favorable.
    pub profit_percent: f64,
    /// Excursion after folding in the mark price. Always updated.
    pub excursion: f64,
    /// Level whose band contains `profit_percent` (0 below level 1).
    pub level: u8,
    /// `Some` only when the target strictly tightens the current stop.
    pub target: Option<TargetStop>,
    /// Target dropped because the mark price has already passed it; placing
    /// it would trigger immediately.
    pub crossed: Option<f64>,
}

/// Evaluate the ladder for `position` at `current_price`.
///
/// `position.stop_price` is the live stop the result is ratcheted against and
/// `position.ladder_level` the highest level already committed. Prices are
/// compared after rounding to `precision`'s tick.
pub fn evaluate(
    position: &Position,
    current_price: f64,
    ladder: &LadderConfig,
    excursion: Option<f64>,
    precision: &SymbolPrecision,
) -> Evaluation {
    let side = position.side;
    let profit_percent = position.profit_percent(current_price);
    let excursion = advance(side, excursion, current_price);
    let level = ladder.level_for(profit_percent);

    let candidate = [level, position.ladder_level]
        .into_iter()
        .filter_map(|n| level_target(position, ladder, n, excursion))
        .reduce(|a, b| {
            let tie_to_higher = b.price == a.price && b.level > a.level;
            if side.is_more_protective(b.price, a.price) || tie_to_higher {
                b
            } else {
                a
            }
        });

    let mut eval = Evaluation { profit_percent, excursion, level, target: None, crossed: None };
    let Some(target) = candidate else {
        return eval;
    };

    let rounded = precision.round_price(target.price);
    if rounded <= 0.0 {
        return eval;
    }
    if let Some(current) = position.stop_price {
        if !side.is_more_protective(rounded, precision.round_price(current)) {
            return eval;
        }
    }
    if !side.is_more_protective(current_price, rounded) {
        eval.crossed = Some(rounded);
        return eval;
    }
    eval.target = Some(target);
    eval
}

/// Unratcheted target for ladder level `n`, or `None` for level 0.
fn level_target(
    position: &Position,
    ladder: &LadderConfig,
    n: u8,
    excursion: f64,
) -> Option<TargetStop> {
    let lvl = ladder.level(n)?;
    let side = position.side;
    let floor = position.price_at_profit(lvl.lock_profit);

    let (price, trailing) = if lvl.trailing_enabled {
        let trail = excursion * (1.0 - side.sign() * lvl.trailing_percent / 100.0);
        if side.is_more_protective(trail, floor) { (trail, true) } else { (floor, false) }
    } else {
        (floor, false)
    };

    Some(TargetStop {
        price,
        level: n,
        trailing,
        locked_profit_percent: position.profit_percent(price),
    })
}

/// Fixed-percentage stop for a position that has earned no ladder level yet:
/// `entry · (1 ∓ percent/100)`.
pub fn initial_stop(position: &Position, percent: f64) -> f64 {
    position.price_at_profit(-percent)
}

#[cfg(test)]
mod tests {
    use sg_core::Side;

    use super::*;

    fn tick() -> SymbolPrecision {
        SymbolPrecision::new(0.001, 0.001)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn target_at(position: &Position, price: f64, excursion: Option<f64>) -> Evaluation {
        evaluate(position, price, &LadderConfig::default(), excursion, &tick())
    }

    #[test]
    fn long_climbs_the_ladder() {
        let pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);

        let e = target_at(&pos, 102.0, None);
        assert_eq!(e.level, 1);
        let t = e.target.unwrap();
        assert!(close(t.price, 100.1));
        assert!(!t.trailing);

        let e = target_at(&pos, 105.0, Some(102.0));
        assert_eq!(e.level, 3);
        assert!(close(e.excursion, 105.0));
        let t = e.target.unwrap();
        assert!(close(t.price, 103.425));
        assert!(t.trailing);
        assert!(close(t.locked_profit_percent, 3.425));
    }

    #[test]
    fn short_trails_below_floor() {
        let pos = Position::open("ETHUSDT", Side::Short, 100.0, 1.0, 100.0);
        let e = target_at(&pos, 95.0, None);
        assert_eq!(e.level, 3);
        let t = e.target.unwrap();
        assert!(close(t.price, 96.425));
        assert!(t.trailing);
    }

    #[test]
    fn level_three_falls_back_to_floor_when_trail_is_looser() {
        // 104.5 trailed by 3 % is 101.365, under the 101.9 floor
        let mut ladder = LadderConfig::default();
        ladder.level_3.trailing_percent = 3.0;
        let pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        let e = evaluate(&pos, 104.5, &ladder, None, &tick());
        let t = e.target.unwrap();
        assert!(close(t.price, 101.9));
        assert!(!t.trailing);
    }

    #[test]
    fn nothing_below_level_one() {
        let pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        let e = target_at(&pos, 101.0, None);
        assert_eq!(e.level, 0);
        assert!(e.target.is_none());
        assert!(close(e.excursion, 101.0));
    }

    #[test]
    fn breakeven_when_lock_is_zero() {
        let mut ladder = LadderConfig::default();
        ladder.level_1.lock_profit = 0.0;
        let pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        let t = evaluate(&pos, 102.0, &ladder, None, &tick()).target.unwrap();
        assert!(close(t.price, 100.0));
    }

    #[test]
    fn equal_or_weaker_stop_is_no_change() {
        let mut pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        pos.stop_price = Some(100.1);
        assert!(target_at(&pos, 102.0, None).target.is_none());

        // differs only below the tick
        pos.stop_price = Some(100.0996);
        assert!(target_at(&pos, 102.0, None).target.is_none());

        pos.stop_price = Some(101.0);
        assert!(target_at(&pos, 102.0, None).target.is_none());
    }

    #[test]
    fn committed_level_survives_pullback() {
        let mut pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        pos.ladder_level = 2;
        // back in the level-1 band, no stop on the book
        let e = target_at(&pos, 102.0, None);
        assert_eq!(e.level, 1);
        let t = e.target.unwrap();
        assert_eq!(t.level, 2);
        assert!(close(t.price, 101.9));

        // below level 1 entirely
        pos.ladder_level = 1;
        let e = target_at(&pos, 101.0, None);
        assert_eq!(e.level, 0);
        let t = e.target.unwrap();
        assert_eq!(t.level, 1);
        assert!(close(t.price, 100.1));
    }

    #[test]
    fn target_behind_mark_is_crossed() {
        let mut pos = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        pos.ladder_level = 3;
        pos.stop_price = Some(101.9);
        // excursion 106 → trail 104.41, mark already at 104
        let e = target_at(&pos, 104.0, Some(106.0));
        assert!(e.target.is_none());
        assert!(close(e.crossed.unwrap(), 104.41));
    }

    #[test]
    fn ratchet_is_monotonic() {
        for side in [Side::Long, Side::Short] {
            let mut pos = Position::open("BTCUSDT", side, 100.0, 1.0, 100.0);
            let mut excursion = None;
            let mut accepted: Option<f64> = None;
            let moves = [0.5, 1.9, 2.2, 1.0, 2.7, 3.1, 2.0, 4.2, 5.0, 4.6, 6.3, 6.0, 7.5, 3.0, 8.0];
            for pct in moves {
                let price = pos.price_at_profit(pct);
                let e = evaluate(&pos, price, &LadderConfig::default(), excursion, &tick());
                excursion = Some(e.excursion);
                if let Some(t) = e.target {
                    if let Some(prev) = accepted {
                        assert!(
                            side.is_more_protective(t.price, prev),
                            "{side}: {} after {prev}",
                            t.price
                        );
                    }
                    accepted = Some(t.price);
                    pos.stop_price = Some(t.price);
                    pos.ladder_level = pos.ladder_level.max(e.level);
                }
            }
            let last = accepted.unwrap();
            // 8 % excursion trailed by 1.5 %
            let peak = pos.price_at_profit(0.0) * (1.0 + side.sign() * 0.08);
            assert!(close(last, peak * (1.0 - side.sign() * 0.015)));
        }
    }

    #[test]
    fn initial_stop_sits_on_the_losing_side() {
        let long = Position::open("A", Side::Long, 100.0, 1.0, 100.0);
        let short = Position::open("A", Side::Short, 100.0, 1.0, 100.0);
        assert!(close(initial_stop(&long, 2.0), 98.0));
        assert!(close(initial_stop(&short, 2.0), 102.0));
    }
}
