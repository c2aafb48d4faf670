//! XP curve and streak bonus math.
//!
//! All functions are pure so the award path can be tested without a database.
//! The curve is quadratic: reaching level N costs `base_xp * (N-1)^2` total XP,
//! which makes `level = isqrt(total_xp / base_xp) + 1`.

use crate::models::progress::Difficulty;

/// Default cost factor of the level curve. Overridable via config.
pub const DEFAULT_BASE_XP: i64 = 100;

const EASY_XP: i64 = 10;
const MEDIUM_XP: i64 = 25;
const HARD_XP: i64 = 50;

/// Streak bonus tiers as percent of the base reward, longest tier first.
const STREAK_TIERS: [(i32, i64); 4] = [(30, 100), (14, 50), (7, 30), (3, 10)];

/// Total reward is capped at this multiple of the base reward.
const MAX_MULTIPLIER_PERCENT: i64 = 200;

pub fn base_xp_for_difficulty(difficulty: Difficulty) -> i64 {
    match difficulty {
        Difficulty::Easy => EASY_XP,
        Difficulty::Medium => MEDIUM_XP,
        Difficulty::Hard => HARD_XP,
    }
}

/// Bonus percent for a streak of `streak_days` consecutive UTC days.
pub fn streak_bonus_percent(streak_days: i32) -> i64 {
    for (days, percent) in STREAK_TIERS {
        if streak_days >= days {
            return percent;
        }
    }
    0
}

/// XP awarded for one solve, streak bonus included.
pub fn xp_for_solve(difficulty: Difficulty, streak_days: i32) -> i64 {
    let base = base_xp_for_difficulty(difficulty);
    let percent = (100 + streak_bonus_percent(streak_days)).min(MAX_MULTIPLIER_PERCENT);
    base * percent / 100
}

/// Level implied by a lifetime XP total. Total XP never decreases, so the
/// level derived here never decreases either.
pub fn level_for_xp(total_xp: i64, base_xp: i64) -> i32 {
    let base = base_xp.max(1);
    let steps = (total_xp.max(0) / base) as u64;
    (steps.isqrt() + 1) as i32
}

/// Total XP required to reach `level`. Level 1 is the floor and costs nothing.
pub fn xp_for_level(level: i32, base_xp: i64) -> i64 {
    let base = base_xp.max(1);
    let step = i64::from(level.max(1) - 1);
    base * step * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_curve_reference_points() {
        assert_eq!(level_for_xp(0, DEFAULT_BASE_XP), 1);
        assert_eq!(level_for_xp(99, DEFAULT_BASE_XP), 1);
        assert_eq!(level_for_xp(100, DEFAULT_BASE_XP), 2);
        assert_eq!(level_for_xp(399, DEFAULT_BASE_XP), 2);
        assert_eq!(level_for_xp(400, DEFAULT_BASE_XP), 3);
        assert_eq!(level_for_xp(2_500, DEFAULT_BASE_XP), 6);
        assert_eq!(level_for_xp(10_000, DEFAULT_BASE_XP), 11);
    }

    #[test]
    fn test_level_never_below_one() {
        assert_eq!(level_for_xp(-50, DEFAULT_BASE_XP), 1);
        assert_eq!(level_for_xp(0, 0), 1);
    }

    #[test]
    fn test_xp_for_level_is_curve_inverse() {
        for level in 1..=200 {
            let floor_xp = xp_for_level(level, DEFAULT_BASE_XP);
            assert_eq!(level_for_xp(floor_xp, DEFAULT_BASE_XP), level);
            if level > 1 {
                assert_eq!(level_for_xp(floor_xp - 1, DEFAULT_BASE_XP), level - 1);
            }
        }
    }

    #[test]
    fn test_level_monotonic_in_xp() {
        let mut prev = 0;
        for xp in (0..50_000).step_by(37) {
            let level = level_for_xp(xp, DEFAULT_BASE_XP);
            assert!(level >= prev);
            prev = level;
        }
    }

    #[test]
    fn test_custom_base_xp() {
        assert_eq!(level_for_xp(50, 50), 2);
        assert_eq!(level_for_xp(199, 50), 2);
        assert_eq!(level_for_xp(200, 50), 3);
        assert_eq!(xp_for_level(3, 50), 200);
    }

    #[test]
    fn test_streak_bonus_tiers() {
        assert_eq!(streak_bonus_percent(0), 0);
        assert_eq!(streak_bonus_percent(2), 0);
        assert_eq!(streak_bonus_percent(3), 10);
        assert_eq!(streak_bonus_percent(6), 10);
        assert_eq!(streak_bonus_percent(7), 30);
        assert_eq!(streak_bonus_percent(13), 30);
        assert_eq!(streak_bonus_percent(14), 50);
        assert_eq!(streak_bonus_percent(29), 50);
        assert_eq!(streak_bonus_percent(30), 100);
        assert_eq!(streak_bonus_percent(365), 100);
    }

    #[test]
    fn test_solve_rewards() {
        assert_eq!(xp_for_solve(Difficulty::Easy, 0), 10);
        assert_eq!(xp_for_solve(Difficulty::Medium, 0), 25);
        assert_eq!(xp_for_solve(Difficulty::Hard, 0), 50);

        assert_eq!(xp_for_solve(Difficulty::Easy, 3), 11);
        assert_eq!(xp_for_solve(Difficulty::Medium, 7), 32);
        assert_eq!(xp_for_solve(Difficulty::Hard, 14), 75);
        assert_eq!(xp_for_solve(Difficulty::Hard, 30), 100);
    }

    #[test]
    fn test_solve_reward_never_exceeds_double_base() {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            let base = base_xp_for_difficulty(difficulty);
            for streak in 0..400 {
                assert!(xp_for_solve(difficulty, streak) <= base * 2);
            }
        }
    }
}
