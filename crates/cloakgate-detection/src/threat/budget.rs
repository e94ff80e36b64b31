use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::ThreatError;

/// Per-provider request budget over two wall-clock windows (minute and day).
///
/// Window resets are keyed on the window index, so concurrent checks at a
/// boundary reset at most once — the reset is idempotent.
pub struct BudgetWindow {
    per_minute: u32,
    per_day: u32,
    minute: Mutex<(i64, u32)>,
    day: Mutex<(i64, u32)>,
}

fn lock_window(window: &Mutex<(i64, u32)>) -> MutexGuard<'_, (i64, u32)> {
    match window.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn roll_window(state: &mut (i64, u32), index: i64) {
    if state.0 != index {
        *state = (index, 0);
    }
}

impl BudgetWindow {
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        Self {
            per_minute,
            per_day,
            minute: Mutex::new((0, 0)),
            day: Mutex::new((0, 0)),
        }
    }

    /// Take one unit from both windows, or fail without consuming either.
    ///
    /// Both guards are held across the check-then-increment so an exhausted
    /// minute window cannot leak day slots under load.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<(), ThreatError> {
        let ts = now.timestamp();
        let mut day = lock_window(&self.day);
        let mut minute = lock_window(&self.minute);
        roll_window(&mut day, ts / 86_400);
        roll_window(&mut minute, ts / 60);
        if day.1 >= self.per_day || minute.1 >= self.per_minute {
            return Err(ThreatError::BudgetExhausted);
        }
        day.1 += 1;
        minute.1 += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minute_budget_exhausts_and_resets() {
        let budget = BudgetWindow::new(2, 100);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        assert!(budget.try_acquire(t0).is_ok());
        assert!(budget.try_acquire(t0).is_ok());
        assert!(matches!(
            budget.try_acquire(t0),
            Err(ThreatError::BudgetExhausted)
        ));
        // Next minute window resets the count.
        let t1 = t0 + chrono::Duration::seconds(60);
        assert!(budget.try_acquire(t1).is_ok());
    }

    #[test]
    fn day_budget_caps_across_minutes() {
        let budget = BudgetWindow::new(100, 3);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        for i in 0..3 {
            let t = t0 + chrono::Duration::seconds(i * 61);
            assert!(budget.try_acquire(t).is_ok());
        }
        let t = t0 + chrono::Duration::seconds(4 * 61);
        assert!(matches!(
            budget.try_acquire(t),
            Err(ThreatError::BudgetExhausted)
        ));
    }

    #[test]
    fn exhausted_minute_does_not_consume_day_slots() {
        let budget = BudgetWindow::new(1, 2);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        assert!(budget.try_acquire(t0).is_ok());
        // A burst of over-minute-budget attempts must leave the day count at 1.
        for _ in 0..10 {
            assert!(matches!(
                budget.try_acquire(t0),
                Err(ThreatError::BudgetExhausted)
            ));
        }
        // The second (and last) day slot is still available next minute.
        let t1 = t0 + chrono::Duration::seconds(60);
        assert!(budget.try_acquire(t1).is_ok());
        let t2 = t0 + chrono::Duration::seconds(120);
        assert!(matches!(
            budget.try_acquire(t2),
            Err(ThreatError::BudgetExhausted)
        ));
    }
}
