//! Cron engine invariants.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use proptest::prelude::*;
use stanchion_scheduler::CronExpression;

fn arbitrary_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // Any second within 2024.
    (0i64..366 * 24 * 3600).prop_map(|offset| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset)
    })
}

proptest! {
    /// The next fire is strictly after `from` and lands on a minute that
    /// satisfies the expression.
    #[test]
    fn next_fire_is_future_and_matching(
        from in arbitrary_instant(),
        minute in 0u32..60,
        hour in 0u32..24,
    ) {
        let expression = format!("{minute} {hour} * * *");
        let cron = CronExpression::parse(&expression).unwrap();
        let next = cron.next_fire(from, None).unwrap();

        prop_assert!(next > from);
        prop_assert_eq!(next.minute(), minute);
        prop_assert_eq!(next.hour(), hour);
        prop_assert_eq!(next.second(), 0);
    }

    /// Step expressions fire only on multiples of the step.
    #[test]
    fn steps_fire_on_multiples(
        from in arbitrary_instant(),
        step in 1u32..30,
    ) {
        let expression = format!("*/{step} * * * *");
        let cron = CronExpression::parse(&expression).unwrap();
        let next = cron.next_fire(from, None).unwrap();
        prop_assert_eq!(next.minute() % step, 0);
    }

    /// Day-of-week fields constrain the fire day (Sunday = 0).
    #[test]
    fn day_of_week_is_honored(
        from in arbitrary_instant(),
        dow in 0u32..7,
    ) {
        let expression = format!("0 12 * * {dow}");
        let cron = CronExpression::parse(&expression).unwrap();
        let next = cron.next_fire(from, None).unwrap();
        prop_assert_eq!(next.weekday().num_days_from_sunday(), dow);
        prop_assert_eq!(next.hour(), 12);
    }
}
