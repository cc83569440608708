use expflow::config::SuiteSettings;
use expflow::progress::{Progress, ProgressFiles};
use expflow::scheduler::{ForecastCycleSchedule, SuiteBuilder};
use expflow::types::{Dtg, SuiteKind};
use proptest::prelude::*;

fn dtg_strategy(hours: Vec<u32>) -> impl Strategy<Value = Dtg> {
    (2000i32..2030, 1u32..=12, 1u32..=28, proptest::sample::select(hours))
        .prop_map(|(y, m, d, h)| Dtg::from_ymdh(y, m, d, h).unwrap())
}

fn schedule_strategy() -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::btree_set(0u32..24, 1..8).prop_map(|s| s.into_iter().collect())
}

proptest! {
    #[test]
    fn advance_moves_current_and_round_trips(
        start in dtg_strategy((0..24).collect()),
        steps in proptest::collection::vec(1u32..=24, 1..6),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let files = ProgressFiles::new(dir.path().join("progress.toml"), dir.path().join("progressPP.toml"));
        let mut progress = Progress::at(start).with_store(files.clone());

        let mut expected = start;
        for step in steps {
            progress.advance(step, false).unwrap();
            expected = expected.add_hours(i64::from(step)).unwrap();
            prop_assert_eq!(progress.dtg_current(), expected);
            prop_assert!(progress.dtg_begin() <= progress.dtg_current());
            prop_assert!(progress.dtg_current() <= progress.dtg_end());
        }

        let reloaded = Progress::load(files, &Default::default()).unwrap();
        prop_assert_eq!(reloaded, progress);
    }

    #[test]
    fn suite_dtgs_increase_by_scheduled_interval(
        hours in schedule_strategy(),
        span in 0i64..96,
        seed in any::<prop::sample::Index>(),
    ) {
        let first = hours[seed.index(hours.len())];
        let begin = Dtg::from_ymdh(2024, 6, 1, first).unwrap();
        let end = begin.add_hours(span).unwrap();
        let schedule = ForecastCycleSchedule::new(hours.clone()).unwrap();
        let settings = SuiteSettings::default();
        let progress = Progress::new(begin, begin, end, begin).unwrap();

        let suite = SuiteBuilder::new("exp", &schedule, &settings)
            .build(SuiteKind::Surfex, &progress, &[])
            .unwrap();

        prop_assert_eq!(suite.cycles[0].dtg, begin);
        for pair in suite.cycles.windows(2) {
            prop_assert!(pair[0].dtg < pair[1].dtg);
            prop_assert_eq!(pair[1].dtg.hours_since(pair[0].dtg), i64::from(pair[0].fcint));
            prop_assert_eq!(pair[0].fcint, schedule.interval_at(pair[0].dtg.hour()).unwrap());
        }
        prop_assert!(suite.cycles.last().unwrap().dtg <= end);
    }
}
