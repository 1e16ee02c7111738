//! Property tests over generated price paths.

use chartscan::{evaluate::crossover, extrema::find_extrema, prelude::*};
use chrono::NaiveDate;
use proptest::prelude::*;

fn bars(closes: &[f64]) -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(start + chrono::Days::new(i as u64), c, c * 1.01, c * 0.99, c, 100.0))
        .collect()
}

/// Random walk of daily returns within +-4%
fn walk(len: std::ops::RangeInclusive<usize>) -> impl Strategy<Value = Vec<f64>> {
    (50.0f64..500.0, prop::collection::vec(-0.04f64..0.04, len)).prop_map(|(start, steps)| {
        steps
            .iter()
            .scan(start, |price, r| {
                *price *= 1.0 + r;
                Some(*price)
            })
            .collect()
    })
}

fn rows(closes: &[f64]) -> Vec<FrameRow> {
    bars(closes).into_iter().map(FrameRow::from_bar).collect()
}

proptest! {
    #[test]
    fn short_frames_never_match(closes in walk(1..=249)) {
        let r = rows(&closes);
        let extrema = find_extrema(&r);
        for detector in BuiltinDetector::all_defaults() {
            let result = detector.detect(&r, &extrema);
            prop_assert!(!result.matched);
            prop_assert_eq!(result.status, PatternStatus::None);
            prop_assert_eq!(result.score, 0.0);
            prop_assert_eq!(result.reference_price, None);
        }
    }

    #[test]
    fn crosses_are_exclusive(pairs in prop::collection::vec((50.0f64..150.0, 50.0f64..150.0), 200..=210)) {
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let r: Vec<FrameRow> = pairs
            .iter()
            .enumerate()
            .map(|(i, &(s50, s200))| FrameRow {
                sma50: s50,
                sma200: s200,
                ..FrameRow::from_bar(Bar::new(start + chrono::Days::new(i as u64), 1.0, 1.0, 1.0, 1.0, 1.0))
            })
            .collect();
        let (golden, dead) = crossover(&r);
        prop_assert!(!(golden && dead));
    }

    #[test]
    fn double_bottom_troughs_sit_near_floor(closes in walk(260..=400)) {
        let r = rows(&closes);
        let extrema = find_extrema(&r);
        let detector = DoubleBottomDetector::default();
        let result = detector.detect(&r, &extrema);
        if result.matched {
            let len = r.len();
            let recent: Vec<usize> = extrema.troughs.iter().copied().filter(|&t| t >= len - 150).collect();
            let floor = r[len - 250..].iter().map(|row| row.bar.low).fold(f64::INFINITY, f64::min);
            let (a, b) = (recent[recent.len() - 2], recent[recent.len() - 1]);
            prop_assert!(r[a].bar.close <= floor * 1.05);
            prop_assert!(r[b].bar.close <= floor * 1.05);
        }
    }

    #[test]
    fn triple_bottom_troughs_sit_near_floor(closes in walk(260..=400)) {
        let r = rows(&closes);
        let extrema = find_extrema(&r);
        let result = TripleBottomDetector::default().detect(&r, &extrema);
        if result.matched {
            let len = r.len();
            let recent: Vec<usize> = extrema.troughs.iter().copied().filter(|&t| t >= len - 200).collect();
            let floor = r[len - 250..].iter().map(|row| row.bar.low).fold(f64::INFINITY, f64::min);
            for &t in &recent[recent.len() - 3..] {
                prop_assert!(r[t].bar.close <= floor * 1.07);
            }
        }
    }

    #[test]
    fn bottoms_ignore_trough_order(closes in walk(260..=300), raw in prop::collection::vec(0usize..300, 0..8)) {
        let r = rows(&closes);
        let extrema = Extrema { peaks: vec![], troughs: raw };
        // any index list is accepted without panicking
        let _ = DoubleBottomDetector::default().detect(&r, &extrema);
        let _ = TripleBottomDetector::default().detect(&r, &extrema);
    }

    #[test]
    fn filters_never_panic(raw in "[a-z_:0-9]{0,24}", closes in walk(260..=300)) {
        let r = rows(&closes);
        let conditions = Evaluator::default().evaluate(&r, &[20, 50, 200], true);
        let filter = Filter::parse(&raw);
        let _ = filter.matches(&conditions, &r, &[20, 50, 200]);
        prop_assert!(filter.sort_score(&conditions).is_finite());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn regime_labels_in_range(closes in walk(200..=460)) {
        let series = BarSeries::new("P", bars(&closes)).unwrap();
        let mut frame = indicators::compute(&series);
        RegimeClassifier::default().classify(&mut frame);
        let labels: Vec<i32> = frame.rows().iter().map(|r| r.regime).collect();
        prop_assert!(labels.iter().all(|l| (-1..=3).contains(l)));
        if frame.len() < 200 {
            prop_assert!(labels.iter().all(|&l| l == UNCLASSIFIED));
        }
        // one label covers the whole frame when unclassified
        if labels.contains(&UNCLASSIFIED) {
            prop_assert!(labels.iter().all(|&l| l == UNCLASSIFIED));
        }
    }
}

#[test]
fn constant_series_is_unclassified() {
    let series = BarSeries::new("C", bars(&[75.0; 460])).unwrap();
    let mut frame = indicators::compute(&series);
    assert_eq!(frame.len(), 261);
    RegimeClassifier::default().classify(&mut frame);
    assert!(frame.rows().iter().all(|r| r.regime == UNCLASSIFIED));
}
