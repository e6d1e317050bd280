//! Derived statistics over monthly series. Pure; no I/O.
//!
//! Functions that can run short of data return [`Stat::InsufficientData`]
//! instead of a number, so callers never render a value computed from too
//! few observations.

use std::collections::BTreeMap;

use jvw_md::Month;
use serde::Serialize;

use crate::align::MonthlySeries;

/// Minimum joined points for a correlation.
pub const MIN_CORRELATION_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Value(f64),
    InsufficientData { needed: usize, available: usize },
}

impl Stat {
    pub fn value(&self) -> Option<f64> {
        match self {
            Stat::Value(v) => Some(*v),
            Stat::InsufficientData { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Stat::InsufficientData { .. })
    }
}

/// Compounded return over the trailing `months` finite observations:
/// `prod(1 + r_i) - 1`.
pub fn momentum(returns: &[f64], months: usize) -> Stat {
    let valid: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    if months == 0 || valid.len() < months {
        return Stat::InsufficientData {
            needed: months.max(1),
            available: valid.len(),
        };
    }
    let tail = &valid[valid.len() - months..];
    let growth = tail.iter().fold(1.0, |acc, r| acc * (1.0 + r));
    Stat::Value(growth - 1.0)
}

/// Level at a month with its one- and twelve-month deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelChange {
    pub month: Month,
    pub value: f64,
    /// Change versus exactly one calendar month earlier.
    pub mom: Option<f64>,
    /// Change versus exactly twelve calendar months earlier.
    pub yoy: Option<f64>,
}

/// `None` when `latest` itself is not in the series.
pub fn mom_yoy(series: &MonthlySeries, latest: Month) -> Option<LevelChange> {
    let value = series.get(latest)?;
    let delta = |back: i64| {
        latest
            .offset(-back)
            .and_then(|m| series.get(m))
            .map(|prior| value - prior)
    };
    Some(LevelChange {
        month: latest,
        value,
        mom: delta(1),
        yoy: delta(12),
    })
}

/// Pearson correlation on the months both series share, after dropping
/// non-finite values. Symmetric in its arguments bit for bit.
pub fn correlation(a: &MonthlySeries, b: &MonthlySeries) -> Stat {
    let pairs: Vec<(f64, f64)> = a
        .points()
        .iter()
        .filter_map(|(m, x)| b.get(*m).map(|y| (*x, y)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    pearson(&pairs)
}

fn pearson(pairs: &[(f64, f64)]) -> Stat {
    let n = pairs.len();
    let insufficient = Stat::InsufficientData {
        needed: MIN_CORRELATION_POINTS,
        available: n,
    };
    if n < MIN_CORRELATION_POINTS {
        return insufficient;
    }

    let nf = n as f64;
    let mx = pairs.iter().map(|(x, _)| x).sum::<f64>() / nf;
    let my = pairs.iter().map(|(_, y)| y).sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in pairs {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }

    let denom = (vx * vy).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        // Constant input: correlation undefined.
        return insufficient;
    }
    Stat::Value((cov / denom).clamp(-1.0, 1.0))
}

/// Row-over-row fractional change; the first point and points following a
/// zero are dropped.
pub fn pct_change(series: &MonthlySeries) -> MonthlySeries {
    let mut out = BTreeMap::new();
    let mut prev: Option<f64> = None;
    for (m, v) in series.points() {
        if let Some(p) = prev {
            if p != 0.0 {
                let r = v / p - 1.0;
                if r.is_finite() {
                    out.insert(*m, r);
                }
            }
        }
        prev = Some(*v);
    }
    MonthlySeries::new(series.label().to_string(), out)
}

/// Index the series to `base` at its first point. Empty when the first
/// point is zero.
pub fn rebase(series: &MonthlySeries, base: f64) -> MonthlySeries {
    let first = series.points().values().next().copied();
    let points = match first {
        Some(f) if f != 0.0 => series
            .points()
            .iter()
            .map(|(m, v)| (*m, v / f * base))
            .collect(),
        _ => BTreeMap::new(),
    };
    MonthlySeries::new(series.label().to_string(), points)
}

pub fn last_value(series: &MonthlySeries) -> Option<(Month, f64)> {
    series.points().iter().next_back().map(|(m, v)| (*m, *v))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    fn series(label: &str, pts: &[(&str, f64)]) -> MonthlySeries {
        MonthlySeries::new(
            label.to_string(),
            pts.iter().map(|(k, v)| (m(k), *v)).collect(),
        )
    }

    /// `n` consecutive months starting 2000-01.
    fn consecutive(label: &str, vals: &[f64]) -> MonthlySeries {
        let start = m("2000-01");
        MonthlySeries::new(
            label.to_string(),
            vals.iter()
                .enumerate()
                .map(|(i, v)| (start.offset(i as i64).unwrap(), *v))
                .collect(),
        )
    }

    #[test]
    fn momentum_needs_enough_observations() {
        assert_eq!(
            momentum(&[0.01, 0.02], 3),
            Stat::InsufficientData { needed: 3, available: 2 }
        );
        assert!(momentum(&[0.01], 0).is_insufficient());
        assert!(momentum(&[f64::NAN, 0.01], 2).is_insufficient());
    }

    #[test]
    fn momentum_uses_trailing_window() {
        let v = momentum(&[0.5, 0.10, -0.10], 2).value().unwrap();
        assert!((v - (1.10 * 0.90 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn mom_yoy_requires_exact_prior_months() {
        let s = series(
            "u",
            &[("2023-01", 3.4), ("2023-12", 3.7), ("2024-01", 3.7)],
        );
        let c = mom_yoy(&s, m("2024-01")).unwrap();
        assert_eq!(c.value, 3.7);
        assert_eq!(c.mom, Some(0.0));
        assert!((c.yoy.unwrap() - 0.3).abs() < 1e-12);

        let gap = series("u", &[("2023-11", 3.7), ("2024-01", 3.9)]);
        let c = mom_yoy(&gap, m("2024-01")).unwrap();
        assert_eq!(c.mom, None);
        assert_eq!(c.yoy, None);

        assert!(mom_yoy(&gap, m("2024-02")).is_none());
    }

    #[test]
    fn correlation_perfect_and_inverse() {
        let a = consecutive("a", &[1.0, 2.0, 3.0, 4.0]);
        let b = consecutive("b", &[2.0, 4.0, 6.0, 8.0]);
        let c = consecutive("c", &[4.0, 3.0, 2.0, 1.0]);
        assert!((correlation(&a, &b).value().unwrap() - 1.0).abs() < 1e-12);
        assert!((correlation(&a, &c).value().unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_joins_on_month() {
        let a = series("a", &[("2020-01", 1.0), ("2020-02", 2.0), ("2020-03", 3.0), ("2020-04", 9.0)]);
        let b = series("b", &[("2020-01", 1.0), ("2020-02", 2.0)]);
        assert_eq!(
            correlation(&a, &b),
            Stat::InsufficientData { needed: 3, available: 2 }
        );
    }

    #[test]
    fn correlation_constant_series_is_insufficient() {
        let a = consecutive("a", &[1.0, 1.0, 1.0, 1.0]);
        let b = consecutive("b", &[1.0, 2.0, 3.0, 4.0]);
        assert!(correlation(&a, &b).is_insufficient());
    }

    #[test]
    fn pct_change_and_rebase() {
        let s = consecutive("px", &[100.0, 110.0, 99.0]);
        let r = pct_change(&s);
        assert_eq!(r.len(), 2);
        assert!((r.get(m("2000-02")).unwrap() - 0.10).abs() < 1e-12);

        let idx = rebase(&s, 100.0);
        assert_eq!(idx.get(m("2000-01")), Some(100.0));
        assert!((idx.get(m("2000-02")).unwrap() - 110.0).abs() < 1e-9);

        assert!(rebase(&consecutive("z", &[0.0, 1.0]), 100.0).is_empty());
        assert_eq!(last_value(&s), Some((m("2000-03"), 99.0)));
        assert_eq!(last_value(&consecutive("e", &[])), None);
    }

    proptest! {
        #[test]
        fn constant_return_compounds(r in -0.5f64..0.5, months in 1usize..24, extra in 0usize..6) {
            let returns = vec![r; months + extra];
            let got = momentum(&returns, months).value().unwrap();
            let want = (1.0 + r).powi(months as i32) - 1.0;
            prop_assert!((got - want).abs() < 1e-9, "got {got} want {want}");
        }

        #[test]
        fn short_input_is_insufficient(len in 0usize..12, months in 1usize..24) {
            prop_assume!(len < months);
            let returns = vec![0.01; len];
            prop_assert!(momentum(&returns, months).is_insufficient());
        }

        #[test]
        fn correlation_is_symmetric(
            xs in prop::collection::vec(-1e3f64..1e3, 0..40),
            ys in prop::collection::vec(-1e3f64..1e3, 0..40),
        ) {
            let a = consecutive("a", &xs);
            let b = consecutive("b", &ys);
            let ab = correlation(&a, &b);
            let ba = correlation(&b, &a);
            match (ab, ba) {
                (Stat::Value(x), Stat::Value(y)) => prop_assert_eq!(x.to_bits(), y.to_bits()),
                (x, y) => prop_assert_eq!(x, y),
            }
            if xs.len().min(ys.len()) < 3 {
                prop_assert!(ab.is_insufficient());
            }
        }
    }
}
