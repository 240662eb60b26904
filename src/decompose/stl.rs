//! Seasonal-trend decomposition by loess (Cleveland, Cleveland, McRae &
//! Terpenning, 1990) for a single seasonal period.

use crate::error::{MonitorError, Result};

/// STL parameters. Smoother spans are forced odd and at least 3 when fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Stl {
    pub period: usize,
    pub seasonal: usize,
    pub trend: usize,
    pub low_pass: usize,
    pub seasonal_deg: usize,
    pub trend_deg: usize,
    pub low_pass_deg: usize,
    pub seasonal_jump: usize,
    pub trend_jump: usize,
    pub low_pass_jump: usize,
    pub inner_iter: usize,
    pub outer_iter: usize,
}

/// Output of [`Stl::fit`]. `weights` are the final robustness weights
/// (all ones when no outer iterations ran).
#[derive(Debug, Clone, PartialEq)]
pub struct StlFit {
    pub seasonal: Vec<f64>,
    pub trend: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Stl {
    /// Standard spans for `period` with a seasonal smoother of `seasonal`
    /// points: trend is the smallest odd integer >= 1.5p / (1 - 1.5/s),
    /// low-pass the smallest odd integer > p.
    pub fn new(period: usize, seasonal: usize) -> Self {
        let seasonal = odd(seasonal.max(3));
        let trend = (1.5 * period as f64 / (1.0 - 1.5 / seasonal as f64)).ceil() as usize;
        Self {
            period,
            seasonal,
            trend: odd(trend.max(3)),
            low_pass: odd(period + 1),
            seasonal_deg: 1,
            trend_deg: 1,
            low_pass_deg: 1,
            seasonal_jump: 1,
            trend_jump: 1,
            low_pass_jump: 1,
            inner_iter: 5,
            outer_iter: 0,
        }
    }

    /// Switches to robust fitting: bisquare weights recomputed over 15
    /// outer passes, 2 inner passes each.
    pub fn robust(mut self) -> Self {
        self.inner_iter = 2;
        self.outer_iter = 15;
        self
    }

    pub fn fit(&self, y: &[f64]) -> Result<StlFit> {
        let n = y.len();
        let np = self.period.max(2);
        if n < 2 * np {
            return Err(MonitorError::InsufficientData {
                len: n,
                required: 2 * np,
            });
        }

        let ns = odd(self.seasonal.max(3));
        let nt = odd(self.trend.max(3));
        let nl = odd(self.low_pass.max(3));

        let mut trend = vec![0.0; n];
        let mut season = vec![0.0; n];
        let mut weights = vec![1.0; n];
        let mut robust = false;

        for outer in 0..=self.outer_iter {
            let rw = robust.then_some(weights.as_slice());
            self.inner_loop(y, np, ns, nt, nl, rw, &mut season, &mut trend);

            if outer == self.outer_iter {
                break;
            }
            let fit: Vec<f64> = trend.iter().zip(&season).map(|(t, s)| t + s).collect();
            weights = robustness_weights(y, &fit);
            robust = true;
        }

        if self.outer_iter == 0 {
            weights.fill(1.0);
        }

        Ok(StlFit {
            seasonal: season,
            trend,
            weights,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn inner_loop(
        &self,
        y: &[f64],
        np: usize,
        ns: usize,
        nt: usize,
        nl: usize,
        rw: Option<&[f64]>,
        season: &mut [f64],
        trend: &mut [f64],
    ) {
        let n = y.len();
        let mut cycle = vec![0.0; n + 2 * np];
        let mut low = vec![0.0; n];
        let mut scratch = vec![0.0; n + 2 * np];

        for _ in 0..self.inner_iter.max(1) {
            let detrended: Vec<f64> = y.iter().zip(trend.iter()).map(|(y, t)| y - t).collect();
            cycle_subseries(
                &detrended,
                np,
                ns,
                self.seasonal_deg,
                self.seasonal_jump,
                rw,
                &mut cycle,
            );

            let filtered = moving_average(&moving_average(&moving_average(&cycle, np), np), 3);
            loess(
                &filtered,
                nl,
                self.low_pass_deg,
                self.low_pass_jump,
                None,
                &mut low,
                &mut scratch,
            );

            for i in 0..n {
                season[i] = cycle[np + i] - low[i];
            }

            let deseasoned: Vec<f64> = y.iter().zip(season.iter()).map(|(y, s)| y - s).collect();
            loess(
                &deseasoned,
                nt,
                self.trend_deg,
                self.trend_jump,
                rw,
                trend,
                &mut scratch,
            );
        }
    }
}

fn odd(v: usize) -> usize {
    if v % 2 == 0 { v + 1 } else { v }
}

/// Single loess estimate at position `xs` from points `nleft..=nright`
/// with a tricube kernel. `w` is scratch space at least `y.len()` long.
/// Returns `None` when every weight in the window is zero.
#[allow(clippy::too_many_arguments)]
fn estimate(
    y: &[f64],
    len: usize,
    deg: usize,
    xs: f64,
    nleft: usize,
    nright: usize,
    w: &mut [f64],
    rw: Option<&[f64]>,
) -> Option<f64> {
    let n = y.len();
    let range = n as f64 - 1.0;
    let mut h = (xs - nleft as f64).max(nright as f64 - xs);
    if len > n {
        h += ((len - n) / 2) as f64;
    }
    let h9 = 0.999 * h;
    let h1 = 0.001 * h;

    let mut total = 0.0;
    for j in nleft..=nright {
        w[j] = 0.0;
        let r = (j as f64 - xs).abs();
        if r <= h9 {
            w[j] = if r <= h1 {
                1.0
            } else {
                (1.0 - (r / h).powi(3)).powi(3)
            };
            if let Some(rw) = rw {
                w[j] *= rw[j];
            }
            total += w[j];
        }
    }
    if total <= 0.0 {
        return None;
    }

    for wj in &mut w[nleft..=nright] {
        *wj /= total;
    }

    if h > 0.0 && deg > 0 {
        let a: f64 = (nleft..=nright).map(|j| w[j] * j as f64).sum();
        let c: f64 = (nleft..=nright)
            .map(|j| w[j] * (j as f64 - a).powi(2))
            .sum();
        if c.sqrt() > 0.001 * range {
            let b = (xs - a) / c;
            for j in nleft..=nright {
                w[j] *= b * (j as f64 - a) + 1.0;
            }
        }
    }

    Some((nleft..=nright).map(|j| w[j] * y[j]).sum())
}

/// Loess smoothing of `y` into `ys` with span `len`, evaluating every
/// `jump` points and interpolating linearly in between.
fn loess(
    y: &[f64],
    len: usize,
    deg: usize,
    jump: usize,
    rw: Option<&[f64]>,
    ys: &mut [f64],
    w: &mut [f64],
) {
    let n = y.len();
    if n == 0 {
        return;
    }
    if n < 2 {
        ys[0] = y[0];
        return;
    }

    let jump = jump.clamp(1, n - 1);
    let mut nleft = 0;
    let mut nright = n - 1;

    if len >= n {
        for i in (0..n).step_by(jump) {
            ys[i] = estimate(y, len, deg, i as f64, nleft, nright, w, rw).unwrap_or(y[i]);
        }
    } else if jump == 1 {
        let half = (len + 1) / 2;
        nright = len - 1;
        for i in 0..n {
            if i + 1 > half && nright != n - 1 {
                nleft += 1;
                nright += 1;
            }
            ys[i] = estimate(y, len, deg, i as f64, nleft, nright, w, rw).unwrap_or(y[i]);
        }
    } else {
        let half = (len + 1) / 2;
        for i in (0..n).step_by(jump) {
            let pos = i + 1;
            if pos < half {
                nleft = 0;
                nright = len - 1;
            } else if pos >= n - half + 1 {
                nleft = n - len;
                nright = n - 1;
            } else {
                nleft = pos - half;
                nright = len + pos - half - 1;
            }
            ys[i] = estimate(y, len, deg, i as f64, nleft, nright, w, rw).unwrap_or(y[i]);
        }
    }

    if jump == 1 {
        return;
    }

    let mut i = 0;
    while i + jump < n {
        let delta = (ys[i + jump] - ys[i]) / jump as f64;
        for j in i + 1..i + jump {
            ys[j] = ys[i] + delta * (j - i) as f64;
        }
        i += jump;
    }

    let k = ((n - 1) / jump) * jump;
    if k != n - 1 {
        ys[n - 1] =
            estimate(y, len, deg, (n - 1) as f64, nleft, nright, w, rw).unwrap_or(y[n - 1]);
        if k != n - 2 {
            let delta = (ys[n - 1] - ys[k]) / (n - 1 - k) as f64;
            for j in k + 1..n - 1 {
                ys[j] = ys[k] + delta * (j - k) as f64;
            }
        }
    }
}

/// Smooths each cycle-subseries (every `np`-th point) and extends it one
/// period past both ends. `season` receives `y.len() + 2 * np` values.
fn cycle_subseries(
    y: &[f64],
    np: usize,
    ns: usize,
    deg: usize,
    jump: usize,
    rw: Option<&[f64]>,
    season: &mut [f64],
) {
    let n = y.len();

    for j in 0..np.min(n) {
        let k = (n - j - 1) / np + 1;
        let sub: Vec<f64> = (0..k).map(|i| y[i * np + j]).collect();
        let sub_rw: Option<Vec<f64>> = rw.map(|rw| (0..k).map(|i| rw[i * np + j]).collect());
        let sub_rw = sub_rw.as_deref();

        let mut smoothed = vec![0.0; k + 2];
        let mut w = vec![0.0; k];
        loess(&sub, ns, deg, jump, sub_rw, &mut smoothed[1..=k], &mut w);

        let nright = ns.min(k) - 1;
        smoothed[0] =
            estimate(&sub, ns, deg, -1.0, 0, nright, &mut w, sub_rw).unwrap_or(smoothed[1]);

        let nleft = k.saturating_sub(ns);
        smoothed[k + 1] =
            estimate(&sub, ns, deg, k as f64, nleft, k - 1, &mut w, sub_rw).unwrap_or(smoothed[k]);

        for (m, value) in smoothed.into_iter().enumerate() {
            season[m * np + j] = value;
        }
    }
}

/// Trailing moving average of width `len`; returns `x.len() - len + 1` values.
fn moving_average(x: &[f64], len: usize) -> Vec<f64> {
    if len == 0 || x.len() < len {
        return Vec::new();
    }
    let width = len as f64;
    let mut sum: f64 = x[..len].iter().sum();
    let mut out = Vec::with_capacity(x.len() - len + 1);
    out.push(sum / width);
    for j in len..x.len() {
        sum += x[j] - x[j - len];
        out.push(sum / width);
    }
    out
}

/// Bisquare weights from residuals scaled by six times their median.
fn robustness_weights(y: &[f64], fit: &[f64]) -> Vec<f64> {
    let n = y.len();
    let r: Vec<f64> = y.iter().zip(fit).map(|(y, f)| (y - f).abs()).collect();
    let mut sorted = r.clone();
    sorted.sort_by(f64::total_cmp);

    let mid_hi = n / 2;
    let mid_lo = n - mid_hi - 1;
    let cmad = 3.0 * (sorted[mid_hi] + sorted[mid_lo]);
    let c9 = 0.999 * cmad;
    let c1 = 0.001 * cmad;

    r.into_iter()
        .map(|r| {
            if r <= c1 {
                1.0
            } else if r <= c9 {
                (1.0 - (r / cmad).powi(2)).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_default_spans_for_daily_period() {
        let stl = Stl::new(24, 11);
        assert_eq!(stl.seasonal, 11);
        assert_eq!(stl.trend, 43);
        assert_eq!(stl.low_pass, 25);
    }

    #[test]
    fn test_default_spans_for_weekly_period() {
        let stl = Stl::new(168, 15);
        assert_eq!(stl.trend, 281);
        assert_eq!(stl.low_pass, 169);
    }

    #[test]
    fn test_moving_average() {
        assert_eq!(
            moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3),
            vec![2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_loess_reproduces_line() {
        let y: Vec<f64> = (0..50).map(|i| 2.0 * i as f64 + 1.0).collect();
        let mut ys = vec![0.0; 50];
        let mut w = vec![0.0; 50];

        loess(&y, 7, 1, 1, None, &mut ys, &mut w);

        for (a, b) in y.iter().zip(&ys) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn test_loess_with_jump_interpolates_line() {
        let y: Vec<f64> = (0..41).map(|i| 0.5 * i as f64).collect();
        let mut ys = vec![0.0; 41];
        let mut w = vec![0.0; 41];

        loess(&y, 9, 1, 4, None, &mut ys, &mut w);

        for (a, b) in y.iter().zip(&ys) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn test_robustness_weights_downweight_outlier() {
        let y = vec![1.0, 1.1, 0.9, 1.0, 50.0, 1.05, 0.95];
        let fit = vec![1.0; 7];
        let w = robustness_weights(&y, &fit);
        assert_eq!(w[4], 0.0);
        assert!(w[0] > 0.9);
    }

    #[test]
    fn test_too_short_series_is_rejected() {
        let err = Stl::new(24, 11).fit(&[0.0; 47]).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::InsufficientData { len: 47, required: 48 }
        ));
    }

    #[test]
    fn test_recovers_pure_seasonal_signal() {
        let y: Vec<f64> = (0..24 * 14)
            .map(|i| 10.0 + 3.0 * (2.0 * PI * i as f64 / 24.0).sin())
            .collect();

        let fit = Stl::new(24, 11).fit(&y).unwrap();

        for i in 24..y.len() - 24 {
            assert!((fit.trend[i] - 10.0).abs() < 0.1, "trend[{i}] = {}", fit.trend[i]);
            let expected = 3.0 * (2.0 * PI * i as f64 / 24.0).sin();
            assert!((fit.seasonal[i] - expected).abs() < 0.1);
        }
        assert!(fit.weights.iter().all(|w| *w == 1.0));
    }

    #[test]
    fn test_robust_fit_produces_weights() {
        let mut y: Vec<f64> = (0..24 * 6)
            .map(|i| (2.0 * PI * i as f64 / 24.0).cos())
            .collect();
        y[70] += 40.0;

        let fit = Stl::new(24, 11).robust().fit(&y).unwrap();

        assert!(fit.weights[70] < 0.5);
        assert_eq!(fit.seasonal.len(), y.len());
    }
}
