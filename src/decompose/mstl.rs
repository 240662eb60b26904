//! Multi-seasonal STL: each period is refit against the series with every
//! other seasonal component removed, repeated for a few passes so the
//! components settle jointly.

use super::stl::Stl;
use super::{Components, SeasonalDecomposer};
use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Mstl {
    /// Passes over all periods.
    pub iterate: usize,
    /// Seasonal smoother span per period (ascending period order). Defaults
    /// to 7 + 4i for the i-th period, counting from 1.
    pub seasonal_windows: Option<Vec<usize>>,
    pub robust: bool,
}

impl Default for Mstl {
    fn default() -> Self {
        Self {
            iterate: 2,
            seasonal_windows: None,
            robust: false,
        }
    }
}

impl Mstl {
    fn window(&self, rank: usize) -> usize {
        self.seasonal_windows
            .as_ref()
            .and_then(|w| w.get(rank).copied())
            .unwrap_or(7 + 4 * (rank + 1))
    }

    fn stl(&self, period: usize, rank: usize) -> Stl {
        let stl = Stl::new(period, self.window(rank));
        if self.robust { stl.robust() } else { stl }
    }
}

impl SeasonalDecomposer for Mstl {
    /// With no periods the trend stays zero and everything lands in the
    /// residual.
    fn decompose(&self, values: &[f64], periods: &[usize]) -> Result<Components> {
        let n = values.len();

        // Fit shorter cycles first; results go back in caller order.
        let mut order: Vec<usize> = (0..periods.len()).collect();
        order.sort_by_key(|&i| periods[i]);

        if let Some(&longest) = order.last().map(|&i| &periods[i]) {
            if n < 2 * longest {
                return Err(MonitorError::InsufficientData {
                    len: n,
                    required: 2 * longest,
                });
            }
        }

        let fitters: Vec<Stl> = order
            .iter()
            .enumerate()
            .map(|(rank, &i)| self.stl(periods[i], rank))
            .collect();

        let mut seasonal = vec![vec![0.0; n]; periods.len()];
        let mut deseasoned = values.to_vec();
        let mut trend = vec![0.0; n];

        for _ in 0..self.iterate.max(1) {
            for (stl, &slot) in fitters.iter().zip(&order) {
                for (d, s) in deseasoned.iter_mut().zip(&seasonal[slot]) {
                    *d += s;
                }
                let fit = stl.fit(&deseasoned)?;
                for (d, s) in deseasoned.iter_mut().zip(&fit.seasonal) {
                    *d -= s;
                }
                seasonal[slot] = fit.seasonal;
                trend = fit.trend;
            }
        }

        let residual = deseasoned.iter().zip(&trend).map(|(d, t)| d - t).collect();

        Ok(Components {
            trend,
            seasonal,
            residual,
        })
    }
}
