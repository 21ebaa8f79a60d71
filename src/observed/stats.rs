//! Goodness-of-fit statistics on paired observed/simulated series.

use serde::{Deserialize, Serialize};

/// Statistics that are undefined for the series (zero variance, zero
/// observed total) are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitStats {
    pub n: usize,
    /// Nash-Sutcliffe efficiency.
    pub nse: Option<f64>,
    /// Kling-Gupta efficiency.
    pub kge: Option<f64>,
    pub r2: Option<f64>,
    /// Percent bias, positive when the simulation underestimates.
    pub pbias: Option<f64>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// `pairs` holds (observed, simulated).
pub fn fit(pairs: &[(f64, f64)]) -> FitStats {
    let n = pairs.len();
    if n == 0 {
        return FitStats::default();
    }
    let nf = n as f64;
    let mean_o = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_s = pairs.iter().map(|p| p.1).sum::<f64>() / nf;

    let mut sse = 0.0;
    let mut sae = 0.0;
    let mut var_o = 0.0;
    let mut var_s = 0.0;
    let mut cov = 0.0;
    let mut sum_o = 0.0;
    let mut sum_diff = 0.0;
    for (o, s) in pairs {
        let err = s - o;
        sse += err * err;
        sae += err.abs();
        var_o += (o - mean_o) * (o - mean_o);
        var_s += (s - mean_s) * (s - mean_s);
        cov += (o - mean_o) * (s - mean_s);
        sum_o += o;
        sum_diff += o - s;
    }

    let nse = if var_o > 0.0 { finite(1.0 - sse / var_o) } else { None };
    let r = if var_o > 0.0 && var_s > 0.0 {
        finite(cov / (var_o.sqrt() * var_s.sqrt()))
    } else {
        None
    };
    let kge = match r {
        Some(r) if mean_o != 0.0 => {
            let alpha = (var_s / var_o).sqrt();
            let beta = mean_s / mean_o;
            finite(1.0 - ((r - 1.0).powi(2) + (alpha - 1.0).powi(2) + (beta - 1.0).powi(2)).sqrt())
        }
        _ => None,
    };
    let pbias = if sum_o != 0.0 { finite(100.0 * sum_diff / sum_o) } else { None };

    FitStats {
        n,
        nse,
        kge,
        r2: r.map(|r| r * r),
        pbias,
        rmse: finite((sse / nf).sqrt()),
        mae: finite(sae / nf),
    }
}
