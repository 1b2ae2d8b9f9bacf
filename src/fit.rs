use anyhow::{anyhow, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Ordinary least-squares fit of `y` against `x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation coefficient.
    pub r_value: f64,
    /// Two-sided p-value for the hypothesis that the slope is zero. NaN
    /// when only two points were fitted (no residual degrees of freedom).
    pub p_value: f64,
    /// Standard error of the slope estimate.
    pub std_err: f64,
}

impl LinearFit {
    /// Resistance as the reciprocal slope of a current-vs-voltage fit.
    /// Unbounded for a flat fit; callers decide what a near-zero slope
    /// means for their sample.
    pub fn resistance_ohms(&self) -> f64 {
        1.0 / self.slope
    }

    pub fn r_squared(&self) -> f64 {
        self.r_value * self.r_value
    }
}

/// Fit a straight line through `(x, y)` pairs.
///
/// Errors on mismatched lengths, fewer than two points, or an `x` column
/// with no variance.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    if x.len() != y.len() {
        return Err(anyhow!(
            "cannot fit {} x values against {} y values",
            x.len(),
            y.len()
        ));
    }
    let n = x.len();
    if n < 2 {
        return Err(anyhow!("a linear fit needs at least two points"));
    }

    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;

    let mut sxx = 0.0_f64;
    let mut sxy = 0.0_f64;
    let mut syy = 0.0_f64;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx == 0.0 {
        return Err(anyhow!("x values are all identical; the slope is undefined"));
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_value = if syy == 0.0 {
        0.0
    } else {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    };

    // Residual sum of squares via the regression identity; clamp the
    // cancellation noise a perfect fit leaves behind.
    let ss_resid = (syy - slope * sxy).max(0.0);

    let (std_err, p_value) = if n > 2 {
        let std_err = (ss_resid / (nf - 2.0) / sxx).sqrt();
        let p_value = if std_err == 0.0 {
            0.0
        } else {
            let t = (slope / std_err).abs();
            let dist = StudentsT::new(0.0, 1.0, nf - 2.0)?;
            2.0 * dist.cdf(-t)
        };
        (std_err, p_value)
    } else {
        // Two points determine the line exactly.
        (0.0, f64::NAN)
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_value,
        p_value,
        std_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_resistance_from_noiseless_data() {
        let r_true = 2.0e6_f64;
        let voltage: Vec<f64> = (0..=10).map(|step| f64::from(step) * 0.1).collect();
        let current: Vec<f64> = voltage.iter().map(|v| v / r_true).collect();

        let fit = linear_fit(&voltage, &current).unwrap();
        assert!((fit.resistance_ohms() - r_true).abs() / r_true < 1e-9);
        assert!(fit.r_value > 0.999_999);
        assert!(fit.p_value < 1e-9);
        assert!(fit.std_err < 1e-12);
    }

    #[test]
    fn recovers_slope_and_intercept() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|x| 3.0 + 2.0 * x).collect();

        let fit = linear_fit(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 3.0).abs() < 1e-12);
        assert!((fit.r_squared() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_slope_gives_negative_resistance() {
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, -0.5, -1.0];
        let fit = linear_fit(&x, &y).unwrap();
        assert!((fit.resistance_ohms() + 2.0).abs() < 1e-12);
        assert!((fit.r_value + 1.0).abs() < 1e-12);
    }

    #[test]
    fn noisy_data_reports_uncertainty() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [0.1, 0.9, 2.2, 2.8, 4.1, 4.9];
        let fit = linear_fit(&x, &y).unwrap();
        assert!(fit.std_err > 0.0);
        assert!(fit.p_value > 0.0 && fit.p_value < 0.05);
        assert!(fit.r_value < 1.0);
    }

    #[test]
    fn two_points_have_no_residual_dof() {
        let fit = linear_fit(&[0.0, 1.0], &[0.0, 2.0]).unwrap();
        assert_eq!(fit.slope, 2.0);
        assert_eq!(fit.std_err, 0.0);
        assert!(fit.p_value.is_nan());
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(linear_fit(&[1.0], &[1.0]).is_err());
        assert!(linear_fit(&[1.0, 2.0], &[1.0]).is_err());
        assert!(linear_fit(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]).is_err());
    }
}
