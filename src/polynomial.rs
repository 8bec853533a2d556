//! Polynomial feature expansion and per-axis linear models

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest supported polynomial degree
pub const MAX_DEGREE: u32 = 10;

/// All monomials up to a total degree over 2 or 3 input coordinates.
///
/// Ordering: bias first, then by ascending total degree; within a degree the
/// monomials follow combinations-with-replacement of the inputs, so for
/// (z, y, x) at degree 2: z², zy, zx, y², yx, x².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureSpec", into = "FeatureSpec")]
pub struct PolynomialFeatures {
    degree: u32,
    inputs: usize,
    /// Exponent of each input, one entry per output feature
    exponents: Vec<Vec<u32>>,
}

#[derive(Serialize, Deserialize)]
struct FeatureSpec {
    degree: u32,
    inputs: usize,
}

impl TryFrom<FeatureSpec> for PolynomialFeatures {
    type Error = Error;

    fn try_from(spec: FeatureSpec) -> Result<Self> {
        Self::new(spec.degree, spec.inputs)
    }
}

impl From<PolynomialFeatures> for FeatureSpec {
    fn from(p: PolynomialFeatures) -> Self {
        FeatureSpec {
            degree: p.degree,
            inputs: p.inputs,
        }
    }
}

impl PolynomialFeatures {
    pub fn new(degree: u32, inputs: usize) -> Result<Self> {
        if degree == 0 || degree > MAX_DEGREE {
            return Err(Error::invalid(format!(
                "polynomial degree must be between 1 and {}, got {}",
                MAX_DEGREE, degree
            )));
        }
        if !(2..=3).contains(&inputs) {
            return Err(Error::invalid(format!(
                "polynomial features take 2 or 3 inputs, got {}",
                inputs
            )));
        }

        let mut exponents = Vec::with_capacity(feature_count(degree, inputs));
        for total in 0..=degree {
            let mut combo = Vec::with_capacity(total as usize);
            push_combinations(inputs, total as usize, 0, &mut combo, &mut exponents);
        }

        Ok(Self {
            degree,
            inputs,
            exponents,
        })
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn len(&self) -> usize {
        self.exponents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exponents.is_empty()
    }

    /// Expand one input vector into `out` (cleared first)
    pub fn transform_into(&self, input: &[f64], out: &mut Vec<f64>) {
        debug_assert_eq!(input.len(), self.inputs);

        // powers[i][k] = input[i]^k
        let mut powers = [[1.0f64; MAX_DEGREE as usize + 1]; 3];
        for (i, &v) in input.iter().enumerate() {
            for k in 1..=self.degree as usize {
                powers[i][k] = powers[i][k - 1] * v;
            }
        }

        out.clear();
        out.extend(self.exponents.iter().map(|exp| {
            exp.iter()
                .enumerate()
                .map(|(i, &e)| powers[i][e as usize])
                .product::<f64>()
        }));
    }

    pub fn transform(&self, input: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        self.transform_into(input, &mut out);
        out
    }
}

/// C(degree + inputs, inputs)
pub fn feature_count(degree: u32, inputs: usize) -> usize {
    let n = degree as usize + inputs;
    let k = inputs.min(n - inputs);
    (0..k).fold(1usize, |acc, i| acc * (n - i) / (i + 1))
}

fn push_combinations(
    inputs: usize,
    remaining: usize,
    start: usize,
    combo: &mut Vec<usize>,
    out: &mut Vec<Vec<u32>>,
) {
    if remaining == 0 {
        let mut exp = vec![0u32; inputs];
        for &i in combo.iter() {
            exp[i] += 1;
        }
        out.push(exp);
        return;
    }
    for i in start..inputs {
        combo.push(i);
        push_combinations(inputs, remaining - 1, i, combo, out);
        combo.pop();
    }
}

/// Ordinary least-squares model for a single output axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// One coefficient per polynomial feature (the bias feature carries the intercept)
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    #[inline]
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(features)
            .map(|(c, f)| c * f)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count() {
        assert_eq!(feature_count(1, 3), 4);
        assert_eq!(feature_count(2, 3), 10);
        assert_eq!(feature_count(3, 3), 20);
        assert_eq!(feature_count(2, 2), 6);

        for degree in 1..=4 {
            for inputs in 2..=3 {
                let p = PolynomialFeatures::new(degree, inputs).unwrap();
                assert_eq!(p.len(), feature_count(degree, inputs));
            }
        }
    }

    #[test]
    fn test_monomial_order() {
        let p = PolynomialFeatures::new(2, 3).unwrap();
        let f = p.transform(&[2.0, 3.0, 5.0]);
        assert_eq!(
            f,
            vec![1.0, 2.0, 3.0, 5.0, 4.0, 6.0, 10.0, 9.0, 15.0, 25.0]
        );
    }

    #[test]
    fn test_planar_features() {
        let p = PolynomialFeatures::new(2, 2).unwrap();
        assert_eq!(p.transform(&[3.0, 5.0]), vec![1.0, 3.0, 5.0, 9.0, 15.0, 25.0]);
    }

    #[test]
    fn test_invalid_features() {
        assert!(PolynomialFeatures::new(0, 3).is_err());
        assert!(PolynomialFeatures::new(MAX_DEGREE + 1, 3).is_err());
        assert!(PolynomialFeatures::new(2, 4).is_err());
    }

    #[test]
    fn test_serde_rebuilds_exponents() {
        let p = PolynomialFeatures::new(3, 3).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"degree":3,"inputs":3}"#);
        let back: PolynomialFeatures = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_predict() {
        let model = LinearModel::new(vec![10.0, 1.0, 0.0, -2.0]);
        assert_eq!(model.predict(&[1.0, 3.0, 4.0, 5.0]), 3.0);
    }
}
