#![allow(unused)]

use std::ops::{Range, RangeInclusive};

use ndarray::prelude::*;
use proptest::prelude::*;
use proptest_derive::Arbitrary;

const DIM_RANGE: RangeInclusive<usize> = 1..=12;
const GAP_RANGE: Range<f64> = 0.1..2.0;
const Z_RANGE: Range<f64> = 0.2..2.0;
const RHO_RANGE: Range<f64> = 0.5..5.0;

/// Side of the spectrum the update pushes the extremal eigenvalue to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Side {
    Below,
    Above,
}

impl Side {
    pub fn signed(self, magnitude: f64) -> f64 {
        match self {
            Side::Below => -magnitude,
            Side::Above => magnitude,
        }
    }
}

/// A deflated merge problem `diag(D) + rho * z * z^T`
#[derive(Debug, Clone)]
pub struct Problem {
    pub diag: Array1<f64>,
    pub z: Array1<f64>,
    pub rho: f64,
}

impl Problem {
    pub fn dense(&self) -> Array2<f64> {
        let mut mat = Array2::from_diag(&self.diag);
        let n = self.diag.len();
        for i in 0..n {
            for j in 0..n {
                mat[(i, j)] += self.rho * self.z[i] * self.z[j];
            }
        }
        mat
    }
}

prop_compose! {
    pub fn problem()(dim in DIM_RANGE)
        (start in -10.0..0.0f64,
         gaps in prop::collection::vec(GAP_RANGE, dim),
         z in prop::collection::vec((Z_RANGE, any::<bool>()), dim),
         rho in RHO_RANGE,
         side in any::<Side>()) -> Problem {
        let mut acc = start;
        let diag = gaps
            .iter()
            .map(|gap| {
                acc += gap;
                acc
            })
            .collect();
        let z = z
            .into_iter()
            .map(|(mag, neg)| if neg { -mag } else { mag })
            .collect();
        Problem { diag, z, rho: side.signed(rho) }
    }
}

// Adjacent floats in [2^19, 2^20) are 2^-33 apart, between half and all of the default tolerance
const OFFSET_RANGE: Range<f64> = 5.3e5..1.0e6;

prop_compose! {
    /// A [`problem`] moved to diagonal magnitudes where the float spacing rivals the tolerance
    pub fn shifted_problem()(base in problem(), offset in OFFSET_RANGE) -> Problem {
        Problem {
            diag: base.diag.mapv(|d| d + offset),
            ..base
        }
    }
}
