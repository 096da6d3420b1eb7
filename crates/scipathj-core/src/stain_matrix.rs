//! 3x3 stain-matrix inversion, precomputed once per pipeline run.

use scipathj_types::ColorDeconvolutionSettings;

use crate::error::CoreError;

/// A stain matrix together with its precomputed inverse, so the per-pixel
/// deconvolution path is a fixed six-multiply-add, three-log computation.
#[derive(Debug, Clone, Copy)]
pub struct StainMatrix {
    inverse: [[f64; 3]; 3],
}

/// Condition numbers above this are treated as numerically singular.
const MAX_CONDITION_NUMBER: f64 = 1e12;

impl StainMatrix {
    /// Builds the matrix, deriving a zero background row as the
    /// normalized cross product of the first two rows, then inverts it.
    ///
    /// # Errors
    /// Returns [`CoreError::StainMatrixSingular`] if the matrix's
    /// (L1-norm) condition number exceeds `1e12`.
    pub fn from_settings(settings: &ColorDeconvolutionSettings) -> Result<Self, CoreError> {
        let mut m = settings.stain_matrix;
        let bg_is_zero = m[2].iter().all(|v| v.abs() < f64::EPSILON);
        if bg_is_zero {
            m[2] = normalize(cross(m[0], m[1]));
        }

        let det = determinant(m);
        let condition = condition_number(m, det);
        if !condition.is_finite() || condition > MAX_CONDITION_NUMBER {
            return Err(CoreError::StainMatrixSingular {
                condition: if condition.is_finite() {
                    condition
                } else {
                    f64::MAX
                },
            });
        }

        Ok(Self {
            inverse: transpose(invert(m, det)),
        })
    }

    /// Applies the precomputed inverse to an optical-density 3-vector,
    /// returning (hematoxylin, eosin, background) intensities.
    ///
    /// Rows of the stain matrix are per-stain RGB response vectors, so the
    /// forward model is `od = Mᵀ · stain`; recovery is therefore `M⁻ᵀ · od`,
    /// not `M⁻¹ · od`. `inverse` already holds `M⁻ᵀ` (see
    /// [`Self::from_settings`]).
    #[must_use]
    pub fn apply(&self, od: [f64; 3]) -> [f64; 3] {
        let inv = &self.inverse;
        [
            inv[0][0].mul_add(od[0], inv[0][1].mul_add(od[1], inv[0][2] * od[2])),
            inv[1][0].mul_add(od[0], inv[1][1].mul_add(od[1], inv[1][2] * od[2])),
            inv[2][0].mul_add(od[0], inv[2][1].mul_add(od[1], inv[2][2] * od[2])),
        ]
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm < f64::EPSILON {
        return v;
    }
    [v[0] / norm, v[1] / norm, v[2] / norm]
}

fn determinant(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn invert(m: [[f64; 3]; 3], det: f64) -> [[f64; 3]; 3] {
    let inv_det = 1.0 / det;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ]
}

fn transpose(m: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

fn l1_norm(m: [[f64; 3]; 3]) -> f64 {
    (0..3)
        .map(|col| (0..3).map(|row| m[row][col].abs()).sum::<f64>())
        .fold(0.0_f64, f64::max)
}

/// Cheap 1-norm condition-number estimate: `||M||_1 * ||M^-1||_1`.
/// Infinite if the matrix is exactly singular.
fn condition_number(m: [[f64; 3]; 3], det: f64) -> f64 {
    if det.abs() < f64::EPSILON {
        return f64::INFINITY;
    }
    l1_norm(m) * l1_norm(invert(m, det))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ruifrok_default_inverts_cleanly() {
        let settings = ColorDeconvolutionSettings::default();
        let matrix = StainMatrix::from_settings(&settings).unwrap();
        // apply(od) should round-trip through the forward matrix.
        let mut m = settings.stain_matrix;
        m[2] = normalize(cross(m[0], m[1]));
        let stain = [0.3, 0.5, 0.01];
        let od = [
            m[0][0].mul_add(stain[0], m[1][0].mul_add(stain[1], m[2][0] * stain[2])),
            m[0][1].mul_add(stain[0], m[1][1].mul_add(stain[1], m[2][1] * stain[2])),
            m[0][2].mul_add(stain[0], m[1][2].mul_add(stain[1], m[2][2] * stain[2])),
        ];
        let recovered = matrix.apply(od);
        for i in 0..3 {
            assert!((recovered[i] - stain[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let settings = ColorDeconvolutionSettings {
            stain_matrix: [[1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        };
        let err = StainMatrix::from_settings(&settings).unwrap_err();
        assert!(matches!(err, CoreError::StainMatrixSingular { .. }));
    }

    #[test]
    fn identity_like_matrix_has_low_condition_number() {
        let settings = ColorDeconvolutionSettings {
            stain_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        };
        assert!(StainMatrix::from_settings(&settings).is_ok());
    }
}
