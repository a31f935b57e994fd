/// Scalar type used throughout the simulation.
pub type Real = f64;

pub type Point = cgmath::Point3<Real>;
pub type Vector = cgmath::Vector3<Real>;
pub type Matrix = cgmath::Matrix3<Real>;

/// Spatial dimensionality. Enters the dρ/dh correction factor and the
/// smoothing-length update.
pub const NUM_DIMS: Real = 3.0;

/// Outer product a ⊗ b as a 3x3 matrix.
#[inline]
pub fn outer_product(a: Vector, b: Vector) -> Matrix {
    Matrix::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Frobenius norm of a 3x3 matrix.
#[inline]
pub fn frobenius_norm(m: &Matrix) -> Real {
    let mut sum = 0.0;
    for c in 0..3 {
        for r in 0..3 {
            sum += m[c][r] * m[c][r];
        }
    }
    sum.sqrt()
}
