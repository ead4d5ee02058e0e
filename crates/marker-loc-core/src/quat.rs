use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector4};

/// Weighted mean of unit quaternions via the eigenvector method (Markley).
///
/// Component-wise averaging is not rotation-consistent; instead the weighted
/// outer products `w q q^T` are accumulated into a 4x4 matrix whose dominant
/// eigenvector is the average rotation. Each quaternion is sign-aligned to
/// the first one before accumulation so the double cover (`q` and `-q` being
/// the same rotation) cannot cancel contributions.
///
/// Returns `None` for an empty input or when no weight is positive.
pub fn average_quaternions(
    rotations: &[(UnitQuaternion<f64>, f64)],
) -> Option<UnitQuaternion<f64>> {
    let reference: Vector4<f64> = rotations.first()?.0.coords;

    let mut accumulator = Matrix4::<f64>::zeros();
    let mut weight_sum = 0.0;
    for (q, w) in rotations {
        if *w <= 0.0 {
            continue;
        }
        let mut v = q.coords;
        if v.dot(&reference) < 0.0 {
            v = -v;
        }
        accumulator += *w * v * v.transpose();
        weight_sum += *w;
    }
    if weight_sum <= 0.0 {
        return None;
    }

    let eigen = accumulator.symmetric_eigen();
    let (max_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
    let v = eigen.eigenvectors.column(max_idx).into_owned();

    // `from_quaternion` renormalizes, keeping the unit-norm invariant even
    // after accumulated floating-point drift.
    Some(UnitQuaternion::from_quaternion(Quaternion::from(v)))
}
