//! Closed-form initialization and iterative refinement for planar pose.
//!
//! The homography over the marker plane is decomposed into an initial
//! rotation/translation, then refined with the object-space orthogonal
//! iteration of Lu, Hager & Mjolsness. Planar targets admit a second local
//! minimum (Schweighofer & Pinz); the alternative basin is reached by
//! reflecting the rotation about the viewing direction and refining again.

use nalgebra::{Matrix3, Point3, Vector3};

/// Project a matrix onto SO(3) via SVD, fixing the determinant sign.
fn project_to_so3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Some(r)
}

/// Decompose a marker-plane-to-normalized-image homography into a rigid pose.
///
/// For marker-local points (x, y, 0) the homography columns are the first
/// two rotation columns and the translation, up to a common scale. The sign
/// is fixed so the marker sits in front of the camera (positive depth).
pub(crate) fn pose_from_homography(h: &Matrix3<f64>) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let g1 = h.column(0).into_owned();
    let g2 = h.column(1).into_owned();
    let g3 = h.column(2).into_owned();

    let scale = 0.5 * (g1.norm() + g2.norm());
    if scale < 1e-12 {
        return None;
    }
    let mut r1 = g1 / scale;
    let mut r2 = g2 / scale;
    let mut t = g3 / scale;
    if t.z < 0.0 {
        r1.neg_mut();
        r2.neg_mut();
        t.neg_mut();
    }
    let r3 = r1.cross(&r2);
    let r = project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some((r, t))
}

/// Object-space error of a pose against the line-of-sight operators.
fn object_space_error(
    los_ops: &[Matrix3<f64>; 4],
    model: &[Point3<f64>; 4],
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
) -> f64 {
    let mut err = 0.0;
    for (f, p) in los_ops.iter().zip(model.iter()) {
        let pc = r * p.coords + t;
        err += (pc - f * pc).norm_squared();
    }
    err
}

/// Orthogonal iteration (Lu, Hager & Mjolsness 2000) from an initial pose.
///
/// `rays` are un-normalized image rays `(x, y, 1)` in undistorted normalized
/// coordinates, `model` the marker-local 3D corners. Returns the refined
/// rotation, translation and final object-space error.
pub(crate) fn orthogonal_iteration(
    rays: &[Vector3<f64>; 4],
    model: &[Point3<f64>; 4],
    r_init: &Matrix3<f64>,
    t_init: &Vector3<f64>,
    iterations: u32,
) -> (Matrix3<f64>, Vector3<f64>, f64) {
    // Line-of-sight projection operators F_i = v v^T / (v^T v).
    let mut los_ops = [Matrix3::<f64>::zeros(); 4];
    for (f, v) in los_ops.iter_mut().zip(rays.iter()) {
        *f = v * v.transpose() / v.norm_squared();
    }

    let centroid: Vector3<f64> =
        model.iter().map(|p| p.coords).sum::<Vector3<f64>>() / model.len() as f64;
    let mut spread = [Vector3::<f64>::zeros(); 4];
    for (s, p) in spread.iter_mut().zip(model.iter()) {
        *s = p.coords - centroid;
    }

    let los_mean: Matrix3<f64> =
        los_ops.iter().sum::<Matrix3<f64>>() / los_ops.len() as f64;
    let t_solve = (Matrix3::identity() - los_mean)
        .try_inverse()
        .unwrap_or_else(Matrix3::identity);

    let mut r = *r_init;
    let mut t = *t_init;

    for _ in 0..iterations {
        // Optimal translation for the current rotation.
        let mut acc = Vector3::<f64>::zeros();
        for (f, p) in los_ops.iter().zip(model.iter()) {
            let rp = r * p.coords;
            acc += f * rp - rp;
        }
        t = t_solve * (acc / model.len() as f64);

        // Optimal rotation for the current line-of-sight projections.
        let mut q = [Vector3::<f64>::zeros(); 4];
        let mut q_mean = Vector3::<f64>::zeros();
        for i in 0..4 {
            q[i] = los_ops[i] * (r * model[i].coords + t);
            q_mean += q[i];
        }
        q_mean /= 4.0;

        let mut cross_cov = Matrix3::<f64>::zeros();
        for i in 0..4 {
            cross_cov += (q[i] - q_mean) * spread[i].transpose();
        }
        if let Some(next) = project_to_so3(&cross_cov) {
            r = next;
        }
    }

    let err = object_space_error(&los_ops, model, &r, &t);
    (r, t, err)
}

/// Starting rotation of the second pose branch, if it is distinct.
///
/// The alternative local minimum for a planar target sits near a reflection
/// of the rotation about the axis through the camera and the marker center.
/// Returns `None` when the reflected rotation is within `min_angle_rad` of
/// the original (the two branches have merged) or the translation is
/// degenerate.
pub(crate) fn alternate_rotation(
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    min_angle_rad: f64,
) -> Option<Matrix3<f64>> {
    let norm = t.norm();
    if norm < 1e-12 {
        return None;
    }
    let n = t / norm;
    let reflect = 2.0 * n * n.transpose() - Matrix3::identity();
    let r2 = reflect * r;

    let rel = r.transpose() * r2;
    let angle = ((rel.trace() - 1.0) * 0.5).clamp(-1.0, 1.0).acos();
    (angle >= min_angle_rad).then_some(r2)
}
