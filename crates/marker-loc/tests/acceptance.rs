//! End-to-end scenarios against reference values from recorded flight data.

use std::sync::Arc;
use std::time::Duration;

use nalgebra::{Point2, Quaternion, Translation3, UnitQuaternion, Vector3};

use marker_loc::pose::canonical_corners;
use marker_loc::{
    CameraModel, FrameGraph, Iso3, LocalizationPipeline, MarkerMap, MarkerMapEntry,
    MarkerObservation, PipelineParams, Stamp,
};

const NO_WAIT: Duration = Duration::ZERO;

fn camera() -> CameraModel {
    CameraModel {
        fx: 500.0,
        fy: 500.0,
        cx: 320.0,
        cy: 240.0,
        width: 640,
        height: 480,
        distortion: Default::default(),
    }
}

fn flat_entry(id: u32, length: f64, x: f64, y: f64) -> MarkerMapEntry {
    MarkerMapEntry {
        id,
        length,
        pose: Iso3::from_parts(Translation3::new(x, y, 0.0), UnitQuaternion::identity()),
    }
}

/// Project the canonical corners of a marker with the given camera-frame
/// pose into pixel observations.
fn synthesize_observation(
    camera: &CameraModel,
    id: u32,
    pose_cam_marker: &Iso3,
    length: f64,
    stamp: Stamp,
) -> MarkerObservation {
    let mut corners = [Point2::origin(); 4];
    for (px, p) in corners.iter_mut().zip(canonical_corners(length).iter()) {
        *px = camera
            .project(&pose_cam_marker.transform_point(p))
            .expect("corner in front of camera");
    }
    MarkerObservation {
        id,
        corners,
        frame_id: "camera_optical".into(),
        stamp,
    }
}

fn assert_translation(t: &Iso3, expected: [f64; 3], tol: f64) {
    let d = t.translation.vector - Vector3::new(expected[0], expected[1], expected[2]);
    assert!(d.norm() < tol, "translation off by {}", d.norm());
}

/// Compare quaternions component-wise up to the double-cover sign.
fn assert_quaternion(q: &UnitQuaternion<f64>, expected_xyzw: [f64; 4], tol: f64) {
    let c = q.coords;
    let dot = c[0] * expected_xyzw[0]
        + c[1] * expected_xyzw[1]
        + c[2] * expected_xyzw[2]
        + c[3] * expected_xyzw[3];
    let sign = if dot < 0.0 { -1.0 } else { 1.0 };
    for k in 0..4 {
        let got = c[k] * sign;
        assert!(
            (got - expected_xyzw[k]).abs() < tol,
            "quaternion component {k}: {got} vs {}",
            expected_xyzw[k]
        );
    }
}

/// Reference marker pose in the camera frame, reproduced by a frame-graph
/// lookup at the observation stamp.
#[test]
fn camera_to_marker_edge_reproduces_reference_pose() {
    let reference = Iso3::from_parts(
        Translation3::new(0.36706568, 0.29048452, 2.18787602),
        UnitQuaternion::from_quaternion(Quaternion::new(
            0.02019993,
            0.99399741,
            -0.00532003,
            -0.10739095,
        )),
    );
    let stamp = Stamp::from_secs_f64(4.2);

    let graph = FrameGraph::default();
    graph
        .insert("camera_optical", "marker_2", reference, stamp)
        .expect("insert");

    let found = graph
        .lookup("camera_optical", "marker_2", stamp, NO_WAIT)
        .expect("lookup");

    assert_translation(&found, [0.36706568, 0.29048452, 2.18787602], 1e-9);
    assert_quaternion(
        &found.rotation,
        [0.99399741, -0.00532003, -0.10739095, 0.02019993],
        1e-6,
    );
}

/// Authored map layout must be reproduced by map -> map-marker lookups no
/// matter which markers happen to be visible.
#[test]
fn map_marker_frames_match_authored_layout() {
    let map = MarkerMap::from_entries([
        flat_entry(1, 0.33, 0.0, 0.0),
        flat_entry(4, 0.33, 1.0, 1.0),
        flat_entry(12, 0.33, 0.2, 0.5),
    ])
    .expect("map");
    let graph = Arc::new(FrameGraph::default());
    let pipeline =
        LocalizationPipeline::new(camera(), map, PipelineParams::default(), Arc::clone(&graph))
            .expect("pipeline");

    // Only marker 1 is visible; the authored layout must not care.
    let t_cam_map = Iso3::from_parts(
        Translation3::new(0.1, -0.1, 2.0),
        UnitQuaternion::from_scaled_axis(Vector3::x() * 3.1),
    );
    let entry_pose = pipeline.map().get(1).expect("entry").pose;
    let obs = synthesize_observation(
        &camera(),
        1,
        &(t_cam_map * entry_pose),
        0.33,
        Stamp::from_secs_f64(1.0),
    );
    let result = pipeline.process_frame(&[obs]).expect("frame");
    assert_eq!(result.markers.len(), 1);

    for (id, expected) in [
        (1, [0.0, 0.0, 0.0]),
        (4, [1.0, 1.0, 0.0]),
        (12, [0.2, 0.5, 0.0]),
    ] {
        let t = graph
            .lookup(
                "map",
                &format!("map_marker_{id}"),
                Stamp::LATEST,
                NO_WAIT,
            )
            .expect("static lookup");
        assert_translation(&t, expected, 1e-12);
    }
}

/// Four visible mapped markers fused into the reference map pose, with the
/// camera -> map edge queryable afterwards.
#[test]
fn fused_map_pose_matches_reference() {
    let cam = camera();
    let map = MarkerMap::from_entries([
        flat_entry(1, 0.33, 0.0, 0.0),
        flat_entry(2, 0.33, 0.5, 0.0),
        flat_entry(3, 0.1, 0.5, 0.25),
        flat_entry(4, 0.33, 1.0, 1.0),
    ])
    .expect("map");
    let graph = Arc::new(FrameGraph::default());
    let pipeline = LocalizationPipeline::new(
        cam.clone(),
        map,
        PipelineParams::default(),
        Arc::clone(&graph),
    )
    .expect("pipeline");

    let t_cam_map = Iso3::from_parts(
        Translation3::new(-0.62916775, 0.29382265, 2.12641343),
        UnitQuaternion::from_quaternion(Quaternion::new(
            0.04821436,
            -0.99838379,
            -0.00000521,
            -0.03008611,
        )),
    );
    let stamp = Stamp::from_secs_f64(2.0);

    let observations: Vec<MarkerObservation> = pipeline
        .map()
        .iter()
        .map(|entry| {
            synthesize_observation(
                &cam,
                entry.id,
                &(t_cam_map * entry.pose),
                entry.length,
                stamp,
            )
        })
        .collect();

    let result = pipeline.process_frame(&observations).expect("frame");
    assert_eq!(result.markers.len(), 4);

    let fused = result.fused.expect("fused pose");
    assert_translation(&fused.pose, [-0.62916775, 0.29382265, 2.12641343], 1e-6);
    assert_quaternion(
        &fused.pose.rotation,
        [-0.99838379, -0.00000521, -0.03008611, 0.04821436],
        1e-6,
    );
    assert_eq!(fused.parent_frame, "camera_optical");
    assert_eq!(fused.child_frame, "map");
    assert!((fused.pose.rotation.into_inner().norm() - 1.0).abs() < 1e-6);

    // Consistent candidates: the reported spread must be tiny.
    assert!(fused.covariance.norm() < 1e-9);

    // The fused edge is queryable at the frame stamp.
    let t = graph
        .lookup("camera_optical", "map", stamp, NO_WAIT)
        .expect("camera -> map");
    assert_translation(&t, [-0.62916775, 0.29382265, 2.12641343], 1e-6);

    // Per-marker dynamic edges reproduce the per-marker estimates.
    let marker_2 = graph
        .lookup("camera_optical", "marker_2", stamp, NO_WAIT)
        .expect("camera -> marker_2");
    let expected_2 = t_cam_map * pipeline.map().get(2).expect("entry 2").pose;
    assert!(
        (marker_2.translation.vector - expected_2.translation.vector).norm() < 1e-5,
        "marker 2 edge off"
    );
    assert!(marker_2.rotation.angle_to(&expected_2.rotation) < 1e-5);

    // Composing camera -> map -> map_marker_2 agrees with the direct edge.
    let composed = graph
        .lookup("camera_optical", "map_marker_2", stamp, NO_WAIT)
        .expect("composed lookup");
    assert!(
        (composed.translation.vector - expected_2.translation.vector).norm() < 1e-5,
        "composed path disagrees with direct edge"
    );
}

/// Full round trip with a distorted camera: synthesized observations come
/// back as poses and reprojected corners within tight tolerances.
#[test]
fn pipeline_round_trip_with_distortion() {
    let cam = CameraModel {
        distortion: marker_loc::Distortion {
            k1: -0.12,
            k2: 0.02,
            p1: 0.0008,
            p2: -0.001,
            k3: 0.0,
        },
        ..camera()
    };
    let map = MarkerMap::from_entries([
        flat_entry(7, 0.25, 0.0, 0.0),
        flat_entry(8, 0.25, 0.6, 0.1),
    ])
    .expect("map");
    let graph = Arc::new(FrameGraph::default());
    let pipeline = LocalizationPipeline::new(
        cam.clone(),
        map,
        PipelineParams::default(),
        Arc::clone(&graph),
    )
    .expect("pipeline");

    let t_cam_map = Iso3::from_parts(
        Translation3::new(-0.2, 0.15, 1.9),
        UnitQuaternion::from_scaled_axis(Vector3::new(3.0, 0.1, -0.05)),
    );
    let stamp = Stamp::from_secs_f64(5.0);

    let observations: Vec<MarkerObservation> = pipeline
        .map()
        .iter()
        .map(|entry| {
            synthesize_observation(
                &cam,
                entry.id,
                &(t_cam_map * entry.pose),
                entry.length,
                stamp,
            )
        })
        .collect();

    let result = pipeline.process_frame(&observations).expect("frame");
    assert_eq!(result.markers.len(), 2);

    for (marker, obs) in result.markers.iter().zip(observations.iter()) {
        // Reprojected corners must sit on the synthesized pixels.
        for (reproj, raw) in marker.corners.iter().zip(obs.corners.iter()) {
            assert!(
                (reproj - raw).norm() < 1e-3,
                "corner moved {} px",
                (reproj - raw).norm()
            );
        }
    }

    let fused = result.fused.expect("fused");
    assert!(
        (fused.pose.translation.vector - t_cam_map.translation.vector).norm() < 1e-4
    );
    assert!(fused.pose.rotation.angle_to(&t_cam_map.rotation) < 1e-4);

    // The covariance is symmetric positive semi-definite.
    let cov = fused.covariance;
    assert!((cov - cov.transpose()).norm() < 1e-12);
    for ev in cov.symmetric_eigen().eigenvalues.iter() {
        assert!(*ev >= -1e-12, "negative eigenvalue {ev}");
    }
}

/// A frame with no mapped markers produces no fused pose, and the previous
/// fused edge is not silently re-stamped.
#[test]
fn no_fusion_frame_does_not_refresh_the_map_edge() {
    let cam = camera();
    let map = MarkerMap::from_entries([flat_entry(1, 0.33, 0.0, 0.0)]).expect("map");
    let graph = Arc::new(FrameGraph::default());
    let pipeline = LocalizationPipeline::new(
        cam.clone(),
        map,
        PipelineParams {
            default_marker_length: Some(0.2),
            ..PipelineParams::default()
        },
        Arc::clone(&graph),
    )
    .expect("pipeline");

    let t_cam_map = Iso3::from_parts(
        Translation3::new(0.0, 0.0, 2.0),
        UnitQuaternion::from_scaled_axis(Vector3::x() * 3.1),
    );
    let first_stamp = Stamp::from_secs_f64(1.0);
    let obs = synthesize_observation(
        &cam,
        1,
        &(t_cam_map * pipeline.map().get(1).expect("entry").pose),
        0.33,
        first_stamp,
    );
    let first = pipeline.process_frame(&[obs]).expect("frame");
    assert!(first.fused.is_some());

    // Second frame only shows an unmapped marker: estimated and recorded,
    // but nothing to fuse.
    let second_stamp = Stamp::from_secs_f64(2.0);
    let unmapped_pose = Iso3::from_parts(
        Translation3::new(0.1, 0.0, 1.5),
        UnitQuaternion::from_scaled_axis(Vector3::x() * 3.1),
    );
    let unmapped = synthesize_observation(&cam, 42, &unmapped_pose, 0.2, second_stamp);
    let second = pipeline.process_frame(&[unmapped]).expect("frame");

    assert!(second.fused.is_none());
    assert_eq!(second.markers.len(), 1);

    // The camera -> map edge still carries only the first frame's sample.
    let err = graph
        .lookup(
            "camera_optical",
            "map",
            second_stamp.advanced(Duration::from_secs(60)),
            NO_WAIT,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        marker_loc::GraphError::TransformUnavailable { .. }
    ));
    let stale = graph
        .lookup("camera_optical", "map", Stamp::LATEST, NO_WAIT)
        .expect("latest fused sample");
    assert!((stale.translation.z - 2.0).abs() < 1e-3);
}
