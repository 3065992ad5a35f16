use std::{io::Read, path::Path};

use liealg::{SE3, SO3};
use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};

use crate::model::inertia_matrix;

pub(crate) fn read_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

pub(crate) fn xyz_rpy_to_isometry(xyz: [f64; 3], rpy: [f64; 3]) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

pub(crate) fn pose_to_isometry(pose: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = pose.rpy;
    xyz_rpy_to_isometry(pose.xyz.0, [rpy[0], rpy[1], rpy[2]])
}

/// Same pose in the `liealg` representation used by the spatial inertia routines.
pub(crate) fn isometry_to_se3(iso: &Isometry3<f64>) -> SE3<f64> {
    let (roll, pitch, yaw) = iso.rotation.euler_angles();
    let t = iso.translation.vector;
    SE3::new(&SO3::from_euler_angles(roll, pitch, yaw), [t.x, t.y, t.z])
}

pub(crate) fn urdf_inertia(i: &urdf_rs::Inertia) -> Matrix3<f64> {
    inertia_matrix(i.ixx, i.ixy, i.ixz, i.iyy, i.iyz, i.izz)
}

/// Normalized axis, `None` for a zero vector.
pub(crate) fn unit_axis(xyz: [f64; 3]) -> Option<Vector3<f64>> {
    let v = Vector3::new(xyz[0], xyz[1], xyz[2]);
    let norm = v.norm();
    if norm > f64::EPSILON {
        Some(v / norm)
    } else {
        None
    }
}

/// Parse up to `N` whitespace separated floats. Missing trailing values are zero.
pub(crate) fn parse_floats<const N: usize>(s: &str) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    let mut count = 0;
    for token in s.split_whitespace() {
        if count == N {
            return None;
        }
        out[count] = token.parse().ok()?;
        count += 1;
    }
    Some(out)
}
