use liealg::{Group, SE3};
use nalgebra::{Isometry3, Matrix3, Matrix6};

use crate::model::{Inertial, RobotModel};
use crate::utils::isometry_to_se3;

/// Spatial inertia given in frame `b` (posed at `inertia_frame` in frame `a`), expressed
/// in frame `a`. Twist ordering is `[angular; linear]`.
pub(crate) fn to_local_spatial_inertial(
    inertia_frame: &SE3<f64>,
    inertia: &Matrix3<f64>,
    mass: f64,
) -> Matrix6<f64> {
    let mut i_b = Matrix6::from_diagonal_element(mass);
    i_b.fixed_view_mut::<3, 3>(0, 0).copy_from(inertia);
    change_frame(&i_b, inertia_frame)
}

/// Re-express a spatial inertia from a frame posed at `frame` into the outer frame.
pub(crate) fn change_frame(spatial: &Matrix6<f64>, frame: &SE3<f64>) -> Matrix6<f64> {
    let b_t_a = frame.inv();
    let adj_b_t_a = Matrix6::from_column_slice(b_t_a.adjoint().as_slice());
    adj_b_t_a.transpose() * spatial * adj_b_t_a
}

/// Spatial inertia of one body about its link frame.
pub(crate) fn link_spatial_inertial(inertial: &Inertial) -> Matrix6<f64> {
    to_local_spatial_inertial(
        &isometry_to_se3(&inertial.origin),
        &inertial.inertia_or_zero(),
        inertial.mass,
    )
}

/// Composite spatial inertia of the tree below and including `link`, in `link`'s frame,
/// with the total mass that went into it.
///
/// Massless bodies add nothing. Links are visited with an explicit work stack and each
/// contribution is independent of the others, so the sum does not depend on sibling order.
pub(crate) fn subtree_spatial_inertial(model: &RobotModel, link: &str) -> (Matrix6<f64>, f64) {
    let mut total = Matrix6::zeros();
    let mut mass = 0.0;
    let mut stack: Vec<(&str, Isometry3<f64>)> = vec![(link, Isometry3::identity())];

    while let Some((name, pose)) = stack.pop() {
        let Some(current) = model.links.get(name) else {
            continue;
        };
        if let Some(inertial) = current.inertial.as_ref().filter(|i| !i.is_massless()) {
            total += change_frame(&link_spatial_inertial(inertial), &isometry_to_se3(&pose));
            mass += inertial.mass;
        }
        for child in &current.children {
            let Some(joint) = model
                .link(child)
                .ok()
                .and_then(|c| c.parent_joint.as_ref())
                .and_then(|j| model.joints.get(j))
            else {
                continue;
            };
            stack.push((child.as_str(), pose * joint.origin));
        }
    }
    (total, mass)
}
