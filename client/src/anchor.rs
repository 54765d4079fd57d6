//! Anchor-based coordinate reconciliation.
//!
//! DESIGN
//! ======
//! Every client observes the same three physical anchor markers, but each
//! device reports them in its own local coordinate system. The shared frame
//! is defined entirely by the markers: origin at the first anchor, X axis
//! toward the second, Z axis normal to the anchor plane, Y completing the
//! right-handed basis. Two devices that locate the markers consistently
//! therefore agree on every shared-space coordinate without exchanging any
//! calibration data.
//!
//! Positions in commands and avatar updates are always shared-space; each
//! client converts at the render/input boundary with [`CoordinateFrame`].

use glam::{Affine3A, Mat3, Vec3};

/// Squared-length floor below which anchor geometry is considered
/// degenerate. Anchors are meter-scale marker positions.
pub const ANCHOR_EPS: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DegenerateAnchors {
    #[error("anchor points coincide")]
    Coincident,
    #[error("anchor points are collinear")]
    Collinear,
}

/// Rigid mapping between one device's local space and the shared mural
/// space. Pure rotation plus translation, so round-tripping a point is
/// lossless up to float error.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateFrame {
    shared_to_local: Affine3A,
    local_to_shared: Affine3A,
}

impl CoordinateFrame {
    /// Build the frame from the three anchor positions as observed in local
    /// space, in their agreed order.
    ///
    /// # Errors
    ///
    /// [`DegenerateAnchors`] when the anchors do not span a plane.
    pub fn from_anchors(a: Vec3, b: Vec3, c: Vec3) -> Result<Self, DegenerateAnchors> {
        let ab = b - a;
        let ac = c - a;
        if ab.length_squared() < ANCHOR_EPS || ac.length_squared() < ANCHOR_EPS {
            return Err(DegenerateAnchors::Coincident);
        }

        let x = ab.normalize();
        let normal = ab.cross(ac);
        if normal.length_squared() < ANCHOR_EPS {
            return Err(DegenerateAnchors::Collinear);
        }
        let z = normal.normalize();
        let y = z.cross(x);

        // Columns are the shared axes expressed in local coordinates, so
        // this affine maps shared points into local space.
        let shared_to_local = Affine3A::from_mat3_translation(Mat3::from_cols(x, y, z), a);
        Ok(Self { shared_to_local, local_to_shared: shared_to_local.inverse() })
    }

    #[must_use]
    pub fn to_shared(&self, local: Vec3) -> Vec3 {
        self.local_to_shared.transform_point3(local)
    }

    #[must_use]
    pub fn to_local(&self, shared: Vec3) -> Vec3 {
        self.shared_to_local.transform_point3(shared)
    }

    /// Array-form conversion for wire positions.
    #[must_use]
    pub fn to_shared_array(&self, local: [f32; 3]) -> [f32; 3] {
        self.to_shared(Vec3::from_array(local)).to_array()
    }

    /// Array-form conversion for wire positions.
    #[must_use]
    pub fn to_local_array(&self, shared: [f32; 3]) -> [f32; 3] {
        self.to_local(Vec3::from_array(shared)).to_array()
    }
}

#[cfg(test)]
#[path = "anchor_test.rs"]
mod tests;
