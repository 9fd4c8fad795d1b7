//! Geometry helpers shared by the CPU kernels and the CPU-side bookkeeping: bounds, the volume
//! similarity transform, affine row packing and ray/primitive intersection.

use cgmath::{ElementWise, EuclideanSpace, InnerSpace, Matrix, Matrix4, Point3, Rad, SquareMatrix, Vector3, Vector4};

use crate::error::{Error, Result};

pub type Vec3 = Vector3<f32>;
pub type Mat4 = Matrix4<f32>;

/// Affine 3x4 matrix stored as three rows (xyz = linear part, w = translation).
pub type Rows3x4 = [[f32; 4]; 3];

pub const IDENTITY_ROWS: Rows3x4 = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self { min: Vec3::new(f32::MAX, f32::MAX, f32::MAX), max: Vec3::new(-f32::MAX, -f32::MAX, -f32::MAX) }
    }

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        let mut b = Self::empty();
        for p in points {
            b.grow_point(p);
        }
        b
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow_point(&mut self, p: Vec3) {
        self.min = Vec3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z));
        self.max = Vec3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z));
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut b = *self;
        if !other.is_empty() {
            b.grow_point(other.min);
            b.grow_point(other.max);
        }
        b
    }

    pub fn expanded(&self, margin: f32) -> Aabb {
        let m = Vec3::new(margin, margin, margin);
        Aabb { min: self.min - m, max: self.max + m }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.z >= self.min.z
            && p.x <= self.max.x && p.y <= self.max.y && p.z <= self.max.z
    }

    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounds of the eight transformed corners.
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(self.corners().iter().map(|&c| transform_point(m, c)))
    }
}

/// Similarity transform (uniform scale + translation) mapping the lattice cube [-1, 1]^3 onto
/// world space. Fixed once the static scene is known.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeTransform {
    pub center: Vec3,
    pub radius: f32,
}

impl VolumeTransform {
    /// Volume enclosing `bounds`: radius is the largest half-extent times `padding`.
    pub fn enclosing(bounds: &Aabb, padding: f32) -> Result<Self> {
        if bounds.is_empty() {
            return Err(Error::Scene("cannot place the SDF volume around empty bounds".to_string()));
        }
        let ext = bounds.half_extents();
        let radius = ext.x.max(ext.y).max(ext.z) * padding;
        if !(radius > 0.0) {
            return Err(Error::Scene("static scene bounds are degenerate".to_string()));
        }
        Ok(Self { center: bounds.center(), radius })
    }

    pub fn world(&self) -> Mat4 {
        Mat4::from_translation(self.center) * Mat4::from_scale(self.radius)
    }

    pub fn world_inverse(&self) -> Mat4 {
        Mat4::from_scale(1.0 / self.radius) * Mat4::from_translation(-self.center)
    }

    pub fn to_local(&self, p: Vec3) -> Vec3 {
        (p - self.center) / self.radius
    }

    pub fn to_world(&self, p: Vec3) -> Vec3 {
        self.center + p * self.radius
    }

    pub fn world_bounds(&self) -> Aabb {
        let r = Vec3::new(self.radius, self.radius, self.radius);
        Aabb::new(self.center - r, self.center + r)
    }
}

pub fn transform_point(m: &Mat4, p: Vec3) -> Vec3 {
    (m * Vector4::new(p.x, p.y, p.z, 1.0)).truncate()
}

pub fn transform_vector(m: &Mat4, v: Vec3) -> Vec3 {
    (m * Vector4::new(v.x, v.y, v.z, 0.0)).truncate()
}

/// Rows of the upper 3x4 block of an affine matrix.
pub fn to_rows(m: &Mat4) -> Rows3x4 {
    let r = |i: usize| {
        let row = m.row(i);
        [row.x, row.y, row.z, row.w]
    };
    [r(0), r(1), r(2)]
}

pub fn rows_point(rows: &Rows3x4, p: Vec3) -> Vec3 {
    let d = |r: &[f32; 4]| r[0] * p.x + r[1] * p.y + r[2] * p.z + r[3];
    Vec3::new(d(&rows[0]), d(&rows[1]), d(&rows[2]))
}

pub fn rows_vector(rows: &Rows3x4, v: Vec3) -> Vec3 {
    let d = |r: &[f32; 4]| r[0] * v.x + r[1] * v.y + r[2] * v.z;
    Vec3::new(d(&rows[0]), d(&rows[1]), d(&rows[2]))
}

/// Length of the first basis vector; equals the uniform scale of a similarity transform.
pub fn rows_scale(rows: &Rows3x4) -> f32 {
    Vec3::new(rows[0][0], rows[1][0], rows[2][0]).magnitude()
}

pub fn to_array(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}

/// Matrix from 16 column-major floats (the host view layout).
pub fn from_cols_slice(m: &[f32; 16]) -> Mat4 {
    Mat4::new(
        m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8], m[9], m[10], m[11], m[12], m[13], m[14], m[15],
    )
}

pub fn to_cols_slice(m: &Mat4) -> [f32; 16] {
    let a = to_array(m);
    let mut out = [0.0; 16];
    for (c, col) in a.iter().enumerate() {
        out[c * 4..c * 4 + 4].copy_from_slice(col);
    }
    out
}

/// Right-handed look-at + perspective with NDC depth in [0, 1].
pub fn view_projection(eye: Vec3, target: Vec3, fovy_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    #[rustfmt::skip]
    let gl_to_wgpu = Mat4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.5, 0.0,
        0.0, 0.0, 0.5, 1.0,
    );
    let view = Mat4::look_at_rh(Point3::from_vec(eye), Point3::from_vec(target), Vec3::unit_y());
    gl_to_wgpu * cgmath::perspective(Rad(fovy_radians), aspect, near, far) * view
}

/// Inverse transpose used to carry normals; falls back to identity for singular input.
pub fn inverse_transpose(m: &Mat4) -> Mat4 {
    m.invert().map(|i| i.transpose()).unwrap_or_else(Mat4::identity)
}

pub fn inverse_or_identity(m: &Mat4) -> Mat4 {
    m.invert().unwrap_or_else(Mat4::identity)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    /// Ray arrived against the counter-clockwise (outward) side.
    pub front_face: bool,
}

/// Möller-Trumbore without culling. `u`/`v` weight the second/third vertex.
pub fn intersect_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3, t_max: f32) -> Option<TriangleHit> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t <= 0.0 || t >= t_max {
        return None;
    }
    Some(TriangleHit { t, u, v, front_face: det > 0.0 })
}

/// Slab test. Returns the entry distance if the box is hit before `t_max`.
pub fn intersect_aabb(origin: Vec3, inv_dir: Vec3, min: Vec3, max: Vec3, t_max: f32) -> Option<f32> {
    if min.x > max.x {
        return None;
    }
    let t0 = (min - origin).mul_element_wise(inv_dir);
    let t1 = (max - origin).mul_element_wise(inv_dir);
    let near = t0.x.min(t1.x).max(t0.y.min(t1.y)).max(t0.z.min(t1.z)).max(0.0);
    let far = t0.x.max(t1.x).min(t0.y.max(t1.y)).min(t0.z.max(t1.z)).min(t_max);
    if near <= far {
        Some(near)
    } else {
        None
    }
}

pub fn safe_inverse(d: Vec3) -> Vec3 {
    let inv = |x: f32| if x.abs() < 1e-20 { 1e20f32.copysign(x) } else { 1.0 / x };
    Vec3::new(inv(d.x), inv(d.y), inv(d.z))
}

/// Point `index` of a spherical Fibonacci set of `count` unit directions.
pub fn fibonacci_direction(index: u32, count: u32) -> Vec3 {
    let n = count.max(1) as f32;
    let i = (index % count.max(1)) as f32;
    let golden_angle = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    let y = 1.0 - 2.0 * (i + 0.5) / n;
    let r = (1.0 - y * y).max(0.0).sqrt();
    let phi = golden_angle * i;
    Vec3::new(phi.cos() * r, y, phi.sin() * r)
}

pub fn lerp3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
}
