//! Procedural textured primitives used by tests, benchmarks and demos

use std::f32::consts::PI;

use crate::mesh::TexturedMesh;
use crate::point::*;

/// An axis-aligned unit cube spanning `[0, 1]^3`: 8 vertices, 12
/// outward-wound triangles and one texcoord per vertex (no seams).
pub fn unit_cube() -> TexturedMesh {
    let positions = vec![
        Point3f::new(0.0, 0.0, 0.0),
        Point3f::new(1.0, 0.0, 0.0),
        Point3f::new(1.0, 1.0, 0.0),
        Point3f::new(0.0, 1.0, 0.0),
        Point3f::new(0.0, 0.0, 1.0),
        Point3f::new(1.0, 0.0, 1.0),
        Point3f::new(1.0, 1.0, 1.0),
        Point3f::new(0.0, 1.0, 1.0),
    ];
    let tex_coords = positions
        .iter()
        .map(|p| Point2f::new(0.5 * p.x + 0.25 * p.z, 0.5 * p.y + 0.25 * p.z))
        .collect();
    let faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [3, 7, 6],
        [3, 6, 2],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    TexturedMesh {
        face_tex_coords: faces.clone(),
        positions,
        faces,
        tex_coords,
    }
}

/// A UV sphere laid out like a rendering engine's sphere geometry, but with
/// shared positions: one vertex per pole and `width_segments` per ring.
///
/// Texcoords form a `(width_segments + 1) x (height_segments + 1)` grid, so
/// the meridian at `u = 0 / u = 1` is a UV seam and each pole carries one
/// texcoord per adjacent triangle.
pub fn uv_sphere(radius: f32, width_segments: usize, height_segments: usize) -> TexturedMesh {
    let w = width_segments.max(3);
    let h = height_segments.max(2);
    let last = 1 + (h - 1) * w;

    let mut positions = Vec::with_capacity(last + 1);
    positions.push(Point3f::new(0.0, radius, 0.0));
    for i in 1..h {
        let theta = i as f32 / h as f32 * PI;
        for j in 0..w {
            let phi = j as f32 / w as f32 * 2.0 * PI;
            positions.push(Point3f::new(
                -radius * phi.cos() * theta.sin(),
                radius * theta.cos(),
                radius * phi.sin() * theta.sin(),
            ));
        }
    }
    positions.push(Point3f::new(0.0, -radius, 0.0));

    let mut tex_coords = Vec::with_capacity((w + 1) * (h + 1));
    for i in 0..=h {
        for j in 0..=w {
            tex_coords.push(Point2f::new(j as f32 / w as f32, 1.0 - i as f32 / h as f32));
        }
    }

    let vertex = |i: usize, j: usize| -> usize {
        if i == 0 {
            0
        } else if i == h {
            last
        } else {
            1 + (i - 1) * w + (j % w)
        }
    };
    let tex = |i: usize, j: usize| -> usize { i * (w + 1) + j };

    let mut faces = Vec::with_capacity(2 * w * (h - 1));
    let mut face_tex_coords = Vec::with_capacity(2 * w * (h - 1));
    for i in 0..h {
        for j in 0..w {
            let a = (i, j + 1);
            let b = (i, j);
            let c = (i + 1, j);
            let d = (i + 1, j + 1);
            let mut push = |corners: [(usize, usize); 3]| {
                faces.push(corners.map(|(i, j)| vertex(i, j)));
                face_tex_coords.push(corners.map(|(i, j)| tex(i, j)));
            };
            if i != 0 {
                push([a, b, d]);
            }
            if i != h - 1 {
                push([b, c, d]);
            }
        }
    }

    TexturedMesh {
        positions,
        faces,
        tex_coords,
        face_tex_coords,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_cube() {
        let cube = unit_cube();
        assert!(cube.validate().is_ok());
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.face_count(), 12);
        assert_eq!(cube.seam_vertex_count(), 0);

        // Every face normal points away from the cube centre
        let centre = Point3f::new(0.5, 0.5, 0.5);
        for (face, normal) in cube.faces().iter().zip(cube.face_normals()) {
            let p = cube.positions()[face[0]];
            assert!(normal.dot(&(p - centre)) > 0.0);
        }
    }

    #[test]
    fn test_uv_sphere_counts() {
        let sphere = uv_sphere(1.0, 32, 24);
        assert!(sphere.validate().is_ok());
        assert_eq!(sphere.vertex_count(), 2 + 23 * 32);
        assert_eq!(sphere.face_count(), 2 * 32 * 23);
        assert_eq!(sphere.tex_coord_count(), 33 * 25);
        // Poles plus one vertex per ring on the meridian
        assert_eq!(sphere.seam_vertex_count(), 2 + 23);
    }

    #[test]
    fn test_uv_sphere_winding() {
        let sphere = uv_sphere(2.0, 8, 6);
        for (face, normal) in sphere.faces().iter().zip(sphere.face_normals()) {
            let p = sphere.positions()[face[0]];
            assert!(normal.dot(&p.coords) > 0.0);
        }
    }
}
