//! Window shape meshes
//!
//! Shapes are expressed in local units, -0.5..0.5 on both axes, and scaled
//! by the window size in the vertex shader. Corner radius is fixed in
//! pixels, so the mesh depends on the window size and is rebuilt whenever
//! the size changes.

use std::f32::consts::FRAC_PI_2;

use crate::geometry::Mapper;
use crate::gpu::Vertex;

/// Corner radius in pixels
pub const CORNER_RADIUS: f32 = 6.0;

/// Segments per quarter circle
const CORNER_SEGMENTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

/// Rounded rectangle for a window of the given device-space size.
///
/// Built as a strip of vertical slabs sweeping from the right edge to the
/// left edge: each step emits a vertex on the top outline and its mirror on
/// the bottom outline.
pub fn rounded_rect(width: f32, height: f32, mapper: &Mapper) -> Mesh {
    let (rx, ry) = corner_radii(width, height, mapper);

    let steps = CORNER_SEGMENTS + 1;
    let mut vertices = Vec::with_capacity(steps * 4);

    for corner in 0..2 {
        let (centre_x, base) = match corner {
            0 => (0.5 - rx, 0.0),
            _ => (-0.5 + rx, FRAC_PI_2),
        };

        for step in 0..steps {
            let theta = base + step as f32 / CORNER_SEGMENTS as f32 * FRAC_PI_2;
            let x = centre_x + theta.cos() * rx;
            let y = 0.5 - ry + theta.sin() * ry;

            vertices.push(Vertex { position: [x, y] });
            vertices.push(Vertex { position: [x, -y] });
        }
    }

    let pairs = (vertices.len() / 2) as u16;
    let mut indices = Vec::with_capacity((pairs as usize - 1) * 6);
    for pair in 1..pairs {
        let (prev_top, prev_bottom) = (pair * 2 - 2, pair * 2 - 1);
        let (top, bottom) = (pair * 2, pair * 2 + 1);
        indices.extend_from_slice(&[prev_top, prev_bottom, bottom, prev_top, bottom, top]);
    }

    Mesh { vertices, indices }
}

/// Plain quad, used for shadows
pub fn quad() -> Mesh {
    let vertices = [[-0.5, 0.5], [-0.5, -0.5], [0.5, -0.5], [0.5, 0.5]]
        .into_iter()
        .map(|position| Vertex { position })
        .collect();

    Mesh {
        vertices,
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

fn corner_radii(width: f32, height: f32, mapper: &Mapper) -> (f32, f32) {
    let radius = |ndc: f32, size: f32| {
        if size <= 0.0 {
            0.5
        } else {
            (ndc / size).min(0.5)
        }
    };

    (
        radius(mapper.width_to_ndc(CORNER_RADIUS), width),
        radius(mapper.height_to_ndc(CORNER_RADIUS), height),
    )
}
