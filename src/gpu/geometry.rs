use super::{GpuDevice, GpuResult};
use ash::vk;
use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const COLOR_OFFSET: u32 = std::mem::size_of::<[f32; 3]>() as u32;
}

const RED: [f32; 3] = [1.0, 0.0, 0.0];
const DARK_RED: [f32; 3] = [0.25, 0.0, 0.0];
const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
const DARK_GREEN: [f32; 3] = [0.0, 0.25, 0.0];
const BLUE: [f32; 3] = [0.0, 0.0, 1.0];
const DARK_BLUE: [f32; 3] = [0.0, 0.0, 0.25];

// Corners of the unit cube: Left/Right, Bottom/Top, Back/Front.
const LBB: [f32; 3] = [-0.5, -0.5, -0.5];
const LBF: [f32; 3] = [-0.5, -0.5, 0.5];
const LTB: [f32; 3] = [-0.5, 0.5, -0.5];
const LTF: [f32; 3] = [-0.5, 0.5, 0.5];
const RBB: [f32; 3] = [0.5, -0.5, -0.5];
const RBF: [f32; 3] = [0.5, -0.5, 0.5];
const RTB: [f32; 3] = [0.5, 0.5, -0.5];
const RTF: [f32; 3] = [0.5, 0.5, 0.5];

const fn face(corners: [[f32; 3]; 6], color: [f32; 3]) -> [Vertex; 6] {
    [
        Vertex { position: corners[0], color },
        Vertex { position: corners[1], color },
        Vertex { position: corners[2], color },
        Vertex { position: corners[3], color },
        Vertex { position: corners[4], color },
        Vertex { position: corners[5], color },
    ]
}

const FACES: [[Vertex; 6]; 6] = [
    face([LTB, LBF, LBB, LTB, LTF, LBF], DARK_RED),
    face([RTB, RBB, RBF, RTB, RBF, RTF], RED),
    face([LBB, LBF, RBF, LBB, RBF, RBB], DARK_GREEN),
    face([LTB, RTB, RTF, LTB, RTF, LTF], GREEN),
    face([LBB, RBB, RTB, LBB, RTB, LTB], DARK_BLUE),
    face([LBF, LTF, RTF, LBF, RTF, RBF], BLUE),
];

/// 36 vertices: six faces of two clockwise triangles, no shared corners.
pub const CUBE_VERTICES: [Vertex; 36] = {
    let mut out = [Vertex { position: [0.0; 3], color: [0.0; 3] }; 36];
    let mut i = 0;
    while i < 36 {
        out[i] = FACES[i / 6][i % 6];
        i += 1;
    }
    out
};

pub const CUBE_INDICES: [u16; 36] = {
    let mut out = [0u16; 36];
    let mut i = 0;
    while i < 36 {
        out[i] = i as u16;
        i += 1;
    }
    out
};

pub const CUBE_INDEX_COUNT: u32 = CUBE_INDICES.len() as u32;

/// Index and vertex buffers for the cube, written once at startup.
pub struct DrawBuffer<D: GpuDevice> {
    indices: D::Buffer,
    vertices: D::Buffer,
}

impl<D: GpuDevice> DrawBuffer<D> {
    pub fn new(device: &D) -> GpuResult<Self> {
        let indices = device.create_buffer(
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&CUBE_INDICES),
        )?;
        let vertices = device.create_buffer(
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&CUBE_VERTICES),
        )?;
        log::debug!(
            "[gpu] cube geometry uploaded ({} vertices, {} indices)",
            CUBE_VERTICES.len(),
            CUBE_INDICES.len()
        );
        Ok(Self { indices, vertices })
    }

    pub fn indices(&self) -> &D::Buffer {
        &self.indices
    }

    pub fn vertices(&self) -> &D::Buffer {
        &self.vertices
    }
}
