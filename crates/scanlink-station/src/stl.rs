//! Binary STL encoding
//!
//! Layout: 80-byte header, little-endian u32 triangle count, then per triangle
//! a facet normal and three vertices as 12 little-endian f32 values followed
//! by a u16 attribute byte count.

use bytes::{BufMut, BytesMut};
use scanlink_core_interface::{Mesh, Point3};

pub const HEADER_LEN: usize = 80;
pub const TRIANGLE_LEN: usize = 50;

const HEADER_TEXT: &[u8] = b"scanlink binary STL";

pub fn encode_binary(mesh: &Mesh) -> Vec<u8> {
    let count = mesh.triangles.len();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 + count * TRIANGLE_LEN);

    let mut header = [0u8; HEADER_LEN];
    header[..HEADER_TEXT.len()].copy_from_slice(HEADER_TEXT);
    buf.put_slice(&header);
    buf.put_u32_le(count as u32);

    for (i, tri) in mesh.triangles.iter().enumerate() {
        let normal = mesh.face_normal(i).unwrap_or_default();
        buf.put_f32_le(normal.x as f32);
        buf.put_f32_le(normal.y as f32);
        buf.put_f32_le(normal.z as f32);

        for index in tri.indices() {
            let v: Point3 = mesh.vertices.get(index as usize).copied().unwrap_or_default();
            buf.put_f32_le(v.x as f32);
            buf.put_f32_le(v.y as f32);
            buf.put_f32_le(v.z as f32);
        }

        buf.put_u16_le(0);
    }

    buf.to_vec()
}

/// Triangle count from a binary STL header, if the buffer is consistent
pub fn triangle_count(stl: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = stl.get(HEADER_LEN..HEADER_LEN + 4)?.try_into().ok()?;
    let count = u32::from_le_bytes(raw);
    (stl.len() == HEADER_LEN + 4 + count as usize * TRIANGLE_LEN).then_some(count)
}
