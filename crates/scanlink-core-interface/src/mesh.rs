//! Structured mesh types returned by structured captures
//!
//! Layouts follow the usual geometry-shape conventions: f64 points and vectors,
//! triangles as index triples into the vertex list, and textures carrying an
//! encoded image plus one UV coordinate per vertex.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub v1: u32,
    pub v2: u32,
    pub v3: u32,
}

impl MeshTriangle {
    pub fn new(v1: u32, v2: u32, v3: u32) -> Self {
        Self { v1, v2, v3 }
    }

    pub fn indices(&self) -> [u32; 3] {
        [self.v1, self.v2, self.v3]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorRgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    /// Compressed container (PNG, JPEG); decode with an image library
    Compressed,
    /// Packed 8-bit RGB, `step` bytes per row
    Rgb8,
    /// 8-bit grayscale, `step` bytes per row
    Mono8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub step: u32,
    pub encoding: ImageEncoding,
}

/// Image blob plus the information needed to decode it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedImage {
    pub info: ImageInfo,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshTexture {
    pub image: CompressedImage,
    pub uvs: Vec<Vector2>,
}

/// A triangle mesh as materialized in client memory.
///
/// `normals` is either empty or holds one normal per vertex. `colors` is
/// usually empty; scanners report color through textures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Point3>,
    pub triangles: Vec<MeshTriangle>,
    #[serde(default)]
    pub normals: Vec<Vector3>,
    #[serde(default)]
    pub colors: Vec<ColorRgb>,
    #[serde(default)]
    pub textures: Vec<MeshTexture>,
}

/// Structural problems found by [`Mesh::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error("Triangle {triangle} references vertex {index} but mesh has {vertex_count} vertices")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Mesh has {normals} normals for {vertices} vertices")]
    NormalCount { normals: usize, vertices: usize },

    #[error("Texture {texture} has {uvs} uv coordinates for {vertices} vertices")]
    UvCount {
        texture: usize,
        uvs: usize,
        vertices: usize,
    },
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.triangles.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    /// Check index ranges and per-vertex array lengths
    pub fn validate(&self) -> Result<(), MeshError> {
        let vertex_count = self.vertices.len();

        for (i, tri) in self.triangles.iter().enumerate() {
            if let Some(&index) = tri.indices().iter().find(|&&v| v as usize >= vertex_count) {
                return Err(MeshError::IndexOutOfRange {
                    triangle: i,
                    index,
                    vertex_count,
                });
            }
        }

        if !self.normals.is_empty() && self.normals.len() != vertex_count {
            return Err(MeshError::NormalCount {
                normals: self.normals.len(),
                vertices: vertex_count,
            });
        }

        for (i, tex) in self.textures.iter().enumerate() {
            if tex.uvs.len() != vertex_count {
                return Err(MeshError::UvCount {
                    texture: i,
                    uvs: tex.uvs.len(),
                    vertices: vertex_count,
                });
            }
        }

        Ok(())
    }

    /// Face normal of triangle `i` (unit length, zero for degenerate faces)
    pub fn face_normal(&self, i: usize) -> Option<Vector3> {
        let tri = self.triangles.get(i)?;
        let a = self.vertices.get(tri.v1 as usize)?;
        let b = self.vertices.get(tri.v2 as usize)?;
        let c = self.vertices.get(tri.v3 as usize)?;

        let u = (b.x - a.x, b.y - a.y, b.z - a.z);
        let v = (c.x - a.x, c.y - a.y, c.z - a.z);
        let n = Vector3::new(
            u.1 * v.2 - u.2 * v.1,
            u.2 * v.0 - u.0 * v.2,
            u.0 * v.1 - u.1 * v.0,
        );

        let len = n.length();
        if len == 0.0 {
            return Some(Vector3::default());
        }
        Some(Vector3::new(n.x / len, n.y / len, n.z / len))
    }
}
