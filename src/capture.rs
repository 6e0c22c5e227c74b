/*!
 * Single captures: one call, one mesh
 */

use scanlink_core_interface::{Mesh, ScannerSession};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ScanlinkError};

/// Counts describing a captured mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSummary {
    pub triangles: usize,
    pub vertices: usize,
    pub normals: usize,
    pub textures: usize,
    /// Encoded image size of the first texture
    pub texture_bytes: Option<usize>,
    /// UV count of the first texture
    pub texture_uvs: Option<usize>,
}

impl MeshSummary {
    pub fn of(mesh: &Mesh) -> Self {
        let first = mesh.textures.first();
        Self {
            triangles: mesh.triangles.len(),
            vertices: mesh.vertices.len(),
            normals: mesh.normals.len(),
            textures: mesh.textures.len(),
            texture_bytes: first.map(|t| t.image.data.len()),
            texture_uvs: first.map(|t| t.uvs.len()),
        }
    }
}

impl fmt::Display for MeshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "triangles: {}, vertices: {}, normals: {}, textures: {}",
            self.triangles, self.vertices, self.normals, self.textures
        )?;
        if let (Some(bytes), Some(uvs)) = (self.texture_bytes, self.texture_uvs) {
            write!(f, " (first texture: {} bytes, {} uvs)", bytes, uvs)?;
        }
        Ok(())
    }
}

/// Capture one structured mesh
pub async fn capture_mesh<S>(session: &S, with_texture: bool) -> Result<Mesh>
where
    S: ScannerSession + ?Sized,
{
    let mesh = session.capture(with_texture).await?;
    info!("Captured mesh: {}", MeshSummary::of(&mesh));
    Ok(mesh)
}

/// Capture one mesh as STL and write it to `path`, returning the byte count
pub async fn capture_stl_to_file<S>(session: &S, path: &Path) -> Result<usize>
where
    S: ScannerSession + ?Sized,
{
    let bytes = session.capture_stl().await?;
    write_file(path, &bytes).await?;
    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes.len())
}

pub(crate) async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| ScanlinkError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlink_core_interface::{
        CompressedImage, ImageEncoding, ImageInfo, MeshTexture, MeshTriangle, Point3, Vector2,
    };

    fn textured_triangle() -> Mesh {
        Mesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            triangles: vec![MeshTriangle::new(0, 1, 2)],
            textures: vec![MeshTexture {
                image: CompressedImage {
                    info: ImageInfo {
                        width: 1,
                        height: 1,
                        step: 3,
                        encoding: ImageEncoding::Rgb8,
                    },
                    data: vec![255, 0, 0],
                },
                uvs: vec![Vector2::default(); 3],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = MeshSummary::of(&textured_triangle());
        assert_eq!(summary.triangles, 1);
        assert_eq!(summary.vertices, 3);
        assert_eq!(summary.normals, 0);
        assert_eq!(summary.textures, 1);
        assert_eq!(summary.texture_bytes, Some(3));
        assert_eq!(summary.texture_uvs, Some(3));
    }

    #[test]
    fn test_summary_display() {
        let text = MeshSummary::of(&textured_triangle()).to_string();
        assert_eq!(
            text,
            "triangles: 1, vertices: 3, normals: 0, textures: 1 (first texture: 3 bytes, 3 uvs)"
        );

        let plain = MeshSummary::of(&Mesh::default()).to_string();
        assert!(!plain.contains("first texture"));
    }
}
