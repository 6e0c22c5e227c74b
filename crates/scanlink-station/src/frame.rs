//! Frame sources: where captured frames come from and how they become meshes
//!
//! A real station would wrap a scanner SDK here. [`SyntheticScanner`] stands in
//! for hardware and produces deterministic sphere meshes.

use scanlink_core_interface::{
    CompressedImage, ImageEncoding, ImageInfo, Mesh, MeshTexture, MeshTriangle, Point3, Result,
    ScannerError, ScannerErrorCode, Vector2, Vector3,
};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One raw capture, not yet reconstructed
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub with_texture: bool,
}

/// Capture and reconstruction backend.
///
/// Both calls block; the service runs them on blocking threads or on its
/// preparation pool.
pub trait FrameSource: Send + Sync + 'static {
    fn capture_frame(&self, with_texture: bool) -> Result<Frame>;

    fn reconstruct(&self, frame: &Frame) -> Result<Mesh>;
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Latitude bands of the generated sphere
    pub rings: u32,

    /// Longitude segments of the generated sphere
    pub segments: u32,

    /// Base radius in millimetres
    pub radius: f64,

    /// Fail reconstruction of every k-th frame (0 = never)
    pub fail_every: u64,

    /// Artificial reconstruction latency
    pub reconstruct_delay: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            rings: 16,
            segments: 32,
            radius: 50.0,
            fail_every: 0,
            reconstruct_delay: Duration::ZERO,
        }
    }
}

const TEXTURE_WIDTH: u32 = 64;
const TEXTURE_HEIGHT: u32 = 32;

/// Deterministic stand-in for scanner hardware
#[derive(Debug, Default)]
pub struct SyntheticScanner {
    config: SyntheticConfig,
    sequence: AtomicU64,
}

impl SyntheticScanner {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn fails(&self, frame: &Frame) -> bool {
        self.config.fail_every > 0 && (frame.sequence + 1) % self.config.fail_every == 0
    }

    fn texture(&self, frame: &Frame, vertex_uvs: Vec<Vector2>) -> MeshTexture {
        let step = TEXTURE_WIDTH * 3;
        let mut data = Vec::with_capacity((step * TEXTURE_HEIGHT) as usize);
        let shade = (frame.sequence % 256) as u8;
        for y in 0..TEXTURE_HEIGHT {
            for x in 0..TEXTURE_WIDTH {
                data.push((x * 255 / (TEXTURE_WIDTH - 1)) as u8);
                data.push((y * 255 / (TEXTURE_HEIGHT - 1)) as u8);
                data.push(shade);
            }
        }

        MeshTexture {
            image: CompressedImage {
                info: ImageInfo {
                    width: TEXTURE_WIDTH,
                    height: TEXTURE_HEIGHT,
                    step,
                    encoding: ImageEncoding::Rgb8,
                },
                data,
            },
            uvs: vertex_uvs,
        }
    }
}

impl FrameSource for SyntheticScanner {
    fn capture_frame(&self, with_texture: bool) -> Result<Frame> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(Frame {
            sequence,
            with_texture,
        })
    }

    fn reconstruct(&self, frame: &Frame) -> Result<Mesh> {
        if !self.config.reconstruct_delay.is_zero() {
            std::thread::sleep(self.config.reconstruct_delay);
        }

        if self.fails(frame) {
            return Err(ScannerError::scanner(
                ScannerErrorCode::FrameReconstructionFailed,
                format!("Error reconstructing mesh for frame {}", frame.sequence),
            ));
        }

        let rings = self.config.rings.max(2);
        let segments = self.config.segments.max(3);
        let radius = self.config.radius * (1.0 + 0.01 * (frame.sequence % 10) as f64);

        let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
        let mut normals = Vec::with_capacity(vertices.capacity());
        let mut uvs = Vec::with_capacity(vertices.capacity());

        for i in 0..=rings {
            let theta = PI * i as f64 / rings as f64;
            for j in 0..=segments {
                let phi = 2.0 * PI * j as f64 / segments as f64;
                let n = Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
                vertices.push(Point3::new(radius * n.x, radius * n.y, radius * n.z));
                normals.push(n);
                uvs.push(Vector2 {
                    x: j as f64 / segments as f64,
                    y: i as f64 / rings as f64,
                });
            }
        }

        let row = segments + 1;
        let mut triangles = Vec::with_capacity((2 * rings * segments) as usize);
        for i in 0..rings {
            for j in 0..segments {
                let a = i * row + j;
                let b = a + row;
                triangles.push(MeshTriangle::new(a, b, a + 1));
                triangles.push(MeshTriangle::new(a + 1, b, b + 1));
            }
        }

        let textures = if frame.with_texture {
            vec![self.texture(frame, uvs)]
        } else {
            Vec::new()
        };

        Ok(Mesh {
            vertices,
            triangles,
            normals,
            colors: Vec::new(),
            textures,
        })
    }
}
