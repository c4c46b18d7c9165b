use anyhow::{Context, Result};
use directories::ProjectDirs;
use facemark_vision::{Backdrop, DetectorOptions, RenderStyle};
use image::Rgb;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACEMARK_CONFIG_PATH").unwrap_or("/usr/local/etc/facemark/config.toml"),
    )
});

/// Where a model file lives locally and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    pub file: String,
    pub url: String,
}

impl ModelSource {
    fn landmark() -> Self {
        Self {
            file: "shape_predictor_68_face_landmarks.dat".into(),
            url: "http://dlib.net/files/shape_predictor_68_face_landmarks.dat.bz2".into(),
        }
    }

    fn detector() -> Self {
        Self {
            file: "face_detection_yunet_2023mar.onnx".into(),
            url: "https://github.com/opencv/opencv_zoo/raw/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackdropMode {
    Grayscale,
    Original,
}

impl From<BackdropMode> for Backdrop {
    fn from(mode: BackdropMode) -> Self {
        match mode {
            BackdropMode::Grayscale => Backdrop::Grayscale,
            BackdropMode::Original => Backdrop::Original,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    pub line_thickness: NonZeroU32,
    pub point_size: u32,
    pub color: [u8; 3],
}

impl Default for RenderDefaults {
    fn default() -> Self {
        let style = RenderStyle::default();
        Self {
            line_thickness: style.line_thickness,
            point_size: style.point_radius,
            color: style.color.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: SocketAddr,
    pub model_dir: PathBuf,
    pub landmark_model: ModelSource,
    pub detector_model: ModelSource,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub max_upload_bytes: usize,
    pub jpeg_quality: u8,
    pub backdrop: BackdropMode,
    pub render: RenderDefaults,
}

impl Default for Config {
    fn default() -> Self {
        let detector = DetectorOptions::default();
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            model_dir: default_model_dir(),
            landmark_model: ModelSource::landmark(),
            detector_model: ModelSource::detector(),
            score_threshold: detector.score_threshold,
            nms_threshold: detector.nms_threshold,
            max_upload_bytes: 10 * 1024 * 1024,
            jpeg_quality: facemark_vision::codec::DEFAULT_JPEG_QUALITY,
            backdrop: BackdropMode::Grayscale,
            render: RenderDefaults::default(),
        }
    }
}

impl Config {
    pub fn landmark_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.landmark_model.file)
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model.file)
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    pub fn render_style(&self) -> RenderStyle {
        RenderStyle {
            line_thickness: self.render.line_thickness,
            point_radius: self.render.point_size,
            color: Rgb(self.render.color),
        }
    }
}

fn default_model_dir() -> PathBuf {
    ProjectDirs::from("", "", "facemark")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("models"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}
