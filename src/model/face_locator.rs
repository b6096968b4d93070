// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model/face_locator.rs - SSD 人脸检测
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayViewD, Ix4};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::BgrFrame,
  model::{Backend, BoundingBox, Detection, ModelError, OnnxBackend},
  query_param,
};

pub const DETECTOR_INPUT_SIZE: u32 = 224;
/// 按 B、G、R 顺序减去的均值
pub const DETECTOR_MEAN: [f32; 3] = [104.0, 177.0, 123.0];
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

// 输出 [1, 1, N, 7]: [image_id, label, confidence, x1, y1, x2, y2]
const DETECTION_FIELDS: usize = 7;
const CONFIDENCE_FIELD: usize = 2;
const BOX_FIELD: usize = 3;

pub struct FaceLocator<B> {
  backend: B,
  confidence: f32,
}

impl<B: Backend> FaceLocator<B> {
  pub fn new(backend: B, confidence: f32) -> Self {
    Self {
      backend,
      confidence,
    }
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn locate(&mut self, frame: &BgrFrame) -> Result<Vec<Detection>, ModelError> {
    let blob = blob_from_frame(frame);
    let output = self.backend.forward(blob.into_dyn())?;
    decode_detections(
      output.view(),
      frame.width(),
      frame.height(),
      self.confidence,
    )
  }
}

/// 整帧缩放到 224×224，减均值，转为 NCHW
pub fn blob_from_frame(frame: &BgrFrame) -> Array4<f32> {
  let size = DETECTOR_INPUT_SIZE as usize;
  let resized = frame.resize_exact(DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE);
  let mut blob = Array4::<f32>::zeros((1, 3, size, size));

  for (x, y, pixel) in resized.image().enumerate_pixels() {
    for c in 0..3 {
      blob[[0, c, y as usize, x as usize]] = pixel[c] as f32 - DETECTOR_MEAN[c];
    }
  }

  blob
}

/// 解析检测张量，过滤低置信度候选并将坐标裁剪到帧内
pub fn decode_detections(
  output: ArrayViewD<'_, f32>,
  width: u32,
  height: u32,
  confidence: f32,
) -> Result<Vec<Detection>, ModelError> {
  let shape = output.shape();
  if shape.len() != 4 || shape[3] < DETECTION_FIELDS {
    return Err(ModelError::UnexpectedOutputShape(format!(
      "期望 [1, 1, N, {}], 实际 {:?}",
      DETECTION_FIELDS, shape
    )));
  }
  if width == 0 || height == 0 {
    return Ok(Vec::new());
  }
  let candidates = shape[2];
  let output = output
    .into_dimensionality::<Ix4>()
    .map_err(|e| ModelError::UnexpectedOutputShape(e.to_string()))?;

  let max_x = (width - 1) as i64;
  let max_y = (height - 1) as i64;
  let mut detections = Vec::new();

  for i in 0..candidates {
    let score = output[[0, 0, i, CONFIDENCE_FIELD]];
    if score.is_nan() || score <= confidence {
      continue;
    }

    let coord = |k: usize, scale: u32| (output[[0, 0, i, BOX_FIELD + k]] * scale as f32) as i64;
    let bbox = BoundingBox {
      start_x: coord(0, width).max(0) as u32,
      start_y: coord(1, height).max(0) as u32,
      end_x: coord(2, width).min(max_x).max(0) as u32,
      end_y: coord(3, height).min(max_y).max(0) as u32,
    };

    if bbox.is_empty() {
      debug!("跳过面积为零的人脸框: {:?}, 置信度 {:.4}", bbox, score);
      continue;
    }

    detections.push(Detection {
      bbox,
      confidence: score,
    });
  }

  Ok(detections)
}

pub struct FaceLocatorBuilder {
  model_path: PathBuf,
  weights_path: Option<PathBuf>,
  confidence: f32,
}

impl FromUrlWithScheme for FaceLocatorBuilder {
  const SCHEME: &'static str = "ssd";
}

impl FromUrl for FaceLocatorBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "人脸检测模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let weights_path = url
      .query_pairs()
      .find(|(k, _)| k == "weights")
      .map(|(_, v)| PathBuf::from(v.as_ref()));

    Ok(FaceLocatorBuilder {
      model_path: PathBuf::from(url.path()),
      weights_path,
      confidence: query_param(url, "confidence").unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
    })
  }
}

impl FaceLocatorBuilder {
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  /// 加载网络结构与权重
  ///
  /// 权重以 ONNX 外部数据形式存放，由运行时按网络结构文件中的相对路径读取，
  /// 这里只确认文件存在。
  pub fn build(self) -> Result<FaceLocator<OnnxBackend>, ModelError> {
    if let Some(weights) = &self.weights_path {
      if !weights.is_file() {
        return Err(ModelError::ModelNotFound(weights.display().to_string()));
      }
      info!("人脸检测权重文件: {}", weights.display());
    }

    let backend = OnnxBackend::from_file(&self.model_path)?;
    info!("人脸检测模型加载完成，置信度阈值: {}", self.confidence);
    Ok(FaceLocator::new(backend, self.confidence))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array4, ArrayD};

  fn detection_tensor(rows: &[[f32; 7]]) -> ArrayD<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 1, rows.len(), 7));
    for (i, row) in rows.iter().enumerate() {
      for (k, value) in row.iter().enumerate() {
        tensor[[0, 0, i, k]] = *value;
      }
    }
    tensor.into_dyn()
  }

  #[test]
  fn weak_candidates_are_dropped() {
    let output = detection_tensor(&[
      [0.0, 1.0, 0.5, 0.1, 0.1, 0.4, 0.4],
      [0.0, 1.0, 0.49, 0.1, 0.1, 0.4, 0.4],
      [0.0, 1.0, 0.51, 0.5, 0.5, 0.9, 0.9],
    ]);
    let detections = decode_detections(output.view(), 100, 100, 0.5).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].confidence, 0.51);
  }

  #[test]
  fn nan_confidence_is_dropped() {
    let output = detection_tensor(&[
      [0.0, 1.0, f32::NAN, 0.1, 0.1, 0.4, 0.4],
      [0.0, 1.0, 0.9, 0.5, 0.5, 0.9, 0.9],
    ]);
    let detections = decode_detections(output.view(), 100, 100, 0.5).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].confidence, 0.9);
  }

  #[test]
  fn boxes_are_scaled_and_clamped() {
    let output = detection_tensor(&[[0.0, 1.0, 0.9, -0.2, 0.25, 1.3, 1.0]]);
    let detections = decode_detections(output.view(), 400, 300, 0.5).unwrap();
    assert_eq!(
      detections[0].bbox,
      BoundingBox {
        start_x: 0,
        start_y: 75,
        end_x: 399,
        end_y: 299
      }
    );
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let output = detection_tensor(&[
      [0.0, 1.0, 0.9, 0.5, 0.5, 0.5, 0.8],
      [0.0, 1.0, 0.9, 1.2, 0.1, 1.5, 0.3],
    ]);
    let detections = decode_detections(output.view(), 100, 100, 0.5).unwrap();
    assert!(detections.is_empty());
  }

  #[test]
  fn every_box_respects_frame_bounds() {
    let rows: Vec<[f32; 7]> = (0..20)
      .map(|i| {
        let t = i as f32 / 10.0 - 0.5;
        [0.0, 1.0, 0.95, t, t * 0.5, t + 0.7, t + 0.9]
      })
      .collect();
    let (width, height) = (160, 120);
    let output = detection_tensor(&rows);
    for detection in decode_detections(output.view(), width, height, 0.5).unwrap() {
      let b = detection.bbox;
      assert!(b.start_x < b.end_x && b.end_x <= width - 1);
      assert!(b.start_y < b.end_y && b.end_y <= height - 1);
    }
  }

  #[test]
  fn unexpected_shape_is_an_error() {
    let output = ArrayD::<f32>::zeros(vec![1, 10, 5]);
    let err = decode_detections(output.view(), 100, 100, 0.5).unwrap_err();
    assert!(matches!(err, ModelError::UnexpectedOutputShape(_)));
  }

  #[test]
  fn blob_subtracts_channel_means() {
    let frame = BgrFrame::filled(320, 240, [104, 177, 123]);
    let blob = blob_from_frame(&frame);
    assert_eq!(blob.shape(), &[1, 3, 224, 224]);
    assert!(blob.iter().all(|v| v.abs() < 1e-3));
  }

  #[test]
  fn builder_reads_url_options() {
    let url = Url::parse("ssd:face/deploy.onnx?weights=face/deploy.onnx.data&confidence=0.6").unwrap();
    let builder = FaceLocatorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("face/deploy.onnx"));
    assert_eq!(builder.confidence, 0.6);
    assert_eq!(builder.weights_path, Some(PathBuf::from("face/deploy.onnx.data")));
  }

  #[test]
  fn missing_weights_fail_at_build() {
    let url = Url::parse("ssd:/nonexistent/deploy.onnx?weights=/nonexistent/weights.data").unwrap();
    let err = FaceLocatorBuilder::from_url(&url).unwrap().build().err().unwrap();
    assert!(matches!(err, ModelError::ModelNotFound(_)));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("mobilenet:mask.onnx").unwrap();
    assert!(FaceLocatorBuilder::from_url(&url).is_err());
  }
}
