// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::debug;

use crate::frame::BgrFrame;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型输出形状异常: {0}")]
  UnexpectedOutputShape(String),
  #[error("人脸区域为空: {0:?}")]
  EmptyCrop(BoundingBox),
  #[error("检测数量 {detections} 与预测数量 {predictions} 不一致")]
  LengthMismatch {
    detections: usize,
    predictions: usize,
  },
}

/// 像素坐标下的人脸框，`end_*` 为右下角（含）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub start_x: u32,
  pub start_y: u32,
  pub end_x: u32,
  pub end_y: u32,
}

impl BoundingBox {
  pub fn width(&self) -> u32 {
    self.end_x.saturating_sub(self.start_x)
  }

  pub fn height(&self) -> u32 {
    self.end_y.saturating_sub(self.start_y)
  }

  pub fn is_empty(&self) -> bool {
    self.width() == 0 || self.height() == 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub confidence: f32,
}

/// 单张人脸的 (戴口罩, 未戴口罩) 概率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
  pub mask: f32,
  pub no_mask: f32,
}

impl Prediction {
  pub fn label(&self) -> MaskLabel {
    if self.mask > self.no_mask {
      MaskLabel::Mask
    } else {
      MaskLabel::NoMask
    }
  }

  pub fn score(&self) -> f32 {
    self.mask.max(self.no_mask)
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 分类器输出的两个类别，编号即输出向量的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskLabel {
  Mask,
  NoMask,
}

impl WithLabel for MaskLabel {
  fn to_label_str(&self) -> String {
    match self {
      MaskLabel::Mask => "Mask".to_string(),
      MaskLabel::NoMask => "No Mask".to_string(),
    }
  }

  fn to_label_id(&self) -> u32 {
    match self {
      MaskLabel::Mask => 0,
      MaskLabel::NoMask => 1,
    }
  }

  fn from_label_id(id: u32) -> Self {
    if id == 0 {
      MaskLabel::Mask
    } else {
      MaskLabel::NoMask
    }
  }
}

/// 一帧的检测结果，检测框与预测按下标一一对应
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaskDetectResult {
  detections: Box<[Detection]>,
  predictions: Box<[Prediction]>,
}

impl MaskDetectResult {
  pub fn new(detections: Vec<Detection>, predictions: Vec<Prediction>) -> Result<Self, ModelError> {
    if detections.len() != predictions.len() {
      return Err(ModelError::LengthMismatch {
        detections: detections.len(),
        predictions: predictions.len(),
      });
    }

    Ok(Self {
      detections: detections.into_boxed_slice(),
      predictions: predictions.into_boxed_slice(),
    })
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn predictions(&self) -> &[Prediction] {
    &self.predictions
  }

  pub fn len(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Detection, &Prediction)> {
    self.detections.iter().zip(self.predictions.iter())
  }
}

mod backend;
mod face_locator;
mod mask_classifier;
mod preprocess;

pub use self::backend::{Backend, OnnxBackend};
pub use self::face_locator::{
  DEFAULT_CONFIDENCE_THRESHOLD, DETECTOR_INPUT_SIZE, DETECTOR_MEAN, FaceLocator,
  FaceLocatorBuilder,
};
pub use self::mask_classifier::{CLASSIFIER_BATCH_SIZE, MaskClassifier, MaskClassifierBuilder};
pub use self::preprocess::{CLASSIFIER_INPUT_SIZE, FacePreprocessor, stack_faces};

/// 人脸检测与口罩分类的组合模型
///
/// 两个推理会话在启动时加载一次，之后每帧复用。
pub struct MaskDetector<D, C> {
  locator: FaceLocator<D>,
  preprocessor: FacePreprocessor,
  classifier: MaskClassifier<C>,
}

impl<D: Backend, C: Backend> MaskDetector<D, C> {
  pub fn new(locator: FaceLocator<D>, classifier: MaskClassifier<C>) -> Self {
    Self {
      locator,
      preprocessor: FacePreprocessor::default(),
      classifier,
    }
  }

  pub fn detect_and_predict(&mut self, frame: &BgrFrame) -> Result<MaskDetectResult, ModelError> {
    let detections = self.locator.locate(frame)?;
    debug!("检测到 {} 张人脸", detections.len());

    let faces = detections
      .iter()
      .map(|detection| self.preprocessor.preprocess(frame, &detection.bbox))
      .collect::<Result<Vec<_>, _>>()?;

    let predictions = self.classifier.classify(&faces)?;
    MaskDetectResult::new(detections, predictions)
  }
}

impl<D: Backend, C: Backend> Model for MaskDetector<D, C> {
  type Input = BgrFrame;
  type Output = MaskDetectResult;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect_and_predict(input)
  }
}
