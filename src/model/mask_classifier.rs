// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model/mask_classifier.rs - 口罩分类
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

use std::path::PathBuf;

use ndarray::{Array3, Ix2};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Backend, ModelError, OnnxBackend, Prediction, stack_faces},
};

pub const CLASSIFIER_BATCH_SIZE: usize = 32;
const CLASSIFIER_CLASS_NUM: usize = 2;

pub struct MaskClassifier<B> {
  backend: B,
  batch_size: usize,
}

impl<B: Backend> MaskClassifier<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      batch_size: CLASSIFIER_BATCH_SIZE,
    }
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  /// 对一批人脸做分类，空批次不调用模型
  pub fn classify(&mut self, faces: &[Array3<f32>]) -> Result<Vec<Prediction>, ModelError> {
    if faces.is_empty() {
      return Ok(Vec::new());
    }

    let mut predictions = Vec::with_capacity(faces.len());
    for chunk in faces.chunks(self.batch_size) {
      let batch = stack_faces(chunk)?;
      debug!("口罩分类批次大小: {}", chunk.len());
      let output = self.backend.forward(batch.into_dyn())?;

      let shape = output.shape().to_vec();
      let output = output
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::UnexpectedOutputShape(format!("期望 [N, 2], 实际 {:?}", shape)))?;
      if output.nrows() != chunk.len() || output.ncols() != CLASSIFIER_CLASS_NUM {
        return Err(ModelError::UnexpectedOutputShape(format!(
          "期望 [{}, {}], 实际 {:?}",
          chunk.len(),
          CLASSIFIER_CLASS_NUM,
          shape
        )));
      }

      predictions.extend(output.rows().into_iter().map(|row| Prediction {
        mask: row[0],
        no_mask: row[1],
      }));
    }

    Ok(predictions)
  }
}

pub struct MaskClassifierBuilder {
  model_path: PathBuf,
  batch_size: usize,
}

impl FromUrlWithScheme for MaskClassifierBuilder {
  const SCHEME: &'static str = "mobilenet";
}

impl FromUrl for MaskClassifierBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "口罩分类模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(MaskClassifierBuilder {
      model_path: PathBuf::from(url.path()),
      batch_size: crate::query_param(url, "batch").unwrap_or(CLASSIFIER_BATCH_SIZE),
    })
  }
}

impl MaskClassifierBuilder {
  pub fn build(self) -> Result<MaskClassifier<OnnxBackend>, ModelError> {
    let backend = OnnxBackend::from_file(&self.model_path)?;
    info!("口罩分类模型加载完成");
    Ok(MaskClassifier::new(backend).with_batch_size(self.batch_size))
  }
}
