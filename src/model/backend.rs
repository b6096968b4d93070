// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model/backend.rs - 推理后端
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

use std::path::Path;

use ndarray::ArrayD;
use ort::session::Session;
use tracing::{debug, info};

use crate::model::ModelError;

/// 单输入单输出的推理后端
pub trait Backend {
  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError>;
}

/// 基于 ONNX Runtime 会话的后端
pub struct OnnxBackend {
  session: Session,
}

fn ort_error(e: impl std::fmt::Display) -> ModelError {
  ModelError::OrtError(e.to_string())
}

impl OnnxBackend {
  pub fn from_file(model_path: &Path) -> Result<Self, ModelError> {
    if !model_path.is_file() {
      return Err(ModelError::ModelNotFound(model_path.display().to_string()));
    }

    info!("加载模型文件: {}", model_path.display());
    let session = Session::builder()
      .map_err(ort_error)?
      .commit_from_file(model_path)
      .map_err(ort_error)?;

    debug!("模型输入数量: {}", session.inputs().len());
    if let Some(input) = session.inputs().first() {
      debug!("模型输入类型: {:?}", input.dtype());
    }

    Ok(OnnxBackend { session })
  }
}

impl Backend for OnnxBackend {
  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
    let input_value = ort::value::Tensor::from_array(input).map_err(ort_error)?;
    let outputs = self
      .session
      .run(ort::inputs![input_value])
      .map_err(ort_error)?;
    if outputs.len() == 0 {
      return Err(ModelError::UnexpectedOutputShape(
        "模型没有输出".to_string(),
      ));
    }

    let tensor = outputs[0].try_extract_array::<f32>().map_err(ort_error)?;
    Ok(tensor.to_owned())
  }
}
