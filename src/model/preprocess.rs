// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model/preprocess.rs - 人脸预处理
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

use image::imageops::FilterType;
use ndarray::{Array3, Array4, Axis};

use crate::{
  frame::BgrFrame,
  model::{BoundingBox, ModelError},
};

pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

/// 裁剪人脸，BGR 转 RGB，缩放到 224×224 并归一化到 [-1, 1]
#[derive(Debug, Clone)]
pub struct FacePreprocessor {
  size: u32,
}

impl Default for FacePreprocessor {
  fn default() -> Self {
    Self {
      size: CLASSIFIER_INPUT_SIZE,
    }
  }
}

impl FacePreprocessor {
  pub fn preprocess(&self, frame: &BgrFrame, bbox: &BoundingBox) -> Result<Array3<f32>, ModelError> {
    let (width, height) = (bbox.width(), bbox.height());
    if width == 0
      || height == 0
      || bbox.end_x > frame.width()
      || bbox.end_y > frame.height()
    {
      return Err(ModelError::EmptyCrop(*bbox));
    }

    let face = frame.crop(bbox.start_x, bbox.start_y, width, height).to_rgb_image();
    let face = image::imageops::resize(&face, self.size, self.size, FilterType::Triangle);

    let size = self.size as usize;
    let mut tensor = Array3::<f32>::zeros((size, size, 3));
    for (x, y, pixel) in face.enumerate_pixels() {
      for c in 0..3 {
        // MobileNetV2: x / 127.5 - 1
        tensor[[y as usize, x as usize, c]] = pixel[c] as f32 / 127.5 - 1.0;
      }
    }

    Ok(tensor)
  }
}

/// 把若干张人脸打包成 [N, 224, 224, 3] 批次
pub fn stack_faces(faces: &[Array3<f32>]) -> Result<Array4<f32>, ModelError> {
  let views = faces.iter().map(|face| face.view()).collect::<Vec<_>>();
  ndarray::stack(Axis(0), &views).map_err(|e| ModelError::UnexpectedOutputShape(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  #[test]
  fn output_is_rgb_and_normalized() {
    // B=0, G=127, R=255
    let frame = BgrFrame::filled(64, 48, [0, 127, 255]);
    let bbox = BoundingBox {
      start_x: 8,
      start_y: 8,
      end_x: 40,
      end_y: 30,
    };
    let face = FacePreprocessor::default().preprocess(&frame, &bbox).unwrap();
    assert_eq!(face.shape(), &[224, 224, 3]);
    assert_relative_eq!(face[[0, 0, 0]], 1.0);
    assert_relative_eq!(face[[100, 100, 1]], 127.0 / 127.5 - 1.0);
    assert_relative_eq!(face[[223, 223, 2]], -1.0);
    assert!(face.iter().all(|v| (-1.0..=1.0).contains(v)));
  }

  #[test]
  fn empty_crop_is_rejected() {
    let frame = BgrFrame::filled(64, 48, [0, 0, 0]);
    let bbox = BoundingBox {
      start_x: 10,
      start_y: 10,
      end_x: 10,
      end_y: 20,
    };
    let err = FacePreprocessor::default().preprocess(&frame, &bbox).unwrap_err();
    assert!(matches!(err, ModelError::EmptyCrop(_)));
  }

  #[test]
  fn faces_stack_into_a_batch() {
    let faces = vec![Array3::<f32>::zeros((224, 224, 3)); 3];
    let batch = stack_faces(&faces).unwrap();
    assert_eq!(batch.shape(), &[3, 224, 224, 3]);
  }
}
