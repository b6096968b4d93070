// 该文件是 Kouzhao （口罩） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的脚本化推理后端
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

#![allow(dead_code)]

use std::{cell::Cell, rc::Rc};

use kouzhao::{
  frame::BgrFrame,
  model::{Backend, FaceLocator, MaskClassifier, MaskDetector, ModelError, Prediction},
};
use ndarray::{Array2, Array4, ArrayD};

/// 固定返回若干人脸候选
pub struct ScriptedDetector {
  rows: Vec<[f32; 7]>,
  calls: Rc<Cell<usize>>,
}

impl Backend for ScriptedDetector {
  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
    assert_eq!(input.shape(), &[1, 3, 224, 224]);
    self.calls.set(self.calls.get() + 1);
    let mut out = Array4::<f32>::zeros((1, 1, self.rows.len(), 7));
    for (i, row) in self.rows.iter().enumerate() {
      for (k, v) in row.iter().enumerate() {
        out[[0, 0, i, k]] = *v;
      }
    }
    Ok(out.into_dyn())
  }
}

/// 每张人脸都返回同一组概率
pub struct ScriptedClassifier {
  prediction: Prediction,
  calls: Rc<Cell<usize>>,
}

impl Backend for ScriptedClassifier {
  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
    assert_eq!(&input.shape()[1..], &[224, 224, 3]);
    self.calls.set(self.calls.get() + 1);
    let n = input.shape()[0];
    let mut out = Array2::<f32>::zeros((n, 2));
    for i in 0..n {
      out[[i, 0]] = self.prediction.mask;
      out[[i, 1]] = self.prediction.no_mask;
    }
    Ok(out.into_dyn())
  }
}

pub struct Harness {
  pub detector: MaskDetector<ScriptedDetector, ScriptedClassifier>,
  pub detector_calls: Rc<Cell<usize>>,
  pub classifier_calls: Rc<Cell<usize>>,
}

pub fn harness(rows: Vec<[f32; 7]>, prediction: Prediction) -> Harness {
  let detector_calls = Rc::new(Cell::new(0));
  let classifier_calls = Rc::new(Cell::new(0));
  let locator = FaceLocator::new(
    ScriptedDetector {
      rows,
      calls: detector_calls.clone(),
    },
    0.5,
  );
  let classifier = MaskClassifier::new(ScriptedClassifier {
    prediction,
    calls: classifier_calls.clone(),
  });
  Harness {
    detector: MaskDetector::new(locator, classifier),
    detector_calls,
    classifier_calls,
  }
}

pub const ONE_FACE: [f32; 7] = [0.0, 1.0, 0.9, 0.25, 0.25, 0.75, 0.75];

pub fn synthetic_frame() -> BgrFrame {
  BgrFrame::filled(400, 300, [90, 120, 150])
}

