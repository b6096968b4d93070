// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/draw.rs - 口罩检测结果可视化
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

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::BgrFrame,
  model::{BoundingBox, MaskDetectResult, MaskLabel, Prediction, WithLabel},
};

/// 内置标签字体（DejaVu Sans）
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_OFFSET_Y: i32 = 10; // 文本底边距框顶的距离
const BOX_THICKNESS: u32 = 2;

/// 戴口罩：绿色（BGR）
pub const MASK_COLOR: [u8; 3] = [0, 255, 0];
/// 未戴口罩：红色（BGR）
pub const NO_MASK_COLOR: [u8; 3] = [0, 0, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontIo {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("无效的字体数据: {0}")]
  InvalidFont(#[from] InvalidFont),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
  pub text: String,
  pub color: [u8; 3],
}

pub fn label_for(prediction: &Prediction) -> Label {
  let kind = prediction.label();
  let color = match kind {
    MaskLabel::Mask => MASK_COLOR,
    MaskLabel::NoMask => NO_MASK_COLOR,
  };
  Label {
    text: format!("{}: {:.2}%", kind.to_label_str(), prediction.score() * 100.0),
    color,
  }
}

/// 在帧上绘制人脸框与口罩标签
pub struct Draw {
  font: FontArc,
  font_size: f32,
  label_offset_y: i32,
  thickness: u32,
}

impl Draw {
  fn with_font(font: FontArc) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_offset_y: LABEL_OFFSET_Y,
      thickness: BOX_THICKNESS,
    }
  }

  /// 使用内置字体
  pub fn embedded() -> Result<Self, DrawError> {
    let font = FontArc::try_from_slice(EMBEDDED_FONT)?;
    Ok(Self::with_font(font))
  }

  /// 从 TrueType 字体文件加载
  pub fn from_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path).map_err(|source| DrawError::FontIo {
      path: path.display().to_string(),
      source,
    })?;
    let font = FontArc::try_from_vec(data)?;
    info!("标签字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  /// 按 URL 的 `font` 参数选择字体，缺省时使用内置字体
  pub fn from_font_option(font: Option<&str>) -> Result<Self, DrawError> {
    match font {
      Some(path) => Self::from_font_file(Path::new(path)),
      None => Self::embedded(),
    }
  }

  fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    for t in 0..self.thickness {
      let width = (bbox.width() + 1).saturating_sub(2 * t);
      let height = (bbox.height() + 1).saturating_sub(2 * t);
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at((bbox.start_x + t) as i32, (bbox.start_y + t) as i32).of_size(width, height);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  fn draw_label(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &Label) {
    // 文本放在框上方，超出顶部时贴边
    let y = (bbox.start_y as i32 - self.label_offset_y - self.font_size as i32).max(0);
    draw_text_mut(
      image,
      Rgb(label.color),
      bbox.start_x as i32,
      y,
      PxScale::from(self.font_size),
      &self.font,
      &label.text,
    );
  }

  /// 在帧上绘制所有人脸的标签与边框
  pub fn annotate(&self, frame: &mut BgrFrame, result: &MaskDetectResult) {
    let image = frame.image_mut();
    for (detection, prediction) in result.iter() {
      let label = label_for(prediction);
      self.draw_label(image, &detection.bbox, &label);
      self.draw_box(image, &detection.bbox, Rgb(label.color));
    }
  }

  pub fn draw_detection(&self, frame: &BgrFrame, result: &MaskDetectResult) -> BgrFrame {
    let mut frame = frame.clone();
    self.annotate(&mut frame, result);
    frame
  }
}
