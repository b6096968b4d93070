// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};

const BGR_CHANNELS: usize = 3;

/// HWC 排列、BGR 通道顺序的 8 位图像帧
///
/// 内部借用 `RgbImage` 的存储，但三个通道依次为 B、G、R，
/// 与摄像头管道输出的顺序一致。绘制时使用的颜色也按 BGR 给出。
#[derive(Debug, Clone, PartialEq)]
pub struct BgrFrame {
  data: RgbImage,
}

impl BgrFrame {
  /// 由按行紧密排列的 BGR 字节构造帧
  ///
  /// 数据长度不等于 `width * height * 3` 时返回 `None`。
  pub fn from_bgr_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    ImageBuffer::from_raw(width, height, data).map(|data| Self { data })
  }

  pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
    Self {
      data: ImageBuffer::from_pixel(width, height, Rgb(bgr)),
    }
  }

  pub fn width(&self) -> u32 {
    self.data.width()
  }

  pub fn height(&self) -> u32 {
    self.data.height()
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn as_bgr(&self) -> &[u8] {
    self.data.as_raw()
  }

  /// 底层图像缓冲区（像素为 BGR）
  pub fn image(&self) -> &RgbImage {
    &self.data
  }

  pub fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.data
  }

  /// 按比例缩放到宽度 `max_width`，窄帧同样放大
  ///
  /// 高度按 `h * max_width / w` 向下取整，至少为 1。
  pub fn resize_to_width(self, max_width: u32) -> Self {
    let (width, height) = (self.width(), self.height());
    if max_width == 0 || width == 0 || width == max_width {
      return self;
    }

    let new_height = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1) as u32;
    Self {
      data: image::imageops::resize(&self.data, max_width, new_height, FilterType::Triangle),
    }
  }

  /// 缩放到固定尺寸，不保持宽高比
  pub fn resize_exact(&self, width: u32, height: u32) -> Self {
    Self {
      data: image::imageops::resize(&self.data, width, height, FilterType::Triangle),
    }
  }

  /// 裁剪 `[x, x + width) × [y, y + height)` 区域
  pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      data: image::imageops::crop_imm(&self.data, x, y, width, height).to_image(),
    }
  }

  /// 交换 B、R 通道，得到 RGB 顺序的图像
  pub fn to_rgb_image(&self) -> RgbImage {
    let mut image = self.data.clone();
    for pixel in image.pixels_mut() {
      pixel.0.swap(0, 2);
    }
    image
  }

  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let mut data = image.clone();
    for pixel in data.pixels_mut() {
      pixel.0.swap(0, 2);
    }
    Self { data }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_bgr_bytes_checks_length() {
    assert!(BgrFrame::from_bgr_bytes(2, 2, vec![0u8; 12]).is_some());
    assert!(BgrFrame::from_bgr_bytes(2, 2, vec![0u8; 10]).is_none());
  }

  #[test]
  fn resize_to_width_keeps_aspect_ratio() {
    let frame = BgrFrame::filled(800, 600, [1, 2, 3]).resize_to_width(400);
    assert_eq!((frame.width(), frame.height()), (400, 300));
  }

  #[test]
  fn resize_to_width_enlarges_narrow_frames() {
    let frame = BgrFrame::filled(320, 240, [1, 2, 3]).resize_to_width(400);
    assert_eq!((frame.width(), frame.height()), (400, 300));
  }

  #[test]
  fn resize_to_width_truncates_height() {
    let frame = BgrFrame::filled(1000, 334, [1, 2, 3]).resize_to_width(400);
    assert_eq!((frame.width(), frame.height()), (400, 133));
  }

  #[test]
  fn rgb_conversion_swaps_outer_channels() {
    let frame = BgrFrame::filled(1, 1, [10, 20, 30]);
    let rgb = frame.to_rgb_image();
    assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
    assert_eq!(BgrFrame::from_rgb_image(&rgb), frame);
  }

  #[test]
  fn crop_takes_requested_region() {
    let mut frame = BgrFrame::filled(4, 4, [0, 0, 0]);
    frame.image_mut().put_pixel(2, 1, Rgb([9, 9, 9]));
    let cropped = frame.crop(2, 1, 2, 3);
    assert_eq!((cropped.width(), cropped.height()), (2, 3));
    assert_eq!(cropped.image().get_pixel(0, 0).0, [9, 9, 9]);
  }
}
