// 该文件是 Kouzhao （口罩） 项目的一部分。
// tests/oneshot.rs - 单张图像读取、检测与保存
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

#![cfg(all(feature = "read_image_file", feature = "save_image_file"))]

mod common;

use std::path::PathBuf;

use common::{ONE_FACE, harness};
use image::{Rgb, RgbImage};
use kouzhao::{
  FromUrl,
  input::ImageFileInput,
  model::Prediction,
  output::SaveImageFileOutput,
  task::{OneShotTask, Task},
};
use url::Url;

/// 测试图背景色（RGB），`ONE_FACE` 在 400x300 上对应框 (100, 75) - (300, 225)
const BACKGROUND_RGB: [u8; 3] = [150, 120, 90];

fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("kouzhao-{}-{}", name, std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

fn image_url(path: &std::path::Path) -> Url {
  Url::parse(&format!("image://{}", path.display())).unwrap()
}

/// 写入输入 PNG，跑一遍单张任务，返回保存下来的 RGB 图像
fn run_oneshot(name: &str, prediction: Prediction) -> RgbImage {
  let dir = scratch_dir(name);
  let input_path = dir.join("people.png");
  let output_path = dir.join("annotated").join("people-mask.png");
  RgbImage::from_pixel(400, 300, Rgb(BACKGROUND_RGB))
    .save(&input_path)
    .unwrap();

  let input = ImageFileInput::from_url(&image_url(&input_path)).unwrap();
  let output = SaveImageFileOutput::from_url(&image_url(&output_path)).unwrap();
  let h = harness(vec![ONE_FACE], prediction);

  OneShotTask.run_task(input, h.detector, output).unwrap();

  let saved = image::open(&output_path).unwrap().to_rgb8();
  std::fs::remove_dir_all(&dir).unwrap();
  saved
}

#[test]
fn masked_face_box_is_green_in_saved_image() {
  let saved = run_oneshot("mask", Prediction { mask: 0.8, no_mask: 0.2 });

  assert_eq!(saved.dimensions(), (400, 300));
  assert_eq!(saved.get_pixel(100, 75).0, [0, 255, 0]);
  assert_eq!(saved.get_pixel(300, 225).0, [0, 255, 0]);
  // 框内与框外的像素保持原色
  assert_eq!(saved.get_pixel(200, 150).0, BACKGROUND_RGB);
  assert_eq!(saved.get_pixel(390, 290).0, BACKGROUND_RGB);
}

#[test]
fn bare_face_box_is_red_in_saved_image() {
  let saved = run_oneshot("no-mask", Prediction { mask: 0.3, no_mask: 0.7 });

  assert_eq!(saved.get_pixel(100, 75).0, [255, 0, 0]);
  assert_eq!(saved.get_pixel(200, 150).0, BACKGROUND_RGB);
}

#[test]
fn label_text_lands_above_the_box() {
  let saved = run_oneshot("label", Prediction { mask: 0.8, no_mask: 0.2 });

  let painted = (100..300)
    .flat_map(|x| (40..65).map(move |y| (x, y)))
    .filter(|&(x, y)| saved.get_pixel(x, y).0 != BACKGROUND_RGB)
    .count();
  assert!(painted > 0);
}

#[test]
fn image_input_yields_one_bgr_frame() {
  let dir = scratch_dir("single");
  let path = dir.join("one.png");
  RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])).save(&path).unwrap();

  let mut input = ImageFileInput::from_url(&image_url(&path)).unwrap();
  let frame = input.next().unwrap().unwrap();
  assert_eq!(frame.image().get_pixel(0, 0).0, [3, 2, 1]);
  assert!(input.next().is_none());
  std::fs::remove_dir_all(&dir).unwrap();
}
