// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/main.rs - 摄像头实时口罩检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use kouzhao::{
  FromUrl,
  input::InputWrapper,
  model::{FaceLocatorBuilder, MaskClassifierBuilder, MaskDetector},
  output::OutputWrapper,
  task::{ContinuousTask, DEFAULT_MAX_WIDTH, Task},
};
use tracing::info;

/// Kouzhao 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 人脸检测模型（网络结构与权重）
  #[arg(
    long,
    value_name = "MODEL",
    default_value = "ssd:face_detector/deploy.onnx?weights=face_detector/res10_300x300_ssd_iter_140000.onnx.data"
  )]
  pub detector: Url,
  /// 口罩分类模型
  #[arg(long, value_name = "MODEL", default_value = "mobilenet:mask_detector.onnx")]
  pub classifier: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE", default_value = "gst://camera/0")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "gst://display")]
  pub output: Url,
  /// 人脸置信度阈值 (0.0 - 1.0)，覆盖模型 URL 中的设置
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,
  /// 帧按比例缩放到的宽度
  #[arg(long, value_name = "PIXELS", default_value_t = DEFAULT_MAX_WIDTH)]
  pub max_width: u32,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("人脸检测模型: {}", args.detector);
  info!("口罩分类模型: {}", args.classifier);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut locator = FaceLocatorBuilder::from_url(&args.detector)?;
  if let Some(confidence) = args.confidence {
    locator = locator.confidence(confidence);
  }
  let model = MaskDetector::new(
    locator.build()?,
    MaskClassifierBuilder::from_url(&args.classifier)?.build()?,
  );

  info!("正在打开视频流...");
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_max_width(args.max_width)
    .run_task(input, model, output)?;

  Ok(())
}
