// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 摄像头/视频输入
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

//! # GStreamer 视频输入模块
//!
//! 摄像头或视频文件经 GStreamer 解码为 BGR 帧。
//!
//! ## URL
//!
//! - `gst://camera/0`：按编号打开 `/dev/video0`
//! - `gst://camera/dev/video2`：按设备路径打开
//! - `gst://file/path/to/video.mp4`：读取视频文件
//!
//! 摄像头可附加 `width`、`height`、`fps`、`rotate` 查询参数。
//!
//! ## 缓冲
//!
//! 摄像头管道末端的 appsink 只保留一帧并丢弃旧帧，
//! 推理循环每次取到的都是最新画面。视频文件不丢帧。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::BgrFrame};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 摄像头编号或路径无法解析
  #[error("Invalid camera: {0}")]
  InvalidCamera(String),
  /// 摄像头不可用
  #[error("Camera {device} unavailable: {reason}")]
  CameraUnavailable { device: String, reason: String },
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    device: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        device,
        width,
        height,
        fps,
      } => {
        let mut caps = String::from("video/x-raw");
        if let Some(width) = width {
          caps.push_str(&format!(",width={}", width));
        }
        if let Some(height) = height {
          caps.push_str(&format!(",height={}", height));
        }
        if let Some(fps) = fps {
          caps.push_str(&format!(",framerate={}/1", fps));
        }
        format!("v4l2src device={} ! {}", device, caps)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// 将 URL 路径解析为 V4L2 设备路径
///
/// `/0` 对应 `/dev/video0`，`/dev/video2` 原样保留，空路径为默认摄像头。
pub fn camera_device_path(path: &str) -> Result<String, GStreamerInputError> {
  let trimmed = path.trim_start_matches('/');
  if trimmed.is_empty() {
    return Ok("/dev/video0".to_string());
  }
  if let Ok(index) = trimmed.parse::<u32>() {
    return Ok(format!("/dev/video{}", index));
  }
  if trimmed.starts_with("dev/") {
    return Ok(format!("/{}", trimmed));
  }
  Err(GStreamerInputError::InvalidCamera(path.to_string()))
}

/// 在启动管道前确认摄像头存在并可查询
fn probe_camera(device: &str) -> Result<(), GStreamerInputError> {
  let unavailable = |e: std::io::Error| GStreamerInputError::CameraUnavailable {
    device: device.to_string(),
    reason: e.to_string(),
  };

  let camera = v4l::Device::with_path(device).map_err(unavailable)?;
  let caps = camera.query_caps().map_err(unavailable)?;
  info!("摄像头 {}: {} ({})", device, caps.card, caps.driver);
  match camera.format() {
    Ok(format) => info!(
      "摄像头当前格式: {}x{} {}",
      format.width, format.height, format.fourcc
    ),
    Err(e) => warn!("无法查询摄像头格式: {}", e),
  }

  Ok(())
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  drop_frames: bool,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(
    path: &str,
    query: &HashMap<String, String>,
  ) -> Result<Self, GStreamerInputError> {
    let device = camera_device_path(path)?;
    probe_camera(&device)?;

    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      device,
      width: parse("width"),
      height: parse("height"),
      fps: parse("fps"),
    }];

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      items.push(video_flip);
    }

    Ok(GStreamerInputPipelineBuilder {
      items,
      drop_frames: true,
    })
  }

  fn build_file_pipeline(
    path: &str,
    query: &HashMap<String, String>,
  ) -> Result<Self, GStreamerInputError> {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      items.push(video_flip);
    }

    Ok(GStreamerInputPipelineBuilder {
      items,
      drop_frames: false,
    })
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink name=sink max-buffers=1 drop={} sync=false",
      basic_pipeline, self.drop_frames
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(url.path(), &query)?,
      Some("file") => Self::build_file_pipeline(url.path(), &query)?,
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "BGR".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 持有管道与 appsink，逐帧产生 BGR 图像；释放时停止管道并关闭设备。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      tracing::warn!("Failed to stop GStreamer pipeline: {}", e);
    } else {
      info!("输入管道已停止");
    }
  }
}

impl GStreamerInput {
  /// 取出总线上最近的错误消息
  fn pipeline_error(&self) -> String {
    self
      .pipeline
      .bus()
      .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
      .and_then(|message| match message.view() {
        gst::MessageView::Error(err) => Some(format!("{} ({:?})", err.error(), err.debug())),
        _ => None,
      })
      .unwrap_or_else(|| "Failed to pull sample".to_string())
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<BgrFrame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self.appsink.pull_sample() {
      Ok(sample) => Some(convert_sample_to_bgr(&sample)),
      Err(_) if self.appsink.is_eos() => {
        info!("输入流结束");
        None
      }
      Err(_) => {
        let reason = self.pipeline_error();
        error!("Failed to pull sample: {}", reason);
        Some(Err(GStreamerInputError::PipelineError(reason)))
      }
    }
  }
}

fn convert_sample_to_bgr(sample: &gst::Sample) -> Result<BgrFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row = width * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * height.saturating_sub(1) + row;
  if data.len() < expected_size || stride < row {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Bgr => false,
    gst_video::VideoFormat::Rgb => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  // 按行拷贝，去掉行尾对齐填充
  let mut pixels = Vec::with_capacity(row * height);
  for h in 0..height {
    let line = &data[h * stride..h * stride + row];
    if swap {
      for px in line.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }

  BgrFrame::from_bgr_bytes(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )
}
