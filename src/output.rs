// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output.rs - 输出定义
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
use url::Url;

use crate::FromUrl;
use crate::frame::BgrFrame;
use crate::model::MaskDetectResult;

/// 渲染端在每帧之后可报告的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
  /// 显示窗口中的按键
  Key(String),
  /// 显示窗口已关闭或显示管道结束
  Closed,
}

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;

  /// 取出一个待处理事件，没有则返回 `None`
  fn poll_event(&self) -> Option<RenderEvent> {
    None
  }
}

pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display_output::{GStreamerDisplayOutput, GStreamerDisplayOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayOutputError(#[from] GStreamerDisplayOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(any(feature = "save_image_file", feature = "gstreamer_output"))]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => {
        let output = GStreamerDisplayOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerDisplayOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<BgrFrame, MaskDetectResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &BgrFrame, result: &MaskDetectResult) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }

  fn poll_event(&self) -> Option<RenderEvent> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.poll_event(),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output.poll_event(),
    }
  }
}
