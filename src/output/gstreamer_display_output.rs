// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/gstreamer_display_output.rs - GStreamer 窗口显示输出
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

//! # GStreamer 窗口显示
//!
//! 将标注后的帧推送到本地窗口（`autovideosink`）。
//!
//! ## URL Scheme
//!
//! `gst://display`，可选参数：
//!
//! - `sink`: 显示元素，默认 `autovideosink`
//! - `font`: 标签字体文件
//!
//! ## 键盘输入
//!
//! 窗口中的按键以导航事件形式沿管道上行，
//! 在 appsrc 的 src pad 上挂探针截获后放入通道，推理循环每帧清空一次通道。

use std::sync::{
  Mutex,
  mpsc::{Receiver, TryRecvError, channel},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::BgrFrame,
  model::MaskDetectResult,
  output::{
    Render, RenderEvent,
    draw::{Draw, DrawError},
  },
  task::QUIT_KEY,
};

const DEFAULT_DISPLAY_SINK: &str = "autovideosink";

/// GStreamer 显示输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Flow error: {0:?}")]
  FlowError(gst::FlowError),
  #[error("Label font error: {0}")]
  DrawError(#[from] DrawError),
}

pub struct GStreamerDisplayOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  keys: Mutex<Receiver<String>>,
  caps_size: Mutex<Option<(u32, u32)>>,
  frame_count: Mutex<u64>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "gst";
}

pub fn display_pipeline_description(sink: &str) -> String {
  format!(
    "appsrc name=src is-live=true do-timestamp=true format=time ! videoconvert ! {} sync=false",
    sink
  )
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("display") {
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }

    gst::init()?;

    let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
    let sink = query
      .get("sink")
      .map(|s| s.to_string())
      .unwrap_or_else(|| DEFAULT_DISPLAY_SINK.to_string());
    let draw = Draw::from_font_option(query.get("font").map(|f| f.as_ref()))?;

    let pipeline_desc = display_pipeline_description(&sink);
    info!("Creating display pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerDisplayOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;

    let (tx, rx) = channel();
    let src_pad = appsrc
      .static_pad("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?;
    src_pad.add_probe(gst::PadProbeType::EVENT_UPSTREAM, move |_, probe_info| {
      if let Some(gst::PadProbeData::Event(ref event)) = probe_info.data
        && event.type_() == gst::EventType::Navigation
        && let Ok(gst_video::NavigationEvent::KeyPress { key, .. }) =
          gst_video::NavigationEvent::parse(event)
      {
        debug!("显示窗口按键: {}", key);
        let _ = tx.send(key);
      }
      gst::PadProbeReturn::Ok
    });

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开");

    Ok(GStreamerDisplayOutput {
      pipeline,
      appsrc,
      draw,
      keys: Mutex::new(rx),
      caps_size: Mutex::new(None),
      frame_count: Mutex::new(0),
    })
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }

    let frames = self.frame_count.lock().map(|count| *count).unwrap_or_default();
    info!("显示窗口已关闭，共显示 {} 帧", frames);
  }
}

fn lock_error<T>(_: std::sync::PoisonError<T>) -> GStreamerDisplayOutputError {
  GStreamerDisplayOutputError::PipelineError("Display state lock poisoned".to_string())
}

impl GStreamerDisplayOutput {
  /// 帧尺寸变化时更新 appsrc 的 caps
  fn ensure_caps(&self, width: u32, height: u32) -> Result<(), GStreamerDisplayOutputError> {
    let mut size = self.caps_size.lock().map_err(lock_error)?;
    if *size == Some((width, height)) {
      return Ok(());
    }

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "BGR")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(0, 1))
      .build();
    self.appsrc.set_caps(Some(&caps));
    info!("显示尺寸: {}x{}", width, height);
    *size = Some((width, height));
    Ok(())
  }

  fn push_frame(&self, frame: &BgrFrame) -> Result<(), GStreamerDisplayOutputError> {
    self.ensure_caps(frame.width(), frame.height())?;

    let buffer = gst::Buffer::from_mut_slice(frame.as_bgr().to_vec());
    self
      .appsrc
      .push_buffer(buffer)
      .map_err(GStreamerDisplayOutputError::FlowError)?;

    *self.frame_count.lock().map_err(lock_error)? += 1;
    Ok(())
  }
}

impl Render<BgrFrame, MaskDetectResult> for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render_result(&self, frame: &BgrFrame, result: &MaskDetectResult) -> Result<(), Self::Error> {
    let frame = self.draw.draw_detection(frame, result);
    self.push_frame(&frame)
  }

  fn poll_event(&self) -> Option<RenderEvent> {
    if let Some(bus) = self.pipeline.bus()
      && let Some(message) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])
    {
      if let gst::MessageView::Error(err) = message.view() {
        warn!("显示管道错误: {}", err.error());
      }
      return Some(RenderEvent::Closed);
    }

    let keys = self.keys.lock().ok()?;
    drain_keys(&keys)
  }
}

/// 取出通道中积压的全部按键
///
/// 其中有退出键时返回退出键，否则返回最早的一个按键。
fn drain_keys(keys: &Receiver<String>) -> Option<RenderEvent> {
  let mut first = None;
  loop {
    match keys.try_recv() {
      Ok(key) if key == QUIT_KEY => return Some(RenderEvent::Key(key)),
      Ok(key) => {
        first.get_or_insert(RenderEvent::Key(key));
      }
      Err(TryRecvError::Empty) => return first,
      Err(TryRecvError::Disconnected) => return first.or(Some(RenderEvent::Closed)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_pipeline_uses_requested_sink() {
    assert_eq!(
      display_pipeline_description("xvimagesink"),
      "appsrc name=src is-live=true do-timestamp=true format=time ! videoconvert ! xvimagesink sync=false"
    );
  }

  #[test]
  fn quit_key_behind_other_keys_is_reported() {
    let (tx, rx) = channel();
    for key in ["a", "Left", "q", "b"] {
      tx.send(key.to_string()).unwrap();
    }
    assert_eq!(drain_keys(&rx), Some(RenderEvent::Key("q".to_string())));
  }

  #[test]
  fn without_quit_key_first_key_is_reported_and_queue_drained() {
    let (tx, rx) = channel();
    tx.send("a".to_string()).unwrap();
    tx.send("b".to_string()).unwrap();
    assert_eq!(drain_keys(&rx), Some(RenderEvent::Key("a".to_string())));
    assert_eq!(drain_keys(&rx), None);
    drop(tx);
    assert_eq!(drain_keys(&rx), Some(RenderEvent::Closed));
  }
}
