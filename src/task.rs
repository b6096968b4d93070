// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/task.rs - 推理任务
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

use std::{
  sync::mpsc::{Receiver, channel},
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
  frame::BgrFrame,
  model::{MaskDetectResult, Model},
  output::{Render, RenderEvent},
};

pub const DEFAULT_MAX_WIDTH: u32 = 400;
pub const QUIT_KEY: &str = "q";

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  FE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<BgrFrame, FE>>,
  M: Model<Input = BgrFrame, Output = MaskDetectResult, Error = ME>,
  O: Render<BgrFrame, MaskDetectResult, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}，检测到 {} 张人脸", elapsed, result.len());
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 循环停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  QuitKey,
  Interrupted,
  DisplayClosed,
  FrameLimit,
  InputExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Running,
  Stopped(StopReason),
}

/// 每帧结束后检查停止条件
fn next_state(
  event: Option<RenderEvent>,
  interrupted: bool,
  frame_index: usize,
  frame_number: Option<usize>,
) -> LoopState {
  match event {
    Some(RenderEvent::Key(key)) if key == QUIT_KEY => return LoopState::Stopped(StopReason::QuitKey),
    Some(RenderEvent::Closed) => return LoopState::Stopped(StopReason::DisplayClosed),
    _ => {}
  }
  if interrupted {
    return LoopState::Stopped(StopReason::Interrupted);
  }
  if frame_number.is_some_and(|n| frame_index >= n) {
    return LoopState::Stopped(StopReason::FrameLimit);
  }
  LoopState::Running
}

/// 摄像头实时推理循环
///
/// 每帧：取帧、按比例缩放到固定宽度、检测与分类、渲染、检查一次按键。
/// 按下 `q`、Ctrl-C、关闭窗口、达到帧数上限或输入结束时退出。
#[derive(Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  max_width: u32,
  handle_ctrlc: bool,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      max_width: DEFAULT_MAX_WIDTH,
      handle_ctrlc: true,
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_max_width(mut self, max_width: u32) -> Self {
    self.max_width = max_width;
    self
  }

  /// 是否安装 Ctrl-C 处理器（进程内只能安装一次）
  pub fn with_ctrlc(mut self, handle_ctrlc: bool) -> Self {
    self.handle_ctrlc = handle_ctrlc;
    self
  }

  fn install_ctrlc() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    Ok(rx)
  }
}

impl<
  FE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<BgrFrame, FE>>,
  M: Model<Input = BgrFrame, Output = MaskDetectResult, Error = ME>,
  O: Render<BgrFrame, MaskDetectResult, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = if self.handle_ctrlc {
      Some(Self::install_ctrlc()?)
    } else {
      None
    };

    let mut frame_index = 0usize;
    let mut total_faces = 0usize;
    let mut state = LoopState::Running;

    while state == LoopState::Running {
      let Some(frame) = input.next() else {
        state = LoopState::Stopped(StopReason::InputExhausted);
        break;
      };
      let now = Instant::now();
      let frame = frame?.resize_to_width(self.max_width);
      frame_index = frame_index.saturating_add(1);
      debug!("处理第 {} 帧图像 {}x{}", frame_index, frame.width(), frame.height());

      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      total_faces += result.len();
      info!(
        "第 {} 帧: {} 张人脸，推理耗时: {:.2?} / {:.2?}",
        frame_index,
        result.len(),
        elapsed_a,
        elapsed_b
      );

      let interrupted = interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok());
      state = next_state(output.poll_event(), interrupted, frame_index, self.frame_number);
    }

    match state {
      LoopState::Stopped(StopReason::QuitKey) => info!("按下 {}，退出任务循环", QUIT_KEY),
      LoopState::Stopped(StopReason::Interrupted) => warn!("中断信号接收，退出任务循环"),
      LoopState::Stopped(StopReason::DisplayClosed) => warn!("显示窗口已关闭，退出任务循环"),
      LoopState::Stopped(StopReason::FrameLimit) => {
        info!("达到指定帧数 {}, 退出任务循环", frame_index)
      }
      LoopState::Stopped(StopReason::InputExhausted) => info!("输入结束，退出任务循环"),
      LoopState::Running => {}
    }

    info!(
      "任务完成，共处理 {} 帧，检测到 {} 张人脸",
      frame_index, total_faces
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  #[case(Some(RenderEvent::Key("q".into())), false, 1, None, LoopState::Stopped(StopReason::QuitKey))]
  #[case(Some(RenderEvent::Key("a".into())), false, 1, None, LoopState::Running)]
  #[case(Some(RenderEvent::Closed), false, 1, None, LoopState::Stopped(StopReason::DisplayClosed))]
  #[case(None, true, 1, None, LoopState::Stopped(StopReason::Interrupted))]
  #[case(None, false, 5, Some(5), LoopState::Stopped(StopReason::FrameLimit))]
  #[case(None, false, 4, Some(5), LoopState::Running)]
  fn stop_conditions(
    #[case] event: Option<RenderEvent>,
    #[case] interrupted: bool,
    #[case] frame_index: usize,
    #[case] frame_number: Option<usize>,
    #[case] expected: LoopState,
  ) {
    assert_eq!(next_state(event, interrupted, frame_index, frame_number), expected);
  }
}
