// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/lib.rs - 库主文件
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

#[cfg(not(any(feature = "read_image_file", feature = "gstreamer_input")))]
compile_error!("至少需要启用一个输入特性: read_image_file 或 gstreamer_input");

#[cfg(not(any(feature = "save_image_file", feature = "gstreamer_output")))]
compile_error!("至少需要启用一个输出特性: save_image_file 或 gstreamer_output");

pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 读取 URL 查询参数并解析为指定类型，缺省或无法解析时返回 `None`
pub(crate) fn query_param<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<T> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse::<T>().ok())
}
