// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, time::Duration};

use ab_glyph::FontArc;
use clap::{Parser, ValueEnum};
use tracing::warn;
use url::Url;

use segrelay::{
  output::{DrawError, OutputFormat, load_font},
  protocol::DEFAULT_MAX_MESSAGE_SIZE,
  session::SessionConfig,
};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ImageKind {
  Jpeg,
  Png,
}

/// SegRelay 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分发服务器 WebSocket 地址
  #[arg(long, value_name = "URL", default_value = "ws://127.0.0.1:8080/ws_connect")]
  pub server: Url,

  /// 推理模型
  /// 支持格式:
  /// - passthrough:            不做检测，原图返回
  /// - fixture:///path.json    从 JSON 文件回放检测结果
  #[arg(long, value_name = "MODEL", default_value = "passthrough:///")]
  pub model: Url,

  /// 标签字体 (TrueType)，不指定时查找常见系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 找不到字体时继续运行，标签只绘制背景色块
  #[arg(long)]
  pub allow_missing_font: bool,

  /// 返回图像格式
  #[arg(long, value_enum, default_value = "jpeg")]
  pub output_format: ImageKind,

  /// JPEG 质量 (1 - 100)
  #[arg(long, default_value = "90", value_parser = clap::value_parser!(u8).range(1..=100))]
  pub jpeg_quality: u8,

  /// 单条消息最大字节数，超出时断开会话
  #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE, value_name = "BYTES")]
  pub max_message_bytes: usize,

  /// 等待处理的请求队列长度
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub queue_depth: usize,

  /// 传输层轮询间隔（毫秒）
  #[arg(long, default_value = "100", value_name = "MS")]
  pub poll_interval_ms: u64,
}

impl Args {
  pub fn output_format(&self) -> OutputFormat {
    match self.output_format {
      ImageKind::Jpeg => OutputFormat::Jpeg {
        quality: self.jpeg_quality,
      },
      ImageKind::Png => OutputFormat::Png,
    }
  }

  pub fn session_config(&self) -> SessionConfig {
    SessionConfig {
      max_message_size: self.max_message_bytes,
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  /// 标签字体。显式指定的字体总是必须可用；只有系统字体缺失且允许时返回 `None`。
  pub fn label_font(&self) -> Result<Option<FontArc>, DrawError> {
    match load_font(self.font.as_deref()) {
      Ok(font) => Ok(Some(font)),
      Err(DrawError::FontNotFound) if self.allow_missing_font => {
        warn!("未找到字体，标签不绘制文字");
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }
}
