// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

/// 将推理结果绘制到图像上
pub trait Render<Image, Output> {
  type Error;
  fn render_result(&self, image: &mut Image, result: &Output) -> Result<(), Self::Error>;
}

pub mod codec;
pub mod draw;
pub mod palette;

pub use self::codec::{ImageCodecError, OutputFormat, decode_image, encode_image};
pub use self::draw::{Draw, DrawError, RenderError, load_font};
pub use self::palette::{PALETTE, PALETTE_SIZE, color_index};
