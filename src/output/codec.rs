// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/output/codec.rs - 图像编解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::Cursor;

use image::{ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum ImageCodecError {
  #[error("图像解码错误: {0}")]
  Decode(image::ImageError),
  #[error("图像编码错误: {0}")]
  Encode(image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
  Jpeg { quality: u8 },
  Png,
}

impl Default for OutputFormat {
  fn default() -> Self {
    OutputFormat::Jpeg {
      quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

/// 解码任意支持格式的图像，统一转为 RGB
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ImageCodecError> {
  let image = image::load_from_memory(bytes).map_err(ImageCodecError::Decode)?;
  Ok(image.to_rgb8())
}

pub fn encode_image(image: &RgbImage, format: OutputFormat) -> Result<Vec<u8>, ImageCodecError> {
  let mut bytes = Vec::new();
  match format {
    OutputFormat::Jpeg { quality } => {
      let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
      image
        .write_with_encoder(encoder)
        .map_err(ImageCodecError::Encode)?;
    }
    OutputFormat::Png => {
      image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(ImageCodecError::Encode)?;
    }
  }
  Ok(bytes)
}
