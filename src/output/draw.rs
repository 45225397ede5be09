// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/output/draw.rs - 检测与分割结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  model::{CocoLabel, DetectItem, SegmentMask, SegmentResult, WithLabel},
  output::{Render, palette::palette_color},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const MASK_ALPHA: f32 = 0.5;

/// 未指定字体时依次尝试的系统字体
const FALLBACK_FONTS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体读取错误 {0}: {1}")]
  FontIoError(PathBuf, std::io::Error),
  #[error("字体无效 {0}: {1}")]
  FontInvalid(PathBuf, ab_glyph::InvalidFont),
  #[error("未找到可用字体，请通过 --font 指定 TrueType 字体")]
  FontNotFound,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RenderError {
  #[error("掩码尺寸 {actual:?} 与工作分辨率 {expected:?} 不一致 (实例 {index})")]
  MaskShapeMismatch {
    index: usize,
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

fn read_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|e| DrawError::FontIoError(path.to_path_buf(), e))?;
  FontArc::try_from_vec(data).map_err(|e| DrawError::FontInvalid(path.to_path_buf(), e))
}

fn find_font<'a>(
  path: Option<&Path>,
  candidates: impl IntoIterator<Item = &'a Path>,
) -> Result<FontArc, DrawError> {
  if let Some(path) = path {
    info!("加载字体: {}", path.display());
    return read_font(path);
  }

  for candidate in candidates {
    if !candidate.exists() {
      continue;
    }
    match read_font(candidate) {
      Ok(font) => {
        info!("使用系统字体: {}", candidate.display());
        return Ok(font);
      }
      Err(e) => debug!("跳过字体 {}", e),
    }
  }

  Err(DrawError::FontNotFound)
}

/// 加载标签字体。未指定路径时在常见系统路径中查找，都不可用时返回 [`DrawError::FontNotFound`]。
pub fn load_font(path: Option<&Path>) -> Result<FontArc, DrawError> {
  find_font(path, FALLBACK_FONTS.iter().map(Path::new))
}

/// 工作分辨率坐标到原图坐标的映射：向下取整并钳制到图像范围内
#[derive(Debug, Clone, Copy)]
struct Scale {
  sx: f32,
  sy: f32,
  max_x: u32,
  max_y: u32,
}

impl Scale {
  fn new(original: (u32, u32), working: (u32, u32)) -> Self {
    Self {
      sx: original.0 as f32 / working.0 as f32,
      sy: original.1 as f32 / working.1 as f32,
      max_x: original.0.saturating_sub(1),
      max_y: original.1.saturating_sub(1),
    }
  }

  // `as u32` 对负数与 NaN 饱和为 0
  fn map_x(&self, x: f32) -> u32 {
    ((x * self.sx).floor() as u32).min(self.max_x)
  }

  fn map_y(&self, y: f32) -> u32 {
    ((y * self.sy).floor() as u32).min(self.max_y)
  }
}

/// 标签文本：类别名与一位小数的百分比置信度，如 `person 87.6%`
fn label_text(item: &DetectItem) -> String {
  format!(
    "{} {:.1}%",
    CocoLabel::from_label_id(item.class_id).to_label_str(),
    item.score * 100.0
  )
}

fn blend(color: u8, base: u8, alpha: f32) -> u8 {
  (color as f32 * (1.0 - alpha) + base as f32 * alpha)
    .clamp(0.0, 255.0)
    .round() as u8
}

pub struct Draw {
  working_size: (u32, u32),
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  box_color: [u8; 3],
  mask_alpha: f32,
}

impl Draw {
  pub fn new(working_width: u32, working_height: u32, font: Option<FontArc>) -> Self {
    if font.is_none() {
      warn!("未加载字体，标签只绘制背景色块");
    }

    Self {
      working_size: (working_width, working_height),
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      box_color: BOX_COLOR,
      mask_alpha: MASK_ALPHA,
    }
  }

  fn check_masks(&self, masks: &[SegmentMask]) -> Result<(), RenderError> {
    for (index, mask) in masks.iter().enumerate() {
      let actual = (mask.width(), mask.height());
      if actual != self.working_size {
        return Err(RenderError::MaskShapeMismatch {
          index,
          expected: self.working_size,
          actual,
        });
      }
    }
    Ok(())
  }

  /// 按实例顺序混合掩码。混合总是以原图像素为底色，
  /// 因此同一像素被多次命中时结果不变，实例重叠时列表中靠后的实例生效。
  fn blend_masks(&self, image: &mut RgbImage, masks: &[SegmentMask]) {
    if masks.is_empty() {
      return;
    }

    let scale = Scale::new(image.dimensions(), self.working_size);
    let base = image.clone();

    for mask in masks {
      for (x, y, value) in mask.iter_nonzero() {
        let ox = scale.map_x(x as f32);
        let oy = scale.map_y(y as f32);
        let color = palette_color(value as u32);
        let original = base.get_pixel(ox, oy);

        let pixel = image.get_pixel_mut(ox, oy);
        for ch in 0..3 {
          pixel[ch] = blend(color[ch], original[ch], self.mask_alpha);
        }
      }
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, scale: &Scale, item: &DetectItem) {
    let x1 = scale.map_x(item.bbox[0]);
    let y1 = scale.map_y(item.bbox[1]);
    let x2 = scale.map_x(item.bbox[2]);
    let y2 = scale.map_y(item.bbox[3]);
    let (x_min, x_max) = (x1.min(x2), x1.max(x2));
    let (y_min, y_max) = (y1.min(y2), y1.max(y2));

    let width = x_max - x_min + 1;
    let height = y_max - y_min + 1;
    let color = Rgb(self.box_color);

    // 绘制边框（加粗为2像素）
    let rect = Rect::at(x_min as i32, y_min as i32).of_size(width, height);
    draw_hollow_rect_mut(image, rect, color);
    if width > 2 && height > 2 {
      let inner = Rect::at(x_min as i32 + 1, y_min as i32 + 1).of_size(width - 2, height - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let label = label_text(item);

    // 标签放在框上方，不超出图像上边界
    let label_x = x_min as i32;
    let label_y = (y_min as i32 - self.label_text_height).max(0);

    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let max_width = (image.width() as i32 - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = (self.label_text_height as u32).min(image.height());

    if label_width > 0 && label_height > 0 {
      let background = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, background, color);

      if let Some(font) = &self.font {
        draw_text_mut(
          image,
          Rgb(TEXT_COLOR),
          label_x,
          label_y + self.label_text_vertical_padding,
          PxScale::from(self.font_size),
          font,
          &label,
        );
      }
    }
  }
}

impl Render<RgbImage, SegmentResult> for Draw {
  type Error = RenderError;

  fn render_result(&self, image: &mut RgbImage, result: &SegmentResult) -> Result<(), Self::Error> {
    self.check_masks(&result.masks)?;

    if image.width() == 0 || image.height() == 0 {
      return Ok(());
    }

    self.blend_masks(image, &result.masks);

    let scale = Scale::new(image.dimensions(), self.working_size);
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, &scale, item);
    }

    debug!(
      "绘制完成: {} 个检测框, {} 个掩码",
      result.items.len(),
      result.masks.len()
    );
    Ok(())
  }
}
