// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame};

/// 推理引擎接口：工作分辨率图像输入，检测框与分割掩码输出
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [left, top, right, bottom]，工作分辨率像素坐标
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("掩码尺寸不匹配: {width}x{height} 需要 {expected} 字节, 实际 {actual} 字节")]
pub struct MaskSizeError {
  pub width: u32,
  pub height: u32,
  pub expected: usize,
  pub actual: usize,
}

/// 单个实例的分割掩码，逐像素存放类别值，0 表示背景
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMask {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl SegmentMask {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MaskSizeError> {
    let expected = width as usize * height as usize;
    if data.len() != expected {
      return Err(MaskSizeError {
        width,
        height,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn empty(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      data: vec![0u8; width as usize * height as usize].into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn get(&self, x: u32, y: u32) -> u8 {
    self.data[y as usize * self.width as usize + x as usize]
  }

  pub fn set(&mut self, x: u32, y: u32, value: u8) {
    self.data[y as usize * self.width as usize + x as usize] = value;
  }

  /// 按行优先顺序遍历非零像素 (x, y, value)
  pub fn iter_nonzero(&self) -> impl Iterator<Item = (u32, u32, u8)> + '_ {
    let width = self.width as usize;
    self
      .data
      .iter()
      .enumerate()
      .filter(|(_, v)| **v != 0)
      .map(move |(idx, v)| ((idx % width) as u32, (idx / width) as u32, *v))
  }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentResult {
  pub items: Box<[DetectItem]>,
  pub masks: Box<[SegmentMask]>,
}

impl SegmentResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty() && self.masks.is_empty()
  }
}

mod coco;
mod fixture;
mod passthrough;

pub use self::coco::{COCO_CLASSES, CocoLabel};
pub use self::fixture::{FixtureModel, FixtureModelError};
pub use self::passthrough::PassthroughModel;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放模型错误: {0}")]
  FixtureModelError(#[from] FixtureModelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 根据 URL 方案选择的推理引擎
pub enum ModelWrapper<const W: u32, const H: u32> {
  Passthrough(PassthroughModel<W, H>),
  Fixture(FixtureModel<W, H>),
}

impl<const W: u32, const H: u32> FromUrl for ModelWrapper<W, H> {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == PassthroughModel::<W, H>::SCHEME {
      return Ok(ModelWrapper::Passthrough(PassthroughModel::default()));
    }
    if url.scheme() == FixtureModel::<W, H>::SCHEME {
      return Ok(ModelWrapper::Fixture(FixtureModel::from_url(url)?));
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl<const W: u32, const H: u32> Model for ModelWrapper<W, H> {
  type Input = RgbNhwcFrame<W, H>;
  type Output = SegmentResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::Passthrough(model) => {
        let Ok(result) = model.infer(input);
        Ok(result)
      }
      ModelWrapper::Fixture(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
