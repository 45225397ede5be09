// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/model/fixture.rs - 回放模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{DetectItem, Model, SegmentMask, SegmentResult},
};

#[derive(Error, Debug)]
pub enum FixtureModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("回放文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("回放文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
  #[serde(default)]
  detections: Vec<DetectItem>,
}

/// 从 JSON 文件回放固定检测结果的模型。
///
/// 每个检测框在工作分辨率下光栅化为一个矩形掩码，掩码值为
/// `class_id % 255 + 1`（总是非零，类别 254 之后回绕），用于在没有 NPU 的机器上联调整条链路。
///
/// ```json
/// { "detections": [ { "class_id": 0, "score": 0.91, "bbox": [32, 48, 300, 600] } ] }
/// ```
#[derive(Debug, Clone)]
pub struct FixtureModel<const W: u32, const H: u32> {
  items: Box<[DetectItem]>,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for FixtureModel<W, H> {
  const SCHEME: &'static str = "fixture";
}

impl<const W: u32, const H: u32> FromUrl for FixtureModel<W, H> {
  type Error = FixtureModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FixtureModelError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    info!("加载回放文件: {}", url.path());
    let content = std::fs::read(url.path())?;
    let model = Self::from_json(&content)?;
    info!("回放文件加载完成，共 {} 个检测", model.items.len());
    Ok(model)
  }
}

impl<const W: u32, const H: u32> FixtureModel<W, H> {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn from_json(content: &[u8]) -> Result<Self, FixtureModelError> {
    let file: FixtureFile = serde_json::from_slice(content)?;
    Ok(Self::new(file.detections))
  }

  fn mask_value(class_id: u32) -> u8 {
    (class_id % u8::MAX as u32) as u8 + 1
  }

  fn rasterize(item: &DetectItem) -> SegmentMask {
    let mut mask = SegmentMask::empty(W, H);
    let value = Self::mask_value(item.class_id);

    let x_min = item.bbox[0].max(0.0).floor() as u32;
    let y_min = item.bbox[1].max(0.0).floor() as u32;
    let x_max = (item.bbox[2].max(0.0).ceil() as u32).min(W);
    let y_max = (item.bbox[3].max(0.0).ceil() as u32).min(H);

    for y in y_min..y_max {
      for x in x_min..x_max {
        mask.set(x, y, value);
      }
    }
    mask
  }
}

impl<const W: u32, const H: u32> Model for FixtureModel<W, H> {
  type Input = RgbNhwcFrame<W, H>;
  type Output = SegmentResult;
  type Error = FixtureModelError;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let masks: Vec<SegmentMask> = self.items.iter().map(Self::rasterize).collect();
    debug!("回放 {} 个检测结果", self.items.len());

    Ok(SegmentResult {
      items: self.items.clone(),
      masks: masks.into_boxed_slice(),
    })
  }
}

#[cfg(test)]
mod tests {
  use rstest::rstest;

  use super::*;

  #[rstest]
  #[case(0, 1)]
  #[case(79, 80)]
  #[case(253, 254)]
  #[case(254, 255)]
  #[case(255, 1)]
  #[case(509, 255)]
  fn mask_value_wraps_after_254(#[case] class_id: u32, #[case] expected: u8) {
    assert_eq!(FixtureModel::<4, 4>::mask_value(class_id), expected);
  }

  #[test]
  fn parses_fixture_file() {
    let json = br#"{"detections":[{"class_id":2,"score":0.5,"bbox":[1.0,1.0,3.0,2.0]}]}"#;
    let model = FixtureModel::<4, 4>::from_json(json).unwrap();
    let result = model.infer(&RgbNhwcFrame::default()).unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.masks.len(), 1);
    let pixels: Vec<_> = result.masks[0].iter_nonzero().collect();
    assert_eq!(pixels, vec![(1, 1, 3), (2, 1, 3)]);
  }

  #[test]
  fn boxes_outside_the_frame_are_clipped() {
    let model = FixtureModel::<4, 4>::new(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [-5.0, 2.0, 40.0, 40.0],
    }]);
    let result = model.infer(&RgbNhwcFrame::default()).unwrap();
    assert_eq!(result.masks[0].iter_nonzero().count(), 8);
  }

  #[test]
  fn missing_detections_key_means_empty() {
    let model = FixtureModel::<4, 4>::from_json(b"{}").unwrap();
    assert!(model.infer(&RgbNhwcFrame::default()).unwrap().is_empty());
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("passthrough:///x.json").unwrap();
    assert!(matches!(
      FixtureModel::<4, 4>::from_url(&url),
      Err(FixtureModelError::SchemeMismatch(_))
    ));
  }
}
