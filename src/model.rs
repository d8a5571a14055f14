// 该文件是 Mingjing （明镜） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::BTreeMap;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::InferenceParams;

/// 检测模型（外部推理能力）
pub trait Detector {
  type Error;

  fn infer(
    &self,
    image: &DynamicImage,
    params: &InferenceParams,
  ) -> Result<DetectResult, Self::Error>;
  fn class_map(&self) -> &ClassMap;
}

/// 类别编号到类别名称的映射，由加载的权重决定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMap(BTreeMap<u32, String>);

impl ClassMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn name(&self, class_id: u32) -> Option<&str> {
    self.0.get(&class_id).map(String::as_str)
  }

  pub fn contains(&self, class_id: u32) -> bool {
    self.0.contains_key(&class_id)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// 按编号升序遍历
  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self.0.iter().map(|(id, name)| (*id, name.as_str()))
  }

  pub fn smallest_id(&self) -> Option<u32> {
    self.0.keys().next().copied()
  }
}

impl<S: Into<String>> FromIterator<(u32, S)> for ClassMap {
  fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(id, name)| (id, name.into())).collect())
  }
}

/// 实例分割掩码，按行存储，与原图像素对齐
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
  pub width: u32,
  pub height: u32,
  pub data: Box<[f32]>,
}

impl Mask {
  pub fn new(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
    if data.len() != width as usize * height as usize {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 超过阈值的像素数
  pub fn area(&self, threshold: f32) -> u32 {
    self.data.iter().filter(|&&v| v > threshold).count() as u32
  }

  pub fn any_above(&self, threshold: f32) -> bool {
    self.data.iter().any(|&v| v > threshold)
  }

  /// 遍历超过阈值的像素坐标 (x, y)
  pub fn pixels_above(&self, threshold: f32) -> impl Iterator<Item = (u32, u32)> + '_ {
    let width = self.width.max(1);
    self
      .data
      .iter()
      .enumerate()
      .filter(move |(_, v)| **v > threshold)
      .map(move |(idx, _)| (idx as u32 % width, idx as u32 / width))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  #[serde(default)]
  pub mask: Option<Mask>,
}

impl DetectItem {
  pub fn new(class_id: u32, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      class_id,
      score,
      bbox,
      mask: None,
    }
  }

  pub fn with_mask(mut self, mask: Mask) -> Self {
    self.mask = Some(mask);
    self
  }
}

/// 一次推理的全部检测结果，顺序与模型输出一致
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
  has_masks: bool,
}

impl DetectResult {
  /// 只要有任一实例带掩码，即认为该结果带有分割输出
  pub fn new(items: Vec<DetectItem>) -> Self {
    let has_masks = items.iter().any(|item| item.mask.is_some());
    Self {
      items: items.into_boxed_slice(),
      has_masks,
    }
  }

  pub fn has_masks(&self) -> bool {
    self.has_masks
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[cfg(feature = "model_replay")]
mod replay;
#[cfg(feature = "model_replay")]
pub use self::replay::{ReplayDetector, ReplayError};
