// 该文件是 Mingjing （明镜） 项目的一部分。
// src/model/replay.rs - 回放已记录的模型输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::DynamicImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::InferenceParams,
  model::{ClassMap, DetectItem, DetectResult, Detector},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("第 {index} 个检测的掩码大小不匹配: {width}x{height} 需要 {expected} 个值，实际 {actual} 个")]
  MaskShape {
    index: usize,
    width: u32,
    height: u32,
    expected: usize,
    actual: usize,
  },
}

#[derive(Deserialize)]
struct Recording {
  #[serde(default)]
  names: ClassMap,
  #[serde(default)]
  detections: Vec<DetectItem>,
}

/// 从 JSON 记录中读取模型输出的检测器
///
/// 记录格式:
/// ```json
/// {
///   "names": { "0": "glioma", "1": "meningioma" },
///   "detections": [
///     { "class_id": 1, "score": 0.83, "bbox": [10, 12, 80, 90],
///       "mask": { "width": 128, "height": 128, "data": [0.0, ...] } }
///   ]
/// }
/// ```
///
/// 推理时会按照模型一侧的参数处理记录：置信度阈值、按类别的 NMS、最大检测数量。
#[derive(Debug, Clone)]
pub struct ReplayDetector {
  class_map: ClassMap,
  detections: Vec<DetectItem>,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayError::SchemeMismatch(url.scheme().to_string()));
    }

    Self::from_path(url.path())
  }
}

impl ReplayDetector {
  pub fn new(class_map: ClassMap, detections: Vec<DetectItem>) -> Self {
    Self {
      class_map,
      detections,
    }
  }

  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
    let path = path.as_ref();
    info!("加载检测记录: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json(&text)
  }

  pub fn from_json(text: &str) -> Result<Self, ReplayError> {
    let recording: Recording = serde_json::from_str(text)?;

    for (index, item) in recording.detections.iter().enumerate() {
      if let Some(mask) = &item.mask {
        let expected = mask.width as usize * mask.height as usize;
        if mask.data.len() != expected {
          return Err(ReplayError::MaskShape {
            index,
            width: mask.width,
            height: mask.height,
            expected,
            actual: mask.data.len(),
          });
        }
      }
    }

    debug!(
      "记录包含 {} 个类别, {} 个检测",
      recording.names.len(),
      recording.detections.len()
    );

    Ok(Self::new(recording.names, recording.detections))
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayError;

  fn infer(
    &self,
    _image: &DynamicImage,
    params: &InferenceParams,
  ) -> Result<DetectResult, Self::Error> {
    let mut candidates: Vec<&DetectItem> = self
      .detections
      .iter()
      .filter(|item| item.score >= params.conf_th)
      .collect();
    // 稳定排序，置信度相同时保留记录顺序
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<&DetectItem> = Vec::with_capacity(candidates.len());
    for item in candidates {
      if kept.len() >= params.max_det {
        break;
      }
      let suppressed = kept
        .iter()
        .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) > params.iou_th);
      if !suppressed {
        kept.push(item);
      }
    }

    debug!(
      "回放 {} 个检测中的 {} 个 (conf={:.2}, iou={:.2}, max_det={})",
      self.detections.len(),
      kept.len(),
      params.conf_th,
      params.iou_th,
      params.max_det
    );

    Ok(DetectResult::new(kept.into_iter().cloned().collect()))
  }

  fn class_map(&self) -> &ClassMap {
    &self.class_map
  }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);

  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let union = area(a) + area(b) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}
