// 该文件是 Mingjing （明镜） 项目的一部分。
// src/decision.rs - 二分类判决
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

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::{
  config::DecisionConfig,
  model::{ClassMap, DetectItem, DetectResult},
};

/// 单张图像的判决结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
  pub has_condition: bool,
  pub confidence: f32,
  pub diagnostics: DiagnosticReport,
}

/// 判决过程中各阶段的计数，仅用于日志与排查，不参与判决
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
  /// 全部检测数量（不区分类别）
  pub raw_detections: usize,
  pub tumor_detections_before_filter: usize,
  pub removed_by_min_area: usize,
  pub removed_by_class: usize,
  pub tumor_detections_after_filter: usize,
  /// 所有类别中的最高置信度
  pub max_confidence_raw: f32,
  /// 通过过滤的阳性类别中的最高置信度
  pub max_confidence_tumor: f32,
  /// 通过面积过滤的掩码数量
  pub mask_count: usize,
  pub avg_mask_area: u32,
  pub tumor_class_idx: u32,
  pub model_names: ClassMap,
  /// 本次结果中出现过的类别，升序
  pub classes_present: Vec<u32>,
  /// 是否实际执行了掩码面积过滤
  pub mask_filtering_active: bool,
}

#[derive(Default)]
struct Tally {
  before: usize,
  removed_by_area: usize,
  removed_by_class: usize,
  after: usize,
  max_raw: f32,
  best: f32,
  has_condition: bool,
  mask_areas: Vec<u32>,
}

impl Tally {
  fn observe(&mut self, item: &DetectItem, positive_class_id: u32, area_filter: Option<(u32, f32)>) {
    if item.score > self.max_raw {
      self.max_raw = item.score;
    }

    if item.class_id != positive_class_id {
      self.removed_by_class += 1;
      return;
    }
    self.before += 1;

    if let (Some((min_area, threshold)), Some(mask)) = (area_filter, &item.mask) {
      let area = mask.area(threshold);
      if area < min_area {
        debug!(
          "类别 {} 置信度 {:.3} 的掩码面积 {} 小于 {}，已过滤",
          item.class_id, item.score, area, min_area
        );
        self.removed_by_area += 1;
        return;
      }
      self.mask_areas.push(area);
    }

    self.after += 1;
    if item.score > self.best {
      self.best = item.score;
      self.has_condition = true;
    }
  }

  fn avg_mask_area(&self) -> u32 {
    if self.mask_areas.is_empty() {
      return 0;
    }
    let total: u64 = self.mask_areas.iter().map(|&a| a as u64).sum();
    (total / self.mask_areas.len() as u64) as u32
  }
}

/// 将一次推理的全部检测归约为“是否有肿瘤”的判决
///
/// 结果带有掩码且 `min_mask_area > 0` 时按掩码面积过滤；否则只按类别过滤。
/// 置信度取通过过滤的阳性检测中的最大值，没有阳性检测时为 0。
pub fn decide(
  detections: &DetectResult,
  positive_class_id: u32,
  class_map: &ClassMap,
  config: &DecisionConfig,
) -> Verdict {
  let mask_filtering_active = detections.has_masks() && config.min_mask_area > 0;
  let area_filter = mask_filtering_active.then_some((config.min_mask_area, config.mask_threshold));

  let mut tally = Tally::default();
  for item in detections.items.iter() {
    tally.observe(item, positive_class_id, area_filter);
  }

  let classes_present: BTreeSet<u32> = detections.items.iter().map(|i| i.class_id).collect();

  let diagnostics = DiagnosticReport {
    raw_detections: detections.len(),
    tumor_detections_before_filter: tally.before,
    removed_by_min_area: tally.removed_by_area,
    removed_by_class: tally.removed_by_class,
    tumor_detections_after_filter: tally.after,
    max_confidence_raw: tally.max_raw,
    max_confidence_tumor: tally.best,
    mask_count: tally.mask_areas.len(),
    avg_mask_area: tally.avg_mask_area(),
    tumor_class_idx: positive_class_id,
    model_names: class_map.clone(),
    classes_present: classes_present.into_iter().collect(),
    mask_filtering_active,
  };

  debug!(
    "判决: 原始 {} 阳性 {} -> {} (面积过滤 {}, 类别过滤 {})",
    diagnostics.raw_detections,
    diagnostics.tumor_detections_before_filter,
    diagnostics.tumor_detections_after_filter,
    diagnostics.removed_by_min_area,
    diagnostics.removed_by_class
  );

  Verdict {
    has_condition: tally.has_condition,
    confidence: tally.best,
    diagnostics,
  }
}
