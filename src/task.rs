// 该文件是 Mingjing （明镜） 项目的一部分。
// src/task.rs - 筛查任务
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

use std::io::Write;

use chrono::Utc;
use image::DynamicImage;
use serde::Serialize;
use tracing::info;

use crate::{
  config::{InferenceParams, Settings},
  decision::{DiagnosticReport, Verdict, decide},
  input::ImageFileInput,
  model::{ClassMap, DetectResult, Detector},
  output::{OverlayError, OverlayRenderer, Render},
  resolver::resolve_positive_class,
};

/// 单张图像的筛查报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningReport {
  pub filename: String,
  pub created_at: String,
  pub conf_th: f32,
  pub iou_th: f32,
  pub min_mask_area: u32,
  pub has_tumor: bool,
  pub confidence: f32,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub debug_info: Option<DiagnosticReport>,
}

/// 筛查结果：报告、判决与叠加图（PNG）
#[derive(Debug, Clone)]
pub struct ScreeningOutcome {
  pub report: ScreeningReport,
  pub verdict: Verdict,
  pub overlay: Option<Vec<u8>>,
}

pub fn describe(verdict: &Verdict) -> String {
  if verdict.has_condition {
    format!("Tumor detected with confidence {:.3}.", verdict.confidence)
  } else {
    format!(
      "No tumor detected. Highest tumor-class confidence was {:.3}. \
       If you expect a positive case, verify model weights.",
      verdict.confidence
    )
  }
}

/// 筛查流水线：解析阳性类别 → 推理 → 判决 → 绘制叠加图
pub struct Screening {
  settings: Settings,
  renderer: OverlayRenderer,
}

impl Screening {
  pub fn new(settings: Settings) -> Result<Self, OverlayError> {
    let renderer = OverlayRenderer::new(settings.overlay.clone())?;
    Ok(Self { settings, renderer })
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn screen<D: Detector>(
    &self,
    detector: &D,
    image: &DynamicImage,
    params: &InferenceParams,
  ) -> Result<ScreeningOutcome, D::Error> {
    let now = std::time::Instant::now();
    let detections = detector.infer(image, params)?;
    info!(
      "推理完成，耗时: {:.2?}，检测到 {} 个对象",
      now.elapsed(),
      detections.len()
    );
    Ok(self.evaluate(&detections, detector.class_map(), Some(image), params))
  }

  /// 对已有的检测结果执行后处理，不涉及推理
  pub fn evaluate(
    &self,
    detections: &DetectResult,
    class_map: &ClassMap,
    image: Option<&DynamicImage>,
    params: &InferenceParams,
  ) -> ScreeningOutcome {
    let positive_class = resolve_positive_class(
      class_map,
      self.settings.default_positive_class,
      &self.settings.aliases,
    );
    let verdict = decide(detections, positive_class, class_map, &self.settings.decision);
    let overlay = self.renderer.render(image, detections, class_map);

    let d = &verdict.diagnostics;
    info!(
      "筛查参数 conf={:.3} iou={:.3} mask_count={} avg_mask_area={} top_conf={:.4}",
      params.conf_th, params.iou_th, d.mask_count, d.avg_mask_area, d.max_confidence_tumor
    );
    if self.settings.debug {
      info!(
        "筛查诊断 raw={} tumor_before={} removed_area={} removed_class={} max_conf={:.4} max_tumor={:.4} class_idx={} classes_present={:?}",
        d.raw_detections,
        d.tumor_detections_before_filter,
        d.removed_by_min_area,
        d.removed_by_class,
        d.max_confidence_raw,
        d.max_confidence_tumor,
        d.tumor_class_idx,
        d.classes_present
      );
    }

    let report = ScreeningReport {
      filename: String::new(),
      created_at: Utc::now().to_rfc3339(),
      conf_th: params.conf_th,
      iou_th: params.iou_th,
      min_mask_area: self.settings.decision.min_mask_area,
      has_tumor: verdict.has_condition,
      confidence: verdict.confidence,
      description: describe(&verdict),
      debug_info: self.settings.debug.then(|| verdict.diagnostics.clone()),
    };

    ScreeningOutcome {
      report,
      verdict,
      overlay,
    }
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 对单张图像筛查一次并输出结果
pub struct OneShotTask {
  screening: Screening,
}

impl OneShotTask {
  pub fn new(screening: Screening) -> Self {
    Self { screening }
  }
}

impl<
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: Detector<Error = ME>,
  O: Render<ScreeningOutcome, Error = RE>,
> Task<ImageFileInput, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: ImageFileInput, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let params = self.screening.settings().inference.clone();
    let mut outcome = self.screening.screen(&model, input.image(), &params)?;
    outcome.report.filename = input.file_name();
    info!("{}", outcome.report.description);

    output.render_result(&outcome)?;
    info!("任务完成");
    Ok(())
  }
}

/// 阈值网格中的一格
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRow {
  pub conf_th: f32,
  pub iou_th: f32,
  pub mask_count: usize,
  pub avg_mask_area: u32,
  pub top_conf: f32,
}

/// 在置信度与 IoU 阈值网格上重复筛查，用于排查阈值设置
pub struct SweepTask {
  screening: Screening,
  conf_values: Vec<f32>,
  iou_values: Vec<f32>,
}

impl SweepTask {
  pub fn new(screening: Screening) -> Self {
    Self {
      screening,
      conf_values: vec![0.05, 0.10, 0.15, 0.20],
      iou_values: vec![0.40, 0.50, 0.60],
    }
  }

  pub fn with_grid(mut self, conf_values: Vec<f32>, iou_values: Vec<f32>) -> Self {
    self.conf_values = conf_values;
    self.iou_values = iou_values;
    self
  }

  pub fn sweep<D: Detector>(
    &self,
    detector: &D,
    image: &DynamicImage,
  ) -> Result<Vec<SweepRow>, D::Error> {
    let base = &self.screening.settings().inference;
    let mut rows = Vec::with_capacity(self.conf_values.len() * self.iou_values.len());

    for &conf_th in &self.conf_values {
      for &iou_th in &self.iou_values {
        let params = base.clone().with_thresholds(conf_th, iou_th);
        let detections = detector.infer(image, &params)?;
        let outcome = self
          .screening
          .evaluate(&detections, detector.class_map(), None, &params);
        let d = &outcome.verdict.diagnostics;
        rows.push(SweepRow {
          conf_th,
          iou_th,
          mask_count: d.mask_count,
          avg_mask_area: d.avg_mask_area,
          top_conf: outcome.verdict.confidence,
        });
      }
    }

    Ok(rows)
  }
}

impl<ME: std::error::Error + Sync + Send + 'static, M: Detector<Error = ME>, O: Write>
  Task<ImageFileInput, M, O> for SweepTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: ImageFileInput, model: M, mut output: O) -> Result<(), Self::Error> {
    info!("开始阈值扫描: {}", input.file_name());
    let rows = self.sweep(&model, input.image())?;

    writeln!(output, "Image: {}", input.file_name())?;
    writeln!(output, "conf\tiou\tmasks\tavg_area\ttop_conf")?;
    for row in rows {
      writeln!(
        output,
        "{:.2}\t{:.2}\t{}\t{}\t{:.3}",
        row.conf_th, row.iou_th, row.mask_count, row.avg_mask_area, row.top_conf
      )?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn screening(debug: bool) -> Screening {
    let settings = Settings {
      debug,
      ..Settings::default()
    };
    Screening::new(settings).unwrap()
  }

  #[test]
  fn description_reports_three_decimals() {
    let screening = screening(false);
    let names: ClassMap = [(0, "notumor"), (1, "glioma")].into_iter().collect();
    let detections = DetectResult::new(vec![DetectItem::new(1, 0.8766, [0.0, 0.0, 4.0, 4.0])]);

    let outcome = screening.evaluate(&detections, &names, None, &InferenceParams::default());
    assert!(outcome.report.has_tumor);
    assert_eq!(outcome.report.description, "Tumor detected with confidence 0.877.");
    assert!(outcome.report.debug_info.is_none());
    assert!(outcome.overlay.is_none());
  }

  #[test]
  fn negative_outcome_keeps_diagnostics_in_debug_mode() {
    let screening = screening(true);
    let names: ClassMap = [(0, "notumor"), (1, "glioma")].into_iter().collect();
    let detections = DetectResult::new(vec![DetectItem::new(0, 0.6, [0.0, 0.0, 4.0, 4.0])]);
    let image = DynamicImage::new_rgb8(8, 8);

    let outcome = screening.evaluate(&detections, &names, Some(&image), &InferenceParams::default());
    assert!(!outcome.report.has_tumor);
    assert!(outcome.report.description.starts_with("No tumor detected."));
    assert_eq!(
      outcome.report.debug_info.as_ref().map(|d| d.removed_by_class),
      Some(1)
    );
    assert!(outcome.overlay.is_some());
  }
}
