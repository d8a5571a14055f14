// 该文件是 Mingjing （明镜） 项目的一部分。
// tests/screening.rs - 筛查流程集成测试
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

#![cfg(feature = "model_replay")]

use std::path::Path;

use image::{Rgb, RgbImage};
use serde_json::{Value, json};
use url::Url;

use mingjing::{
  FromUrl,
  config::{DecisionConfig, Settings},
  input::ImageFileInput,
  model::{Detector, ReplayDetector},
  output::{OutputWrapper, SaveImageFileOutput},
  task::{OneShotTask, Screening, SweepTask, Task},
};

const SIDE: usize = 32;

fn filled_mask(pixels: usize) -> Value {
  let data: Vec<f32> = (0..SIDE * SIDE)
    .map(|i| if i < pixels { 0.9 } else { 0.1 })
    .collect();
  json!({ "width": SIDE, "height": SIDE, "data": data })
}

fn write_fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
  let image_path = dir.join("scan.png");
  RgbImage::from_pixel(SIDE as u32, SIDE as u32, Rgb([40, 40, 40]))
    .save(&image_path)
    .unwrap();

  let recording = json!({
    "names": { "0": "Glioma", "1": "Meningioma", "2": "No Tumor", "3": "Pituitary" },
    "detections": [
      { "class_id": 1, "score": 0.62, "bbox": [2, 0, 20, 16], "mask": filled_mask(300) },
      { "class_id": 1, "score": 0.91, "bbox": [20, 20, 30, 30], "mask": filled_mask(40) },
      { "class_id": 0, "score": 0.97, "bbox": [4, 18, 14, 28], "mask": filled_mask(120) },
      { "class_id": 1, "score": 0.08, "bbox": [0, 0, 4, 4], "mask": filled_mask(500) }
    ]
  });
  let replay_path = dir.join("detections.json");
  std::fs::write(&replay_path, serde_json::to_vec(&recording).unwrap()).unwrap();

  (image_path, replay_path)
}

fn settings(min_mask_area: u32) -> Settings {
  Settings {
    decision: DecisionConfig {
      min_mask_area,
      ..DecisionConfig::default()
    },
    debug: true,
    ..Settings::default()
  }
}

#[test]
fn one_shot_writes_overlay_and_report() {
  let dir = tempfile::tempdir().unwrap();
  let (image_path, replay_path) = write_fixture(dir.path());
  let overlay_path = dir.path().join("out").join("overlay.png");

  let input = ImageFileInput::open(&image_path).unwrap();
  let model = ReplayDetector::from_path(&replay_path).unwrap();
  let output_url = Url::parse(&format!("image://{}", overlay_path.display())).unwrap();
  let output = OutputWrapper::from_url(&output_url).unwrap();

  OneShotTask::new(Screening::new(settings(100)).unwrap())
    .run_task(input, model, output)
    .unwrap();

  let overlay = image::open(&overlay_path).unwrap();
  assert_eq!((overlay.width(), overlay.height()), (SIDE as u32, SIDE as u32));

  let report: Value =
    serde_json::from_slice(&std::fs::read(overlay_path.with_extension("json")).unwrap()).unwrap();
  assert_eq!(report["filename"], "scan.png");
  assert_eq!(report["has_tumor"], true);
  assert_eq!(report["min_mask_area"], 100);

  let debug = &report["debug_info"];
  assert_eq!(debug["tumor_class_idx"], 1);
  assert_eq!(debug["raw_detections"], 4);
  assert_eq!(debug["removed_by_class"], 1);
  assert_eq!(debug["tumor_detections_before_filter"], 3);
  assert_eq!(debug["removed_by_min_area"], 1);
  assert_eq!(debug["tumor_detections_after_filter"], 2);
  assert_eq!(debug["mask_count"], 2);
  assert_eq!(debug["avg_mask_area"], 400);
  assert_eq!(debug["classes_present"], json!([0, 1]));
  assert_eq!(debug["mask_filtering_active"], true);
}

#[test]
fn confidence_threshold_is_applied_by_the_detector() {
  let dir = tempfile::tempdir().unwrap();
  let (image_path, replay_path) = write_fixture(dir.path());

  let screening = Screening::new(settings(100)).unwrap();
  let image = image::open(&image_path).unwrap();
  let model = ReplayDetector::from_path(&replay_path).unwrap();

  let mut params = screening.settings().inference.clone();
  params.conf_th = 0.5;
  let outcome = screening.screen(&model, &image, &params).unwrap();

  // 0.08 的检测被阈值过滤，0.91 的检测面积不足
  assert!(outcome.verdict.has_condition);
  assert_eq!(outcome.verdict.confidence, 0.62);
  assert_eq!(outcome.verdict.diagnostics.raw_detections, 3);
  assert!(outcome.overlay.is_some());
}

#[test]
fn sweep_covers_the_whole_grid() {
  let dir = tempfile::tempdir().unwrap();
  let (image_path, replay_path) = write_fixture(dir.path());

  let image = image::open(&image_path).unwrap();
  let model = ReplayDetector::from_path(&replay_path).unwrap();
  let task = SweepTask::new(Screening::new(settings(0)).unwrap())
    .with_grid(vec![0.05, 0.7], vec![0.5]);

  let rows = task.sweep(&model, &image).unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].top_conf, 0.91);
  assert_eq!(rows[1].top_conf, 0.91);
  // 面积过滤关闭时不统计掩码
  assert_eq!(rows[0].mask_count, 0);

  let mut table = Vec::new();
  let input = ImageFileInput::open(&image_path).unwrap();
  task.run_task(input, model, &mut table).unwrap();
  let table = String::from_utf8(table).unwrap();
  assert!(table.contains("conf\tiou\tmasks\tavg_area\ttop_conf"));
  assert!(table.contains("0.70\t0.50\t0\t0\t0.910"));
}

#[test]
fn screening_is_shared_across_threads() {
  let dir = tempfile::tempdir().unwrap();
  let (image_path, replay_path) = write_fixture(dir.path());

  let screening = Screening::new(settings(100)).unwrap();
  let image = image::open(&image_path).unwrap();
  let model = ReplayDetector::from_path(&replay_path).unwrap();
  let params = screening.settings().inference.clone();
  let expected = screening.screen(&model, &image, &params).unwrap().verdict;

  std::thread::scope(|scope| {
    let handles: Vec<_> = (0..4)
      .map(|_| scope.spawn(|| screening.screen(&model, &image, &params).unwrap().verdict))
      .collect();
    for handle in handles {
      assert_eq!(handle.join().unwrap(), expected);
    }
  });
}

#[test]
fn save_image_output_without_overlay_still_writes_report() {
  let dir = tempfile::tempdir().unwrap();
  let (_, replay_path) = write_fixture(dir.path());

  let screening = Screening::new(settings(0)).unwrap();
  let model = ReplayDetector::from_path(&replay_path).unwrap();
  let params = screening.settings().inference.clone();
  let detections = model.infer(&image::DynamicImage::new_rgb8(1, 1), &params).unwrap();
  let outcome = screening.evaluate(&detections, model.class_map(), None, &params);
  assert!(outcome.overlay.is_none());

  let path = dir.path().join("no-overlay.png");
  let output = SaveImageFileOutput::new(&path);
  mingjing::output::Render::render_result(&output, &outcome).unwrap();
  assert!(!path.exists());
  assert!(path.with_extension("json").exists());
}
