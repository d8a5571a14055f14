// 该文件是 Mingjing （明镜） 项目的一部分。
// src/resolver.rs - 阳性类别解析
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

//! 模型的类别表在运行时才能确定，这里根据类别名称推断哪个类别代表“有肿瘤”。

use tracing::debug;

use crate::{config::AliasTable, model::ClassMap};

/// 类别名称归一化：转小写，去掉空白、连字符与下划线
///
/// "No Tumor"、"no_tumor"、"no-tumor" 都会得到 "notumor"。
pub fn normalize_class_name(name: &str) -> String {
  name
    .chars()
    .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
    .flat_map(char::to_lowercase)
    .collect()
}

/// 按别名表匹配类别表的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassMatch {
  /// 名称直接命中阳性别名
  Positive(u32),
  /// 二分类模型中，另一类被明确标为阴性
  Exclusion(u32),
  NoMatch,
}

impl ClassMatch {
  pub fn classify(class_map: &ClassMap, aliases: &AliasTable) -> Self {
    let normalized: Vec<(u32, String)> = class_map
      .iter()
      .map(|(id, name)| (id, normalize_class_name(name)))
      .collect();

    if let Some((id, _)) = normalized
      .iter()
      .find(|(_, name)| aliases.is_positive(name))
    {
      return ClassMatch::Positive(*id);
    }

    if let [(id_a, name_a), (id_b, name_b)] = normalized.as_slice() {
      match (aliases.is_negative(name_a), aliases.is_negative(name_b)) {
        (true, false) => return ClassMatch::Exclusion(*id_b),
        (false, true) => return ClassMatch::Exclusion(*id_a),
        _ => {}
      }
    }

    ClassMatch::NoMatch
  }
}

/// 解析代表阳性（有肿瘤）的类别编号，不会失败
///
/// 优先级：阳性别名 > 二分类排除 > 调用方默认值 > 最小编号。
/// 类别表为空时原样返回 `default_id`。
pub fn resolve_positive_class(class_map: &ClassMap, default_id: u32, aliases: &AliasTable) -> u32 {
  let resolved = match ClassMatch::classify(class_map, aliases) {
    ClassMatch::Positive(id) | ClassMatch::Exclusion(id) => id,
    ClassMatch::NoMatch if class_map.is_empty() || class_map.contains(default_id) => default_id,
    ClassMatch::NoMatch => class_map.smallest_id().unwrap_or(default_id),
  };

  debug!("阳性类别解析结果: {} (类别数 {})", resolved, class_map.len());
  resolved
}
