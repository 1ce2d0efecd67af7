//! 特征表、判定与贡献度排序.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use binary_heap_plus::BinaryHeap;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::consts::{FEATURE_COLUMNS, HIGH_SENSITIVITY_THRESHOLD, STANDARD_THRESHOLD};

/// 分析模式, 决定判定阈值.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    /// 标准模式.
    #[default]
    Standard,

    /// 高灵敏度模式, 阈值更低.
    HighSensitivity,
}

impl AnalysisMode {
    /// 判定阈值: `probability >= threshold` 时判为异常.
    #[inline]
    pub const fn threshold(&self) -> f64 {
        match self {
            AnalysisMode::Standard => STANDARD_THRESHOLD,
            AnalysisMode::HighSensitivity => HIGH_SENSITIVITY_THRESHOLD,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Standard => f.write_str("standard"),
            AnalysisMode::HighSensitivity => f.write_str("high-sensitivity"),
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(AnalysisMode::Standard),
            "high-sensitivity" | "high" => Ok(AnalysisMode::HighSensitivity),
            _ => Err(format!(
                "unknown analysis mode `{s}`, expected standard or high-sensitivity"
            )),
        }
    }
}

/// 分类判定.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// 正常.
    Normal,
    /// 异常.
    Abnormal,
}

impl Decision {
    /// `probability >= threshold` 时为 `Abnormal`.
    #[inline]
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability >= threshold {
            Decision::Abnormal
        } else {
            Decision::Normal
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Normal => f.write_str("normal"),
            Decision::Abnormal => f.write_str("abnormal"),
        }
    }
}

/// 单行特征表, 列有序.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    columns: Vec<String>,
    values: Vec<f64>,
}

impl FeatureTable {
    /// 按给定顺序构造. 重复的列名以最后一次出现为准.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (name, value) in pairs {
            table.insert(name.into(), value);
        }
        table
    }

    /// 插入或覆盖一列.
    pub fn insert(&mut self, name: String, value: f64) {
        match self.columns.iter().position(|c| *c == name) {
            Some(i) => self.values[i] = value,
            None => {
                self.columns.push(name);
                self.values.push(value);
            }
        }
    }

    /// 列数.
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// 是否没有任何列.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// 按名取值.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i])
    }

    /// 按顺序遍历 `(列名, 值)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// 只保留 `required` 中的列, 并按 `required` 排序. 有缺失列时返回全部缺失列名.
    pub fn select(&self, required: &[&str]) -> Result<FeatureTable, Vec<String>> {
        let missing: Vec<String> = required
            .iter()
            .filter(|c| self.get(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(Self::from_pairs(
            required.iter().filter_map(|c| self.get(c).map(|v| (*c, v))),
        ))
    }

    /// 按分类器要求的列顺序选择, 见 [`FEATURE_COLUMNS`].
    #[inline]
    pub fn select_classifier_input(&self) -> Result<FeatureTable, Vec<String>> {
        self.select(&FEATURE_COLUMNS)
    }
}

/// 单个特征对判定的贡献.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// 特征名.
    pub feature: String,
    /// 带符号的贡献值, 正值推向异常.
    pub value: f64,
}

/// 按贡献绝对值降序排列的贡献表.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionTable {
    ranked: Vec<Contribution>,
}

impl ContributionTable {
    /// 排序构造. 非有限值被丢弃; 绝对值相同时保持输入顺序.
    pub fn ranked<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut heap = BinaryHeap::new_by(
            |a: &(OrderedFloat<f64>, usize, Contribution), b: &(OrderedFloat<f64>, usize, Contribution)| {
                a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1))
            },
        );
        for (i, (feature, value)) in entries.into_iter().enumerate() {
            if value.is_finite() {
                let feature = feature.into();
                heap.push((OrderedFloat(value.abs()), i, Contribution { feature, value }));
            }
        }
        let ranked = heap.into_sorted_vec().into_iter().rev().map(|(_, _, c)| c).collect();
        Self { ranked }
    }

    /// 条目数.
    #[inline]
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// 全部条目, 已排序.
    #[inline]
    pub fn entries(&self) -> &[Contribution] {
        &self.ranked
    }

    /// 前 `n` 项.
    #[inline]
    pub fn top(&self, n: usize) -> &[Contribution] {
        &self.ranked[..n.min(self.ranked.len())]
    }

    /// 渲染交给报告生成器的贡献摘要. 词典中有定义的特征会附上定义.
    pub fn summary_text(&self, top_n: usize, dictionary: &TermDictionary) -> String {
        let mut text = String::from("Feature Contribution Summary:\n\n");
        let mut lines = self.top(top_n).iter().map(|c| {
            let direction = if c.value > 0.0 { "positive" } else { "negative" };
            let mut line = format!(
                "- {}: contribution = {:.4} ({direction} contribution)",
                c.feature, c.value
            );
            if let Some(definition) = dictionary.definition(&c.feature) {
                let _ = write!(line, "\n  -> Definition: {definition}");
            }
            line
        });
        text.push_str(&lines.join("\n"));
        text.push('\n');
        text
    }
}

/// 特征名到释义的词典.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermDictionary {
    terms: HashMap<String, String>,
}

impl TermDictionary {
    /// 从 JSON 对象文件读取. 文件不存在或内容不合法时返回空词典并告警.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, super::collab::CollabError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("term dictionary {} not found, continuing without definitions", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let dict: Self = match serde_json::from_str(&raw) {
            Ok(dict) => dict,
            Err(e) => {
                log::warn!("term dictionary {} is malformed ({e}), continuing without definitions", path.display());
                return Ok(Self::default());
            }
        };
        log::info!("loaded {} term definition(s) from {}", dict.len(), path.display());
        Ok(dict)
    }

    /// 由键值对构造.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            terms: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// 释义条数.
    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// 查询释义.
    #[inline]
    pub fn definition(&self, term: &str) -> Option<&str> {
        self.terms.get(term).map(String::as_str)
    }
}

/// 分类结果: 分类器输入、概率、阈值、判定与贡献度.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredFeatures {
    /// 分类器输入, 列顺序同 [`FEATURE_COLUMNS`].
    pub features: FeatureTable,
    /// 异常概率.
    pub probability: f64,
    /// 使用的阈值.
    pub threshold: f64,
    /// 判定.
    pub decision: Decision,
    /// 贡献度排序.
    pub contributions: ContributionTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_threshold() {
        let t = AnalysisMode::HighSensitivity.threshold();
        assert_eq!(Decision::from_probability(t, t), Decision::Abnormal);
        assert_eq!(Decision::from_probability(0.4, t), Decision::Abnormal);
        assert_eq!(Decision::from_probability(0.4, AnalysisMode::Standard.threshold()), Decision::Normal);
        assert_eq!("high-sensitivity".parse(), Ok(AnalysisMode::HighSensitivity));
    }

    #[test]
    fn test_select_reports_missing_columns() {
        let table = FeatureTable::from_pairs([("b", 2.0), ("a", 1.0), ("z", 9.0)]);
        let picked = table.select(&["a", "b"]).unwrap();
        assert_eq!(picked.iter().collect::<Vec<_>>(), vec![("a", 1.0), ("b", 2.0)]);
        assert_eq!(table.select(&["a", "c", "d"]), Err(vec!["c".to_string(), "d".to_string()]));

        let full = FeatureTable::from_pairs(FEATURE_COLUMNS.iter().rev().map(|c| (*c, 0.5)));
        let input = full.select_classifier_input().unwrap();
        assert_eq!(input.len(), FEATURE_COLUMNS.len());
        assert_eq!(input.iter().next().map(|(c, _)| c), Some(FEATURE_COLUMNS[0]));
    }

    #[test]
    fn test_contributions_ranked_by_magnitude() {
        let table = ContributionTable::ranked([
            ("small", 0.01),
            ("neg", -0.9),
            ("nan", f64::NAN),
            ("pos", 0.5),
            ("tie", -0.5),
        ]);
        let names: Vec<&str> = table.entries().iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(names, vec!["neg", "pos", "tie", "small"]);
        assert_eq!(table.top(2).len(), 2);
        assert_eq!(table.top(10).len(), 4);
    }

    #[test]
    fn test_summary_text_includes_definitions() {
        let table = ContributionTable::ranked([("alpha", 0.25), ("beta", -0.75)]);
        let dict = TermDictionary::from_pairs([("beta", "how beta works")]);
        let text = table.summary_text(10, &dict);
        assert!(text.starts_with("Feature Contribution Summary:"));
        let beta = text.find("- beta: contribution = -0.7500 (negative contribution)").unwrap();
        let alpha = text.find("- alpha: contribution = 0.2500 (positive contribution)").unwrap();
        assert!(beta < alpha);
        assert!(text.contains("-> Definition: how beta works"));
        assert!(!table.summary_text(1, &dict).contains("alpha"));
    }

    #[test]
    fn test_missing_or_malformed_dictionary_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dict = TermDictionary::open(dir.path().join("missing.json")).unwrap();
        assert!(dict.is_empty());

        let path = dir.path().join("dict.json");
        std::fs::write(&path, r#"{"a": "first"}"#).unwrap();
        assert_eq!(TermDictionary::open(&path).unwrap().definition("a"), Some("first"));

        std::fs::write(&path, "not json").unwrap();
        assert!(TermDictionary::open(&path).unwrap().is_empty());
        std::fs::write(&path, r#"["a", "b"]"#).unwrap();
        assert!(TermDictionary::open(&path).unwrap().is_empty());
    }
}
