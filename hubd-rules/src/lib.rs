//! Rule engine: cleansing, then quality scoring, then masking.
//!
//! The engine is stateless across batches except for the dedup windows,
//! which live per `(task, interface)` and expire on a TTL. A failing
//! rule never aborts the batch unless its severity is `critical`; it is
//! recorded into the issue list instead.

pub mod cleansing;
pub mod dedup;
pub mod masking;
pub mod quality;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use hubd_catalog::model::{Rule, RuleKind, Severity};
use hubd_core::{HubError, HubResult, Row};

use dedup::{row_key, DedupWindow};

/// A batch's rules split by kind, preserving catalog order.
#[derive(Debug, Default, Clone)]
pub struct RuleSet {
    pub cleansing: Vec<Rule>,
    pub quality: Vec<Rule>,
    pub masking: Vec<Rule>,
}

impl RuleSet {
    pub fn partition(rules: Vec<Rule>) -> Self {
        let mut set = Self::default();
        for rule in rules {
            match rule.kind {
                RuleKind::Cleansing => set.cleansing.push(rule),
                RuleKind::Quality => set.quality.push(rule),
                RuleKind::Masking => set.masking.push(rule),
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.cleansing.is_empty() && self.quality.is_empty() && self.masking.is_empty()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleIssue {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub row_index: Option<usize>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchOutcome {
    pub rows: Vec<Row>,
    pub issues: Vec<RuleIssue>,
    /// Per-dimension pass ratio in [0,1], only for exercised dimensions.
    pub metrics: BTreeMap<String, f64>,
    /// Weighted mean of the exercised dimensions; 1.0 when none were.
    pub quality_score: f64,
    /// Rows removed by dedup windows.
    pub deduped: usize,
}

/// Dry-run result of `TestRule`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TestRuleOutcome {
    pub rows: Vec<Row>,
    pub issues: Vec<RuleIssue>,
}

pub struct RuleEngineConfig {
    pub dedup_ttl: Duration,
    /// Per-dimension score weights; unlisted dimensions weigh 1.0.
    pub weights: BTreeMap<String, f64>,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(3600),
            weights: BTreeMap::new(),
        }
    }
}

pub struct RuleEngine {
    config: RuleEngineConfig,
    windows: DashMap<(String, String), Mutex<DedupWindow>>,
}

impl RuleEngine {
    pub fn new(config: RuleEngineConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Run one batch through cleansing -> quality -> masking for the
    /// given `(task, interface)` scope.
    pub fn process_batch(
        &self,
        task_id: &str,
        interface_id: &str,
        rules: &RuleSet,
        mut rows: Vec<Row>,
    ) -> HubResult<BatchOutcome> {
        let mut issues = Vec::new();
        let mut deduped = 0usize;

        // 1. Cleansing transforms rows, dedup rules drop repeats.
        for rule in &rules.cleansing {
            if rule.rule_type == "dedup" {
                deduped += self.apply_dedup(task_id, interface_id, rule, &mut rows, &mut issues)?;
                continue;
            }
            let mut kept = Vec::with_capacity(rows.len());
            for (index, mut row) in std::mem::take(&mut rows).into_iter().enumerate() {
                match cleansing::apply(rule, &mut row) {
                    Ok(()) => kept.push(row),
                    Err(e) => {
                        record_issue(&mut issues, rule, Some(index), e.to_string())?;
                        kept.push(row);
                    }
                }
            }
            rows = kept;
        }

        // 2. Quality: per-row pass/fail tallied into dimensions.
        let mut tallies: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for rule in &rules.quality {
            let dimension = quality::dimension_of(rule);
            for (index, row) in rows.iter().enumerate() {
                match quality::evaluate(rule, row) {
                    Ok(None) => tallies.entry(dimension).or_default().0 += 1,
                    Ok(Some(reason)) => {
                        tallies.entry(dimension).or_default().1 += 1;
                        record_issue(&mut issues, rule, Some(index), reason)?;
                    }
                    Err(e) => {
                        record_issue(&mut issues, rule, Some(index), e.to_string())?;
                    }
                }
            }
        }

        // 3. Masking runs last, on the rows headed for storage.
        for rule in &rules.masking {
            for (index, row) in rows.iter_mut().enumerate() {
                if let Err(e) = masking::apply(rule, row) {
                    record_issue(&mut issues, rule, Some(index), e.to_string())?;
                }
            }
        }

        let metrics: BTreeMap<String, f64> = tallies
            .into_iter()
            .map(|(dimension, (pass, fail))| {
                let total = pass + fail;
                let ratio = if total == 0 {
                    1.0
                } else {
                    pass as f64 / total as f64
                };
                (dimension.to_string(), ratio)
            })
            .collect();
        let quality_score = self.weighted_score(&metrics);

        Ok(BatchOutcome {
            rows,
            issues,
            metrics,
            quality_score,
            deduped,
        })
    }

    fn apply_dedup(
        &self,
        task_id: &str,
        interface_id: &str,
        rule: &Rule,
        rows: &mut Vec<Row>,
        issues: &mut Vec<RuleIssue>,
    ) -> HubResult<usize> {
        let key_fields: Vec<String> = match rule
            .logic
            .get("key_fields")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .filter(|fields| !fields.is_empty())
        {
            Some(fields) => fields,
            None => {
                record_issue(issues, rule, None, "logic.key_fields: required".into())?;
                return Ok(0);
            }
        };
        let scope = (task_id.to_string(), interface_id.to_string());
        let entry = self
            .windows
            .entry(scope)
            .or_insert_with(|| Mutex::new(DedupWindow::new(self.config.dedup_ttl)));
        let mut window = entry.lock().expect("dedup window poisoned");
        let before = rows.len();
        rows.retain(|row| window.admit(&row_key(row, &key_fields)));
        Ok(before - rows.len())
    }

    fn weighted_score(&self, metrics: &BTreeMap<String, f64>) -> f64 {
        if metrics.is_empty() {
            return 1.0;
        }
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (dimension, score) in metrics {
            let weight = self.config.weights.get(dimension).copied().unwrap_or(1.0);
            weighted += score * weight;
            total_weight += weight;
        }
        if total_weight == 0.0 {
            return 1.0;
        }
        weighted / total_weight
    }

    /// Drop the dedup window for a finished task scope.
    pub fn clear_scope(&self, task_id: &str, interface_id: &str) {
        self.windows
            .remove(&(task_id.to_string(), interface_id.to_string()));
    }

    /// Dry-run one rule against sample rows; nothing is persisted and no
    /// dedup window is touched.
    pub fn test_rule(&self, rule: &Rule, sample_rows: Vec<Row>) -> HubResult<TestRuleOutcome> {
        let mut rows = sample_rows;
        let mut issues = Vec::new();
        match rule.kind {
            RuleKind::Cleansing if rule.rule_type == "dedup" => {
                let mut window = DedupWindow::new(self.config.dedup_ttl);
                let key_fields: Vec<String> = rule
                    .logic
                    .get("key_fields")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|i| i.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                if key_fields.is_empty() {
                    return Err(HubError::invalid_input("logic.key_fields", "required"));
                }
                rows.retain(|row| window.admit(&row_key(row, &key_fields)));
            }
            RuleKind::Cleansing => {
                for (index, row) in rows.iter_mut().enumerate() {
                    if let Err(e) = cleansing::apply(rule, row) {
                        push_issue(&mut issues, rule, Some(index), e.to_string());
                    }
                }
            }
            RuleKind::Quality => {
                for (index, row) in rows.iter().enumerate() {
                    match quality::evaluate(rule, row)? {
                        None => {}
                        Some(reason) => push_issue(&mut issues, rule, Some(index), reason),
                    }
                }
            }
            RuleKind::Masking => {
                for (index, row) in rows.iter_mut().enumerate() {
                    if let Err(e) = masking::apply(rule, row) {
                        push_issue(&mut issues, rule, Some(index), e.to_string());
                    }
                }
            }
        }
        Ok(TestRuleOutcome { rows, issues })
    }
}

fn severity_of(rule: &Rule) -> Severity {
    rule.parameters
        .get("severity")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn push_issue(issues: &mut Vec<RuleIssue>, rule: &Rule, row_index: Option<usize>, message: String) {
    issues.push(RuleIssue {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        severity: severity_of(rule),
        message,
        row_index,
    });
}

/// Record an issue; a `critical` rule aborts the whole batch.
fn record_issue(
    issues: &mut Vec<RuleIssue>,
    rule: &Rule,
    row_index: Option<usize>,
    message: String,
) -> HubResult<()> {
    let severity = severity_of(rule);
    tracing::debug!(rule = %rule.name, severity = %severity, %message, "rule issue");
    push_issue(issues, rule, row_index, message.clone());
    if severity == Severity::Critical {
        return Err(HubError::InvalidInput(format!(
            "critical rule {:?} failed: {message}",
            rule.name
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use hubd_catalog::model::{Rule, RuleKind};
    use hubd_core::Row;

    pub fn rule(kind: RuleKind, rule_type: &str, logic: serde_json::Value) -> Rule {
        Rule {
            id: format!("rule-{rule_type}"),
            name: format!("test {rule_type}"),
            kind,
            rule_type: rule_type.into(),
            logic,
            parameters: serde_json::json!({}),
            is_builtin: false,
            is_enabled: true,
            version: 1,
            object_type: None,
            object_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn cleansing_rule(rule_type: &str, logic: serde_json::Value) -> Rule {
        rule(RuleKind::Cleansing, rule_type, logic)
    }

    pub fn quality_rule(rule_type: &str, logic: serde_json::Value) -> Rule {
        rule(RuleKind::Quality, rule_type, logic)
    }

    pub fn masking_rule(rule_type: &str, logic: serde_json::Value) -> Rule {
        rule(RuleKind::Masking, rule_type, logic)
    }

    pub fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    fn engine() -> RuleEngine {
        RuleEngine::new(RuleEngineConfig::default())
    }

    #[test]
    fn pipeline_runs_in_order() {
        // Cleansing trims, quality then sees the trimmed value, masking
        // runs last on the stored shape.
        let rules = RuleSet::partition(vec![
            cleansing_rule("trim", serde_json::json!({"fields": ["name"]})),
            quality_rule("length", serde_json::json!({"field": "name", "min": 3})),
            masking_rule("mask", serde_json::json!({"field": "name", "keep_prefix": 1, "keep_suffix": 0})),
        ]);
        let outcome = engine()
            .process_batch(
                "t1",
                "i1",
                &rules,
                vec![row(serde_json::json!({"name": "  ada  "}))],
            )
            .unwrap();
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.metrics["standardization"], 1.0);
        assert_eq!(outcome.rows[0]["name"], "a**");
    }

    #[test]
    fn quality_score_is_pass_ratio() {
        let rules = RuleSet::partition(vec![quality_rule(
            "range",
            serde_json::json!({"field": "amt", "min": 0}),
        )]);
        let outcome = engine()
            .process_batch(
                "t1",
                "i1",
                &rules,
                vec![
                    row(serde_json::json!({"amt": 5})),
                    row(serde_json::json!({"amt": -5})),
                    row(serde_json::json!({"amt": 1})),
                    row(serde_json::json!({"amt": 2})),
                ],
            )
            .unwrap();
        assert_eq!(outcome.metrics["accuracy"], 0.75);
        assert_eq!(outcome.quality_score, 0.75);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].row_index, Some(1));
    }

    #[test]
    fn weights_shift_the_score() {
        let mut config = RuleEngineConfig::default();
        config.weights.insert("accuracy".into(), 3.0);
        config.weights.insert("completeness".into(), 1.0);
        let engine = RuleEngine::new(config);
        let rules = RuleSet::partition(vec![
            quality_rule("range", serde_json::json!({"field": "amt", "min": 0})),
            quality_rule("not_null", serde_json::json!({"fields": ["amt"]})),
        ]);
        // accuracy 0.5, completeness 1.0 -> (0.5*3 + 1.0*1) / 4 = 0.625
        let outcome = engine
            .process_batch(
                "t1",
                "i1",
                &rules,
                vec![
                    row(serde_json::json!({"amt": 5})),
                    row(serde_json::json!({"amt": -5})),
                ],
            )
            .unwrap();
        assert!((outcome.quality_score - 0.625).abs() < 1e-9);
    }

    #[test]
    fn dedup_window_spans_batches_per_scope() {
        let engine = engine();
        let rules = RuleSet::partition(vec![cleansing_rule(
            "dedup",
            serde_json::json!({"key_fields": ["id"]}),
        )]);
        let batch = vec![
            row(serde_json::json!({"id": 1})),
            row(serde_json::json!({"id": 1})),
            row(serde_json::json!({"id": 2})),
        ];
        let first = engine.process_batch("t1", "i1", &rules, batch.clone()).unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.deduped, 1);

        // Same scope remembers; another interface scope does not.
        let second = engine.process_batch("t1", "i1", &rules, batch.clone()).unwrap();
        assert_eq!(second.rows.len(), 0);
        let other = engine.process_batch("t1", "i2", &rules, batch).unwrap();
        assert_eq!(other.rows.len(), 2);
    }

    #[test]
    fn rule_failures_are_isolated() {
        let rules = RuleSet::partition(vec![
            quality_rule("range", serde_json::json!({})), // misconfigured
            quality_rule("not_null", serde_json::json!({"fields": ["id"]})),
        ]);
        let outcome = engine()
            .process_batch("t1", "i1", &rules, vec![row(serde_json::json!({"id": 1}))])
            .unwrap();
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.metrics["completeness"], 1.0);
    }

    #[test]
    fn critical_severity_aborts_batch() {
        let mut rule = quality_rule("not_null", serde_json::json!({"fields": ["id"]}));
        rule.parameters = serde_json::json!({"severity": "critical"});
        let rules = RuleSet::partition(vec![rule]);
        let result = engine().process_batch(
            "t1",
            "i1",
            &rules,
            vec![row(serde_json::json!({"other": 1}))],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rule_is_a_dry_run() {
        let engine = engine();
        let rule = cleansing_rule("dedup", serde_json::json!({"key_fields": ["id"]}));
        let sample = vec![
            row(serde_json::json!({"id": 1})),
            row(serde_json::json!({"id": 1})),
        ];
        let outcome = engine.test_rule(&rule, sample.clone()).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        // No window state leaked into batch processing.
        let rules = RuleSet::partition(vec![rule]);
        let batch = engine.process_batch("t1", "i1", &rules, sample).unwrap();
        assert_eq!(batch.rows.len(), 1);
    }

    #[test]
    fn empty_rule_set_passes_through() {
        let outcome = engine()
            .process_batch(
                "t1",
                "i1",
                &RuleSet::default(),
                vec![row(serde_json::json!({"id": 1}))],
            )
            .unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.quality_score, 1.0);
        assert!(outcome.metrics.is_empty());
    }
}
