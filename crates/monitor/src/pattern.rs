//! 패턴 매칭 -- 규칙 컴파일 및 라인 평가
//!
//! [`PatternSet`]은 설정의 탐지 규칙 목록을 한 번 컴파일하여
//! 라인 평가 시 재컴파일 오버헤드를 제거합니다.
//! 컴파일에 실패한 규칙은 경고와 함께 건너뛰고, 나머지 규칙으로
//! 계속 동작합니다. 정규식은 모두 대소문자를 구분하지 않습니다.

use regex::RegexBuilder;
use tracing::warn;

use logwarden_core::types::{DetectionRule, MatchType};

use crate::error::MonitorError;

/// 컴파일된 단일 규칙
///
/// 원본 규칙과 그 패턴들의 컴파일 결과를 함께 보관합니다.
#[derive(Debug)]
struct CompiledRule {
    rule: DetectionRule,
    regexes: Vec<regex::Regex>,
}

impl CompiledRule {
    /// 규칙의 모든 패턴을 대소문자 무시 모드로 컴파일합니다.
    ///
    /// 패턴이 하나라도 유효하지 않으면 규칙 전체가 실패합니다.
    fn compile(rule: &DetectionRule) -> Result<Self, MonitorError> {
        let patterns = rule.regex.patterns_for(rule.match_type);
        let mut regexes = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| MonitorError::Rule {
                    name: rule.name.clone(),
                    reason: format!("invalid regex '{pattern}': {e}"),
                })?;
            regexes.push(regex);
        }
        Ok(Self {
            rule: rule.clone(),
            regexes,
        })
    }

    /// 매칭 모드에 따라 라인을 평가합니다.
    ///
    /// 패턴이 비어 있는 규칙은 어떤 라인에도 매칭되지 않습니다.
    fn matches(&self, line: &str) -> bool {
        if self.regexes.is_empty() {
            return false;
        }
        match self.rule.match_type {
            MatchType::Any => self.regexes.iter().any(|r| r.is_match(line)),
            MatchType::All => self.regexes.iter().all(|r| r.is_match(line)),
        }
    }
}

/// 컴파일된 규칙 집합
///
/// 설정 스냅샷마다 한 번 생성되는 읽기 전용 값입니다.
/// 리로드 시 수정 없이 통째로 교체됩니다.
#[derive(Debug, Default)]
pub struct PatternSet {
    rules: Vec<CompiledRule>,
    skipped: Vec<String>,
}

impl PatternSet {
    /// 규칙 목록을 컴파일하여 패턴 집합을 생성합니다.
    ///
    /// 유효하지 않은 정규식을 가진 규칙은 경고 로그와 함께 건너뛰며,
    /// 나머지 규칙으로 집합을 구성합니다.
    pub fn compile(rules: &[DetectionRule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut skipped = Vec::new();
        for rule in rules {
            match CompiledRule::compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) => {
                    warn!(rule = rule.name.as_str(), error = %e, "skipping rule with invalid regex");
                    skipped.push(rule.name.clone());
                }
            }
        }
        Self {
            rules: compiled,
            skipped,
        }
    }

    /// 라인 하나를 모든 규칙에 대해 평가하고, 매칭된 규칙을 반환합니다.
    ///
    /// 규칙은 설정에 선언된 순서대로 평가되며, 첫 매칭에서 멈추지 않고
    /// 매칭된 모든 규칙을 반환합니다.
    pub fn evaluate(&self, line: &str) -> Vec<&DetectionRule> {
        self.rules
            .iter()
            .filter(|c| c.matches(line))
            .map(|c| &c.rule)
            .collect()
    }

    /// 컴파일에 성공한 규칙 수
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 컴파일 실패로 건너뛴 규칙 이름 목록
    pub fn skipped_rules(&self) -> &[String] {
        &self.skipped
    }

    /// 평가할 규칙이 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
