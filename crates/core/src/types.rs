//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! 탐지 규칙, 알림 채널, 소스 체크포인트 위치 등
//! 모든 모듈이 공유하는 데이터 구조를 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 탐지 규칙
///
/// 로그 라인 하나를 평가하는 단위 기준입니다.
/// `severity`는 라우팅 테이블의 문자열 키이며,
/// `channels`가 지정되면 심각도 라우팅을 규칙 단위로 오버라이드합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    /// 규칙 이름 (비어 있으면 안 됨)
    pub name: String,
    /// 정규식 -- 단일 패턴 또는 패턴 목록
    pub regex: RegexSpec,
    /// 매칭 모드
    #[serde(default)]
    pub match_type: MatchType,
    /// 심각도 라벨 (라우팅 테이블 키)
    pub severity: String,
    /// 채널 오버라이드 (없으면 심각도 라우팅 사용)
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    /// 불투명 컨텍스트 -- 코어 로직은 건드리지 않고 그대로 전달
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// 규칙의 정규식 필드 -- 단일 문자열 또는 문자열 목록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegexSpec {
    /// 단일 패턴
    One(String),
    /// 패턴 목록
    Many(Vec<String>),
}

impl RegexSpec {
    /// 매칭 모드에 따라 실제 평가할 패턴 목록을 반환합니다.
    ///
    /// - `Any` + 단일 문자열: 문자열 전체가 하나의 패턴 (쉼표 분리 없음,
    ///   정규식 수량자 `{2,3}` 등의 쉼표를 보존)
    /// - `All` + 단일 문자열: 쉼표로 분리하고 공백을 제거, 빈 항목 제외
    /// - 목록: 항목별 공백 제거, 빈 항목 제외
    pub fn patterns_for(&self, match_type: MatchType) -> Vec<String> {
        match self {
            Self::One(s) => match match_type {
                MatchType::Any => vec![s.clone()],
                MatchType::All => s
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect(),
            },
            Self::Many(list) => list
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// 규칙 매칭 모드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// 패턴 중 하나라도 매칭되면 규칙 매칭 (기본값)
    #[default]
    Any,
    /// 모든 패턴이 매칭되어야 규칙 매칭
    All,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::All => write!(f, "all"),
        }
    }
}

/// 알림 채널 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// 운영 로그 스트림에 동기 기록
    Console,
    /// SMTP 메일 발송
    Email,
    /// HTTP POST 웹훅
    Webhook,
    /// 디바이스 토큰별 푸시 알림
    Push,
}

impl ChannelKind {
    /// 문자열에서 채널 종류를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" => Some(Self::Console),
            "email" | "mail" => Some(Self::Email),
            "webhook" => Some(Self::Webhook),
            "push" => Some(Self::Push),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::Email => write!(f, "email"),
            Self::Webhook => write!(f, "webhook"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// 소스별 체크포인트 위치
///
/// 평문 파일은 소비한 라인 수, 구조화 이벤트 로그(journald)는
/// 마지막으로 본 레코드 커서를 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SourcePosition {
    /// 소비한 라인 수 (평문 파일)
    Line(u64),
    /// 불투명 레코드 커서 (journald)
    Cursor(String),
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::Line(0)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(n) => write!(f, "line:{n}"),
            Self::Cursor(c) => write!(f, "cursor:{c}"),
        }
    }
}
