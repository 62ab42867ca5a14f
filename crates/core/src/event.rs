//! 알림 이벤트 -- 매칭 결과를 디스패처로 전달하는 단위
//!
//! [`AlertEvent`]는 규칙 매칭마다 생성되어 디스패처가 즉시 소비하는
//! 일회성 값입니다. 저장되지 않습니다.
//! [`EventMetadata`]는 발생 시각과 추적 ID를 담아 같은 흐름의
//! 로그 레코드를 연결할 수 있게 합니다.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::DetectionRule;

/// 모니터 모듈명
pub const MODULE_MONITOR: &str = "monitor";

/// 이벤트 메타데이터 -- 발생 시각, 생성 모듈, 추적 ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명
    pub source_module: String,
    /// 추적 ID -- 같은 흐름의 이벤트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source={} trace={}", self.source_module, self.trace_id)
    }
}

/// 규칙 매칭으로 생성된 알림 이벤트
///
/// 소스 식별자, 매칭된 규칙, 원본 라인, 포맷된 메시지를 담습니다.
/// `message`가 채널 페이로드 템플릿의 단일 치환 값입니다.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 소스 식별자 (파일 경로 또는 journal:<unit>)
    pub source: String,
    /// 매칭된 규칙
    pub rule: DetectionRule,
    /// 원본 로그 라인
    pub line: String,
    /// 포맷된 알림 메시지
    pub message: String,
}

impl AlertEvent {
    /// 매칭 결과에서 알림 이벤트를 생성합니다.
    pub fn new(source: impl Into<String>, rule: &DetectionRule, line: impl Into<String>) -> Self {
        let source = source.into();
        let line = line.into();
        let message = format!(
            "suspicious activity detected in {source}: rule '{}' (severity {}) matched: {line}",
            rule.name, rule.severity,
        );
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_MONITOR),
            source,
            rule: rule.clone(),
            line,
            message,
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AlertEvent[{}] rule={} severity={} source={}",
            &self.id[..8.min(self.id.len())],
            self.rule.name,
            self.rule.severity,
            self.source,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchType, RegexSpec};

    fn sample_rule() -> DetectionRule {
        DetectionRule {
            name: "ssh-failures".to_owned(),
            regex: RegexSpec::One("failed password".to_owned()),
            match_type: MatchType::Any,
            severity: "high".to_owned(),
            channels: None,
            context: None,
        }
    }

    #[test]
    fn metadata_with_new_trace_generates_uuid() {
        let meta = EventMetadata::with_new_trace(MODULE_MONITOR);
        assert_eq!(meta.source_module, "monitor");
        // UUID v4 형식 확인: 8-4-4-4-12
        assert_eq!(meta.trace_id.len(), 36);
        assert_eq!(meta.trace_id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn metadata_new_preserves_trace_id() {
        let meta = EventMetadata::new("monitor", "trace-abc");
        assert_eq!(meta.trace_id, "trace-abc");
    }

    #[test]
    fn alert_event_message_contains_rule_and_line() {
        let event = AlertEvent::new(
            "/var/log/auth.log",
            &sample_rule(),
            "Failed password for root",
        );
        assert!(event.message.contains("ssh-failures"));
        assert!(event.message.contains("high"));
        assert!(event.message.contains("Failed password for root"));
        assert!(event.message.contains("/var/log/auth.log"));
    }

    #[test]
    fn alert_event_ids_are_unique() {
        let rule = sample_rule();
        let a = AlertEvent::new("src", &rule, "line");
        let b = AlertEvent::new("src", &rule, "line");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn alert_event_display() {
        let event = AlertEvent::new("journal:sshd", &sample_rule(), "line");
        let display = event.to_string();
        assert!(display.contains("ssh-failures"));
        assert!(display.contains("journal:sshd"));
    }

    #[test]
    fn events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<AlertEvent>();
        assert_send_sync::<EventMetadata>();
    }
}
