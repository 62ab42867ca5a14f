//! 모니터링 파이프라인 에러 타입
//!
//! [`MonitorError`]는 소스 수집, 규칙 매칭, 알림 전송, 상태 저장 등
//! 모니터링 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<MonitorError> for LogwardenError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use logwarden_core::error::LogwardenError;

/// 모니터링 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// 소스 읽기 실패 (파일 I/O, journalctl 실행 등)
    #[error("source error: {id}: {reason}")]
    Source {
        /// 소스 식별자
        id: String,
        /// 에러 사유
        reason: String,
    },

    /// 규칙 컴파일 또는 평가 실패
    #[error("rule error: rule '{name}': {reason}")]
    Rule {
        /// 문제가 된 규칙 이름
        name: String,
        /// 에러 사유
        reason: String,
    },

    /// 알림 전송 실패
    #[error("delivery error: channel {channel}: {reason}")]
    Delivery {
        /// 전송 채널명
        channel: String,
        /// 전송 실패 사유
        reason: String,
    },

    /// 체크포인트 상태 저장 실패
    #[error("persistence error: {path}: {reason}")]
    Persistence {
        /// 상태 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 수퍼바이저 수명주기 에러
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<MonitorError> for LogwardenError {
    fn from(err: MonitorError) -> Self {
        LogwardenError::Monitor(err.to_string())
    }
}
