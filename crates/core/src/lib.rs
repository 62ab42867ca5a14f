//! # logwarden-core
//!
//! Logwarden 공통 타입, 에러, 설정 크레이트입니다.
//!
//! 모니터링 파이프라인과 데몬이 공유하는 기반을 제공합니다:
//!
//! - [`config`]: `logwarden.toml` 설정 스냅샷 로딩과 검증
//! - [`error`]: 최상위 에러 타입과 설정 에러
//! - [`event`]: 규칙 매칭으로 생성되는 알림 이벤트
//! - [`types`]: 탐지 규칙, 채널, 체크포인트 위치 등 도메인 타입

pub mod config;
pub mod error;
pub mod event;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, LogwardenError};

// 설정
pub use config::{
    ChannelsConfig, EmailConfig, GeneralConfig, MonitorConfig, PushConfig, WebhookConfig,
};

// 이벤트
pub use event::{AlertEvent, EventMetadata, MODULE_MONITOR};

// 도메인 타입
pub use types::{ChannelKind, DetectionRule, MatchType, RegexSpec, SourcePosition};
