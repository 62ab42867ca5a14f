//! 설정 관리 -- logwarden.toml 파싱 및 불변 스냅샷
//!
//! [`MonitorConfig`]는 모니터링 코어가 사용하는 전체 설정 스냅샷입니다.
//! 스냅샷은 읽기 전용이며, 리로드 시 필드 단위 수정 없이 통째로 교체됩니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`LOGWARDEN_GENERAL_LOG_LEVEL=debug` 형식)
//! 2. 설정 파일 (`logwarden.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logwarden_core::error::LogwardenError> {
//! use logwarden_core::config::MonitorConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = MonitorConfig::load("logwarden.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = MonitorConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogwardenError};
use crate::types::{ChannelKind, DetectionRule};

/// Logwarden 통합 설정 스냅샷
///
/// `logwarden.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 감시할 소스 식별자 목록 (파일 경로 또는 `journal:<unit>`)
    pub sources: Vec<String>,
    /// 일반 설정
    pub general: GeneralConfig,
    /// 탐지 규칙 목록
    pub rules: Vec<DetectionRule>,
    /// 심각도 라벨 -> 채널 이름 목록 라우팅 테이블
    pub routing: HashMap<String, Vec<String>>,
    /// 채널별 전송 설정
    pub channels: ChannelsConfig,
}

impl MonitorConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogwardenError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogwardenError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogwardenError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogwardenError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogwardenError> {
        toml::from_str(toml_str).map_err(|e| {
            LogwardenError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGWARDEN_{SECTION}_{FIELD}`
    /// 예: `LOGWARDEN_GENERAL_LOG_LEVEL=debug`
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "LOGWARDEN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGWARDEN_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.state_file, "LOGWARDEN_GENERAL_STATE_FILE");
        override_u64(
            &mut self.general.poll_interval_ms,
            "LOGWARDEN_GENERAL_POLL_INTERVAL_MS",
        );

        override_csv(&mut self.sources, "LOGWARDEN_SOURCES");

        override_bool(&mut self.channels.email.enabled, "LOGWARDEN_EMAIL_ENABLED");
        override_string(
            &mut self.channels.email.smtp_server,
            "LOGWARDEN_EMAIL_SMTP_SERVER",
        );
        override_u16(&mut self.channels.email.smtp_port, "LOGWARDEN_EMAIL_SMTP_PORT");
        override_string(&mut self.channels.email.username, "LOGWARDEN_EMAIL_USERNAME");
        override_string(&mut self.channels.email.password, "LOGWARDEN_EMAIL_PASSWORD");

        override_bool(
            &mut self.channels.webhook.enabled,
            "LOGWARDEN_WEBHOOK_ENABLED",
        );
        override_string(&mut self.channels.webhook.url, "LOGWARDEN_WEBHOOK_URL");

        override_bool(&mut self.channels.push.enabled, "LOGWARDEN_PUSH_ENABLED");
        override_string(&mut self.channels.push.api_url, "LOGWARDEN_PUSH_API_URL");
        override_string(&mut self.channels.push.api_key, "LOGWARDEN_PUSH_API_KEY");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogwardenError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.general.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "general.poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.general.state_file.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.state_file".to_owned(),
                reason: "state file path must not be empty".to_owned(),
            }
            .into());
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules[{idx}].name"),
                    reason: "rule name must not be empty".to_owned(),
                }
                .into());
            }
        }

        for (severity, channel_names) in &self.routing {
            for name in channel_names {
                if ChannelKind::from_str_loose(name).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("routing.{severity}"),
                        reason: format!(
                            "unknown channel '{name}', expected one of: console, email, webhook, push"
                        ),
                    }
                    .into());
                }
            }
        }

        if self.channels.email.enabled {
            if self.channels.email.smtp_server.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "channels.email.smtp_server".to_owned(),
                    reason: "must not be empty when email is enabled".to_owned(),
                }
                .into());
            }
            if self.channels.email.to_addrs.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "channels.email.to_addrs".to_owned(),
                    reason: "at least one recipient is required when email is enabled".to_owned(),
                }
                .into());
            }
        }

        if self.channels.webhook.enabled && self.channels.webhook.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "channels.webhook.url".to_owned(),
                reason: "must not be empty when webhook is enabled".to_owned(),
            }
            .into());
        }

        if self.channels.push.enabled && self.channels.push.api_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "channels.push.api_url".to_owned(),
                reason: "must not be empty when push is enabled".to_owned(),
            }
            .into());
        }

        if self.channels.webhook.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channels.webhook.timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.channels.push.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channels.push.timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 체크포인트 상태 파일 경로
    pub state_file: String,
    /// 새 데이터가 없을 때의 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            state_file: "/var/lib/logwarden/state.json".to_owned(),
            poll_interval_ms: 1000,
        }
    }
}

/// 채널별 전송 설정 묶음
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// 이메일 채널
    pub email: EmailConfig,
    /// 웹훅 채널
    pub webhook: WebhookConfig,
    /// 푸시 채널
    pub push: PushConfig,
}

/// 이메일 채널 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// SMTP 릴레이 호스트
    pub smtp_server: String,
    /// SMTP 포트 (STARTTLS)
    pub smtp_port: u16,
    /// SMTP 사용자명
    pub username: String,
    /// SMTP 비밀번호
    pub password: String,
    /// 발신 주소
    pub from_addr: String,
    /// 수신 주소 목록
    pub to_addrs: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from_addr: String::new(),
            to_addrs: Vec::new(),
        }
    }
}

/// 웹훅 채널 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// POST 대상 URL
    pub url: String,
    /// 요청 헤더
    pub headers: HashMap<String, String>,
    /// JSON 페이로드 템플릿 -- `{{alert_message}}` 자리에 메시지 치환
    pub payload_template: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            headers: HashMap::new(),
            payload_template: r#"{"message": "{{alert_message}}"}"#.to_owned(),
            timeout_secs: 5,
        }
    }
}

/// 푸시 채널 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 푸시 API URL
    pub api_url: String,
    /// Bearer 인증 토큰
    pub api_key: String,
    /// 디바이스 토큰 목록 (토큰당 1회 POST)
    pub device_tokens: Vec<String>,
    /// JSON 페이로드 템플릿 -- `{{alert_message}}` 자리에 메시지 치환
    pub payload_template: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            api_key: String::new(),
            device_tokens: Vec::new(),
            payload_template: r#"{"title": "logwarden alert", "body": "{{alert_message}}"}"#
                .to_owned(),
            timeout_secs: 5,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val.split(',').map(|s| s.trim().to_owned()).collect();
    }
}
