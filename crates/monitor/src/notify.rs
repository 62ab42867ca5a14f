//! 알림 전송 -- 알림 이벤트를 설정된 채널로 내보냅니다.
//!
//! [`AlertDispatcher`]는 규칙 매칭으로 생성된
//! [`AlertEvent`](logwarden_core::event::AlertEvent)를 받아
//! 심각도 라우팅 테이블(또는 규칙의 채널 오버라이드)에 따라
//! console, email, webhook, push 채널로 전송합니다.
//!
//! 채널 간 실패는 격리됩니다. 한 채널의 전송 실패는 에러 로그를 남기고
//! 나머지 채널 전송을 계속하며, 호출자에게는 [`DispatchReport`]로
//! 집계 결과만 돌려줍니다. 재시도는 하지 않습니다.

use std::collections::HashMap;
use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::{debug, error, warn};

use logwarden_core::config::ChannelsConfig;
use logwarden_core::event::AlertEvent;
use logwarden_core::types::ChannelKind;

use crate::error::MonitorError;

/// 페이로드 템플릿의 치환 자리표시자
const MESSAGE_PLACEHOLDER: &str = "{{alert_message}}";

/// 단일 이벤트 전송 결과 집계
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// 전송을 시도한 채널 수
    pub attempted: usize,
    /// 실패한 채널 이름 목록
    pub failed: Vec<String>,
}

impl DispatchReport {
    /// 모든 채널 전송이 성공했는지 여부
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 알림 디스패처
///
/// 설정 스냅샷마다 생성되는 값입니다. HTTP 클라이언트는 내부 커넥션 풀을
/// 공유하므로 전송마다 재생성하지 않습니다.
pub struct AlertDispatcher {
    channels: ChannelsConfig,
    routing: HashMap<String, Vec<String>>,
    http: reqwest::Client,
}

impl AlertDispatcher {
    /// 채널 설정과 라우팅 테이블로 디스패처를 생성합니다.
    pub fn new(
        channels: ChannelsConfig,
        routing: HashMap<String, Vec<String>>,
    ) -> Result<Self, MonitorError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| MonitorError::Delivery {
                channel: "http".to_owned(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            channels,
            routing,
            http,
        })
    }

    /// 이벤트 하나를 해석된 모든 채널로 전송합니다.
    ///
    /// 채널별 실패는 에러 로그로 남기고 다음 채널로 진행합니다.
    pub async fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        for kind in self.resolve_channels(event) {
            report.attempted += 1;
            let result = match kind {
                ChannelKind::Console => {
                    self.send_console(event);
                    Ok(())
                }
                ChannelKind::Email => self.send_email(event).await,
                ChannelKind::Webhook => self.send_webhook(event).await,
                ChannelKind::Push => self.send_push(event).await,
            };
            if let Err(e) = result {
                error!(
                    channel = %kind,
                    event_id = event.id.as_str(),
                    error = %e,
                    "alert delivery failed"
                );
                report.failed.push(kind.to_string());
            }
        }
        report
    }

    /// 이벤트가 전송될 채널 목록을 해석합니다.
    ///
    /// 우선순위: 규칙의 채널 오버라이드 > 심각도 라우팅 테이블.
    /// 어느 쪽도 없거나 유효한 채널이 하나도 남지 않으면 경고만 남기고
    /// 빈 목록을 반환합니다. 라우팅되지 않은 심각도는 no-op입니다.
    fn resolve_channels(&self, event: &AlertEvent) -> Vec<ChannelKind> {
        let names = event
            .rule
            .channels
            .as_ref()
            .or_else(|| self.routing.get(&event.rule.severity));

        let mut resolved: Vec<ChannelKind> = Vec::new();
        if let Some(names) = names {
            for name in names {
                match ChannelKind::from_str_loose(name) {
                    Some(kind) if !resolved.contains(&kind) => resolved.push(kind),
                    Some(_) => {} // 중복 제거
                    None => warn!(
                        channel = name.as_str(),
                        rule = event.rule.name.as_str(),
                        "unknown channel name in routing, skipping"
                    ),
                }
            }
        }

        if resolved.is_empty() {
            warn!(
                severity = event.rule.severity.as_str(),
                rule = event.rule.name.as_str(),
                "no routable channel for severity, alert not delivered"
            );
        }
        resolved
    }

    /// 알림을 운영 로그 스트림에 동기 기록합니다.
    fn send_console(&self, event: &AlertEvent) {
        warn!(
            rule = event.rule.name.as_str(),
            severity = event.rule.severity.as_str(),
            source = event.source.as_str(),
            "{}", event.message
        );
    }

    /// SMTP(STARTTLS)로 알림 메일을 발송합니다.
    async fn send_email(&self, event: &AlertEvent) -> Result<(), MonitorError> {
        let cfg = &self.channels.email;
        if !cfg.enabled {
            debug!(event_id = event.id.as_str(), "email channel disabled, skipping");
            return Ok(());
        }

        let from: Mailbox = cfg.from_addr.parse().map_err(|e| MonitorError::Delivery {
            channel: "email".to_owned(),
            reason: format!("invalid from address '{}': {e}", cfg.from_addr),
        })?;
        let mut builder = Message::builder()
            .from(from)
            .subject(format!("logwarden alert: {}", event.rule.name));
        for addr in &cfg.to_addrs {
            let to: Mailbox = addr.parse().map_err(|e| MonitorError::Delivery {
                channel: "email".to_owned(),
                reason: format!("invalid recipient '{addr}': {e}"),
            })?;
            builder = builder.to(to);
        }
        let email = builder
            .body(event.message.clone())
            .map_err(|e| MonitorError::Delivery {
                channel: "email".to_owned(),
                reason: format!("failed to build message: {e}"),
            })?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_server)
            .map_err(|e| MonitorError::Delivery {
                channel: "email".to_owned(),
                reason: format!("invalid smtp relay '{}': {e}", cfg.smtp_server),
            })?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .timeout(Some(Duration::from_secs(5)))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| MonitorError::Delivery {
                channel: "email".to_owned(),
                reason: e.to_string(),
            })?;
        debug!(event_id = event.id.as_str(), "email alert sent");
        Ok(())
    }

    /// 설정된 URL로 템플릿 페이로드를 HTTP POST 합니다.
    async fn send_webhook(&self, event: &AlertEvent) -> Result<(), MonitorError> {
        let cfg = &self.channels.webhook;
        if !cfg.enabled {
            debug!(event_id = event.id.as_str(), "webhook channel disabled, skipping");
            return Ok(());
        }

        let body = render_template(&cfg.payload_template, &event.message);
        let mut request = self
            .http
            .post(&cfg.url)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .header("Content-Type", "application/json");
        for (key, value) in &cfg.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| MonitorError::Delivery {
                channel: "webhook".to_owned(),
                reason: e.to_string(),
            })?;
        response
            .error_for_status()
            .map_err(|e| MonitorError::Delivery {
                channel: "webhook".to_owned(),
                reason: e.to_string(),
            })?;
        debug!(event_id = event.id.as_str(), "webhook alert sent");
        Ok(())
    }

    /// 디바이스 토큰마다 푸시 API에 알림을 POST 합니다.
    ///
    /// 토큰 하나의 실패가 나머지 토큰 전송을 막지 않습니다.
    /// 하나라도 실패하면 채널 전체를 실패로 집계합니다.
    async fn send_push(&self, event: &AlertEvent) -> Result<(), MonitorError> {
        let cfg = &self.channels.push;
        if !cfg.enabled {
            debug!(event_id = event.id.as_str(), "push channel disabled, skipping");
            return Ok(());
        }

        let rendered = render_template(&cfg.payload_template, &event.message);
        let payload: serde_json::Value =
            serde_json::from_str(&rendered).map_err(|e| MonitorError::Delivery {
                channel: "push".to_owned(),
                reason: format!("payload template is not valid json after substitution: {e}"),
            })?;

        let mut failures = 0usize;
        for token in &cfg.device_tokens {
            let body = json!({
                "to": token,
                "notification": payload,
            });
            let mut request = self
                .http
                .post(&cfg.api_url)
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .json(&body);
            if !cfg.api_key.is_empty() {
                request = request.bearer_auth(&cfg.api_key);
            }

            let result = request.send().await.and_then(|r| r.error_for_status());
            if let Err(e) = result {
                error!(
                    device_token = token.as_str(),
                    error = %e,
                    "push delivery failed for device token"
                );
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(MonitorError::Delivery {
                channel: "push".to_owned(),
                reason: format!("{failures}/{} device tokens failed", cfg.device_tokens.len()),
            });
        }
        debug!(event_id = event.id.as_str(), "push alert sent");
        Ok(())
    }
}

/// 템플릿의 `{{alert_message}}` 자리에 메시지를 치환합니다.
///
/// 결과가 JSON 문서로 쓰이므로 메시지는 JSON 문자열로 이스케이프합니다.
fn render_template(template: &str, message: &str) -> String {
    // to_string은 따옴표로 감싼 JSON 문자열을 만들므로 양 끝을 제거
    let escaped = serde_json::Value::String(message.to_owned()).to_string();
    let escaped = &escaped[1..escaped.len() - 1];
    template.replace(MESSAGE_PLACEHOLDER, escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_core::types::{DetectionRule, MatchType, RegexSpec};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn rule_with(severity: &str, channels: Option<Vec<String>>) -> DetectionRule {
        DetectionRule {
            name: "test-rule".to_owned(),
            regex: RegexSpec::One("error".to_owned()),
            match_type: MatchType::Any,
            severity: severity.to_owned(),
            channels,
            context: None,
        }
    }

    fn sample_event(severity: &str, channels: Option<Vec<String>>) -> AlertEvent {
        AlertEvent::new("/var/log/test.log", &rule_with(severity, channels), "error line")
    }

    fn routing(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, v)| {
                (
                    (*k).to_owned(),
                    v.iter().map(|s| (*s).to_owned()).collect(),
                )
            })
            .collect()
    }

    /// 요청 N개를 받아 200으로 응답하는 단순 HTTP 스텁을 띄웁니다.
    async fn spawn_http_stub(expected_requests: usize) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut bodies = Vec::new();
            for _ in 0..expected_requests {
                let (mut stream, _) = listener.accept().await.unwrap();
                bodies.push(read_http_body(&mut stream).await);
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await
                    .unwrap();
            }
            bodies
        });
        (format!("http://{addr}"), handle)
    }

    /// content-length만큼 본문이 도착할 때까지 읽어 본문을 반환합니다.
    async fn read_http_body(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + content_length {
                    return String::from_utf8_lossy(&buf[pos + 4..pos + 4 + content_length])
                        .to_string();
                }
            }
        }
        String::new()
    }

    #[test]
    fn render_template_substitutes_message() {
        let out = render_template(r#"{"text": "{{alert_message}}"}"#, "disk full");
        assert_eq!(out, r#"{"text": "disk full"}"#);
    }

    #[test]
    fn render_template_escapes_json_special_characters() {
        let out = render_template(
            r#"{"text": "{{alert_message}}"}"#,
            "rule \"q\" matched: C:\\logs",
        );
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["text"], "rule \"q\" matched: C:\\logs");
    }

    #[test]
    fn resolve_uses_severity_routing() {
        let dispatcher = AlertDispatcher::new(
            ChannelsConfig::default(),
            routing(&[("high", &["console", "webhook"])]),
        )
        .unwrap();
        let channels = dispatcher.resolve_channels(&sample_event("high", None));
        assert_eq!(channels, vec![ChannelKind::Console, ChannelKind::Webhook]);
    }

    #[test]
    fn resolve_rule_override_wins_over_routing() {
        let dispatcher = AlertDispatcher::new(
            ChannelsConfig::default(),
            routing(&[("high", &["email"])]),
        )
        .unwrap();
        let event = sample_event("high", Some(vec!["push".to_owned()]));
        assert_eq!(dispatcher.resolve_channels(&event), vec![ChannelKind::Push]);
    }

    #[test]
    fn resolve_unrouted_severity_is_empty() {
        let dispatcher =
            AlertDispatcher::new(ChannelsConfig::default(), routing(&[("high", &["email"])]))
                .unwrap();
        let channels = dispatcher.resolve_channels(&sample_event("unknown", None));
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn unrouted_severity_dispatch_is_a_noop() {
        let dispatcher =
            AlertDispatcher::new(ChannelsConfig::default(), routing(&[("high", &["email"])]))
                .unwrap();
        let report = dispatcher.dispatch(&sample_event("unrouted", None)).await;
        assert_eq!(report.attempted, 0);
        assert!(report.is_complete());
    }

    #[test]
    fn resolve_skips_unknown_names_and_dedupes() {
        let dispatcher = AlertDispatcher::new(
            ChannelsConfig::default(),
            routing(&[("high", &["console", "pager", "Console", "mail"])]),
        )
        .unwrap();
        let channels = dispatcher.resolve_channels(&sample_event("high", None));
        assert_eq!(channels, vec![ChannelKind::Console, ChannelKind::Email]);
    }

    #[tokio::test]
    async fn console_only_dispatch_succeeds() {
        let dispatcher = AlertDispatcher::new(
            ChannelsConfig::default(),
            routing(&[("high", &["console"])]),
        )
        .unwrap();
        let report = dispatcher.dispatch(&sample_event("high", None)).await;
        assert_eq!(report.attempted, 1);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn disabled_webhook_is_a_silent_noop() {
        // 비활성 채널은 실패가 아니라 no-op
        let dispatcher = AlertDispatcher::new(
            ChannelsConfig::default(),
            routing(&[("high", &["webhook"])]),
        )
        .unwrap();
        let report = dispatcher.dispatch(&sample_event("high", None)).await;
        assert_eq!(report.attempted, 1);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn webhook_posts_rendered_payload() {
        let (url, handle) = spawn_http_stub(1).await;
        let mut channels = ChannelsConfig::default();
        channels.webhook.enabled = true;
        channels.webhook.url = url;
        channels.webhook.payload_template = r#"{"text": "{{alert_message}}"}"#.to_owned();

        let dispatcher =
            AlertDispatcher::new(channels, routing(&[("high", &["webhook"])])).unwrap();
        let event = sample_event("high", None);
        let report = dispatcher.dispatch(&event).await;
        assert!(report.is_complete());

        let bodies = handle.await.unwrap();
        let payload: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(payload["text"], event.message);
    }

    #[tokio::test]
    async fn push_posts_once_per_device_token() {
        let (url, handle) = spawn_http_stub(2).await;
        let mut channels = ChannelsConfig::default();
        channels.push.enabled = true;
        channels.push.api_url = url;
        channels.push.api_key = "secret-key".to_owned();
        channels.push.device_tokens = vec!["tok-a".to_owned(), "tok-b".to_owned()];

        let dispatcher = AlertDispatcher::new(channels, routing(&[("high", &["push"])])).unwrap();
        let report = dispatcher.dispatch(&sample_event("high", None)).await;
        assert_eq!(report.attempted, 1);
        assert!(report.is_complete());

        let bodies = handle.await.unwrap();
        assert_eq!(bodies.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(first["to"], "tok-a");
        assert!(first["notification"]["body"].is_string());
    }

    #[tokio::test]
    async fn failed_channel_does_not_block_others() {
        // 웹훅은 연결 거부로 실패, console은 성공해야 함
        let mut channels = ChannelsConfig::default();
        channels.webhook.enabled = true;
        channels.webhook.url = "http://127.0.0.1:9/unreachable".to_owned();
        channels.webhook.timeout_secs = 1;

        let dispatcher = AlertDispatcher::new(
            channels,
            routing(&[("high", &["webhook", "console"])]),
        )
        .unwrap();
        let report = dispatcher.dispatch(&sample_event("high", None)).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, vec!["webhook".to_owned()]);
    }

    #[tokio::test]
    async fn push_with_invalid_template_fails_cleanly() {
        let mut channels = ChannelsConfig::default();
        channels.push.enabled = true;
        channels.push.api_url = "http://127.0.0.1:9/unreachable".to_owned();
        channels.push.payload_template = "not json {{alert_message}}".to_owned();
        channels.push.device_tokens = vec!["tok".to_owned()];

        let dispatcher = AlertDispatcher::new(channels, routing(&[("high", &["push"])])).unwrap();
        let report = dispatcher.dispatch(&sample_event("high", None)).await;
        assert_eq!(report.failed, vec!["push".to_owned()]);
    }
}
