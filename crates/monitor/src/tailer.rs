//! 소스 테일러 -- 소스 하나를 따라 읽는 폴링 루프
//!
//! [`SourceTailer`]는 소스 하나를 담당하는 태스크입니다. 새 라인을
//! 읽어 현재 스냅샷의 규칙으로 평가하고, 매칭 시 알림을 전송한 뒤
//! 라인 단위로 체크포인트를 기록합니다.
//!
//! 전송은 최소 1회(at-least-once) 보장입니다. 체크포인트는 전송 시도
//! 이후에 기록되므로, 체크포인트 직전에 중단되면 재시작 시 같은 라인이
//! 다시 전송될 수 있습니다. 라인 하나는 정확히 하나의 스냅샷으로
//! 평가됩니다. 리로드가 일어나면 다음 라인부터 새 스냅샷이 적용됩니다.
//!
//! 소스가 사라지거나 읽기가 실패하면 테일러는 에러를 남기고 정지하며,
//! 수퍼바이저는 정지된 테일러를 다시 띄우지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logwarden_core::event::AlertEvent;

use crate::error::MonitorError;
use crate::position::PositionStore;
use crate::source::{LogSource, SourceUnit};
use crate::supervisor::RuntimeSnapshot;

/// 테일러 동작 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    /// 생성됨, 아직 시작 전
    Idle,
    /// 폴링 루프 동작 중
    Following,
    /// 정지 완료
    Stopped,
}

/// 소스 하나를 따라 읽는 테일러
pub struct SourceTailer<S: LogSource> {
    source: S,
    snapshot_rx: watch::Receiver<Arc<RuntimeSnapshot>>,
    store: Arc<PositionStore>,
    cancel: CancellationToken,
    state: TailerState,
}

impl<S: LogSource> SourceTailer<S> {
    /// 새 테일러를 생성합니다.
    pub fn new(
        source: S,
        snapshot_rx: watch::Receiver<Arc<RuntimeSnapshot>>,
        store: Arc<PositionStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            snapshot_rx,
            store,
            cancel,
            state: TailerState::Idle,
        }
    }

    /// 현재 동작 상태
    pub fn state(&self) -> TailerState {
        self.state
    }

    /// 폴링 루프를 실행합니다. 취소 토큰이 취소되거나 소스 읽기가
    /// 실패할 때까지 돌고, 처리 중이던 라인은 완료한 뒤 정지합니다.
    pub async fn run(mut self) {
        self.state = TailerState::Following;
        info!(source = self.source.id(), "tailer following");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let processed = match self.poll_once().await {
                Ok(processed) => processed,
                Err(e) => {
                    // 사라진 파일, 교체된 파일, journalctl 실패 등은
                    // 복구 대상이 아니므로 이 소스의 추적을 끝냄
                    error!(source = self.source.id(), error = %e, "source failed, stopping tailer");
                    break;
                }
            };
            if processed > 0 {
                // 밀린 데이터가 있는 동안은 쉬지 않고 계속 읽음
                continue;
            }

            let interval =
                Duration::from_millis(self.snapshot_rx.borrow().config.general.poll_interval_ms);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.state = TailerState::Stopped;
        info!(source = self.source.id(), "tailer stopped");
    }

    /// 한 번의 폴링 주기를 수행하고 처리한 라인 수를 반환합니다.
    pub async fn poll_once(&mut self) -> Result<usize, MonitorError> {
        let units = self.source.read_batch().await?;

        let mut processed = 0;
        for unit in units {
            self.process_unit(unit).await;
            processed += 1;
            if self.cancel.is_cancelled() {
                // 남은 라인은 체크포인트가 없으므로 재시작 시 다시 읽힘
                break;
            }
        }
        Ok(processed)
    }

    /// 라인 하나를 평가, 전송, 체크포인트 순으로 처리합니다.
    async fn process_unit(&mut self, unit: SourceUnit) {
        // 라인 하나는 하나의 스냅샷으로만 평가함
        let snapshot = self.snapshot_rx.borrow().clone();

        for rule in snapshot.patterns.evaluate(&unit.text) {
            let event = AlertEvent::new(self.source.id(), rule, &unit.text);
            debug!(
                source = self.source.id(),
                rule = rule.name.as_str(),
                event_id = event.id.as_str(),
                "rule matched"
            );
            let report = snapshot.dispatcher.dispatch(&event).await;
            if !report.is_complete() {
                warn!(
                    source = self.source.id(),
                    event_id = event.id.as_str(),
                    failed = report.failed.len(),
                    attempted = report.attempted,
                    "alert delivered with channel failures"
                );
            }
        }

        // 전송 후에 체크포인트를 기록해야 최소 1회 전송이 보장됨
        if let Err(e) = self.store.commit(self.source.id(), unit.position).await {
            warn!(
                source = self.source.id(),
                error = %e,
                "failed to persist checkpoint, continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use logwarden_core::config::MonitorConfig;
    use logwarden_core::types::{DetectionRule, MatchType, RegexSpec, SourcePosition};

    use crate::source::{FileSource, StartFrom};

    fn console_rule(pattern: &str) -> DetectionRule {
        DetectionRule {
            name: "test-rule".to_owned(),
            regex: RegexSpec::One(pattern.to_owned()),
            match_type: MatchType::Any,
            severity: "high".to_owned(),
            channels: Some(vec!["console".to_owned()]),
            context: None,
        }
    }

    fn snapshot_channel(
        rules: Vec<DetectionRule>,
    ) -> watch::Receiver<Arc<RuntimeSnapshot>> {
        let mut config = MonitorConfig::default();
        config.general.poll_interval_ms = 20;
        config.rules = rules;
        let snapshot = RuntimeSnapshot::build(config).unwrap();
        let (tx, rx) = watch::channel(Arc::new(snapshot));
        // 송신자를 살려둬야 수신자가 계속 유효함
        std::mem::forget(tx);
        rx
    }

    async fn tailer_for(
        dir: &tempfile::TempDir,
        log_path: &std::path::Path,
        rules: Vec<DetectionRule>,
    ) -> SourceTailer<FileSource> {
        let source = FileSource::open(log_path.display().to_string(), StartFrom::End)
            .await
            .unwrap();
        let store = Arc::new(PositionStore::load(dir.path().join("state.json")).await);
        SourceTailer::new(
            source,
            snapshot_channel(rules),
            store,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn new_tailer_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "").unwrap();
        let tailer = tailer_for(&dir, &log, vec![console_rule("error")]).await;
        assert_eq!(tailer.state(), TailerState::Idle);
    }

    #[tokio::test]
    async fn poll_processes_new_lines_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "existing\n").unwrap();

        let mut tailer = tailer_for(&dir, &log, vec![console_rule("error")]).await;
        assert_eq!(tailer.poll_once().await.unwrap(), 0);

        let mut f = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(b"an error happened\nall fine\n").unwrap();

        assert_eq!(tailer.poll_once().await.unwrap(), 2);
        let position = tailer.store.get(&log.display().to_string()).await;
        assert_eq!(position, Some(SourcePosition::Line(3)));
    }

    #[tokio::test]
    async fn checkpoint_advances_even_without_matches() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "").unwrap();

        let mut tailer = tailer_for(&dir, &log, vec![console_rule("never-matches-xyz")]).await;
        std::fs::write(&log, "quiet line\n").unwrap();
        assert_eq!(tailer.poll_once().await.unwrap(), 1);
        assert_eq!(
            tailer.store.get(&log.display().to_string()).await,
            Some(SourcePosition::Line(1))
        );
    }

    #[tokio::test]
    async fn persistence_failure_does_not_stop_processing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "").unwrap();

        let source = FileSource::open(log.display().to_string(), StartFrom::End)
            .await
            .unwrap();
        // 쓸 수 없는 경로의 저장소
        let store = Arc::new(PositionStore::load("/nonexistent-dir/deep/state.json").await);
        let mut tailer = SourceTailer::new(
            source,
            snapshot_channel(vec![console_rule("error")]),
            store,
            CancellationToken::new(),
        );

        std::fs::write(&log, "error one\nerror two\n").unwrap();
        assert_eq!(tailer.poll_once().await.unwrap(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn vanished_source_leaves_no_stale_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "first line\n").unwrap();

        let mut tailer = tailer_for(&dir, &log, vec![console_rule("error")]).await;

        // 삭제 후 기존 오프셋보다 긴 파일로 재생성: 묵은 오프셋으로
        // 이어 읽혀 엉뚱한 라인과 체크포인트가 남으면 안 됨
        std::fs::remove_file(&log).unwrap();
        std::fs::write(&log, "error resurrected from a new file\n").unwrap();

        assert!(tailer.poll_once().await.is_err());
        assert_eq!(tailer.store.get(&log.display().to_string()).await, None);
    }

    #[tokio::test]
    async fn run_exits_when_source_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "").unwrap();

        let tailer = tailer_for(&dir, &log, vec![console_rule("error")]).await;
        let task = tokio::spawn(tailer.run());

        std::fs::remove_file(&log).unwrap();
        // 취소 없이도 소스가 사라지면 스스로 정지해야 함
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("tailer should stop after its source vanishes")
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_promptly_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "").unwrap();

        let source = FileSource::open(log.display().to_string(), StartFrom::End)
            .await
            .unwrap();
        let store = Arc::new(PositionStore::load(dir.path().join("state.json")).await);
        let cancel = CancellationToken::new();
        let tailer = SourceTailer::new(
            source,
            snapshot_channel(vec![console_rule("error")]),
            store,
            cancel.clone(),
        );

        let task = tokio::spawn(tailer.run());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("tailer should stop quickly after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn line_read_before_reload_uses_old_snapshot_next_line_uses_new() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "").unwrap();

        let mut config = MonitorConfig::default();
        config.rules = vec![console_rule("error")];
        let (tx, rx) = watch::channel(Arc::new(RuntimeSnapshot::build(config).unwrap()));

        let source = FileSource::open(log.display().to_string(), StartFrom::End)
            .await
            .unwrap();
        let store = Arc::new(PositionStore::load(dir.path().join("state.json")).await);
        let mut tailer = SourceTailer::new(source, rx, store, CancellationToken::new());

        std::fs::write(&log, "error line\n").unwrap();
        assert_eq!(tailer.poll_once().await.unwrap(), 1);

        // 규칙을 전부 제거한 새 스냅샷으로 교체
        let empty = RuntimeSnapshot::build(MonitorConfig::default()).unwrap();
        tx.send_replace(Arc::new(empty));

        let mut f = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(b"another error line\n").unwrap();
        // 새 스냅샷에는 규칙이 없으므로 매칭 없이 체크포인트만 전진
        assert_eq!(tailer.poll_once().await.unwrap(), 1);
        assert_eq!(
            tailer.store.get(&log.display().to_string()).await,
            Some(SourcePosition::Line(2))
        );
    }
}
