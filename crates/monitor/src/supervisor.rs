//! 모니터 수퍼바이저 -- 테일러 수명주기 관리와 설정 리로드
//!
//! [`MonitorSupervisor`]는 소스마다 테일러 태스크 하나를 띄우고,
//! 설정 변경 시 새 [`RuntimeSnapshot`]을 만들어 원자적으로 교체합니다.
//! 스냅샷 검증(규칙 컴파일 포함)에 실패하면 이전 스냅샷을 유지하므로
//! 잘못된 리로드가 동작 중인 감시를 깨뜨리지 않습니다.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use logwarden_core::config::MonitorConfig;

use crate::error::MonitorError;
use crate::notify::AlertDispatcher;
use crate::pattern::PatternSet;
use crate::position::PositionStore;
use crate::source::{open_source, StartFrom};
use crate::tailer::SourceTailer;

/// 읽기 전용 런타임 스냅샷
///
/// 설정과 그로부터 컴파일된 패턴 집합, 디스패처를 함께 묶습니다.
/// 리로드 시 필드 단위 수정 없이 스냅샷 전체를 교체합니다.
pub struct RuntimeSnapshot {
    /// 설정
    pub config: MonitorConfig,
    /// 컴파일된 규칙 집합
    pub patterns: PatternSet,
    /// 알림 디스패처
    pub dispatcher: AlertDispatcher,
}

impl RuntimeSnapshot {
    /// 설정에서 스냅샷을 만듭니다.
    ///
    /// 유효하지 않은 정규식을 가진 규칙은 경고와 함께 건너뛰며,
    /// 건너뛴 규칙이 있어도 스냅샷 생성은 성공합니다.
    pub fn build(config: MonitorConfig) -> Result<Self, MonitorError> {
        let patterns = PatternSet::compile(&config.rules);
        if !patterns.skipped_rules().is_empty() {
            warn!(
                skipped = patterns.skipped_rules().len(),
                "some rules were skipped due to invalid regexes"
            );
        }
        let dispatcher = AlertDispatcher::new(config.channels.clone(), config.routing.clone())?;
        Ok(Self {
            config,
            patterns,
            dispatcher,
        })
    }
}

/// 수퍼바이저 동작 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// 생성됨, 아직 시작 전
    Created,
    /// 테일러 동작 중
    Running,
    /// 정지 완료
    Stopped,
}

/// 실행 중인 테일러 태스크 핸들
struct TailerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// 모니터 수퍼바이저
pub struct MonitorSupervisor {
    store: Arc<PositionStore>,
    snapshot_tx: watch::Sender<Arc<RuntimeSnapshot>>,
    tailers: HashMap<String, TailerHandle>,
    cancel: CancellationToken,
    state: SupervisorState,
}

impl MonitorSupervisor {
    /// 빌더를 반환합니다.
    pub fn builder() -> MonitorSupervisorBuilder {
        MonitorSupervisorBuilder::default()
    }

    /// 현재 동작 상태
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// 실행 중인 테일러 수
    pub fn tailer_count(&self) -> usize {
        self.tailers.len()
    }

    /// 현재 스냅샷을 구독하는 수신자를 만듭니다.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RuntimeSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// 설정된 모든 소스에 대해 테일러를 시작합니다.
    ///
    /// 소스 하나를 열지 못해도 나머지 소스의 감시는 계속합니다.
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        if self.state == SupervisorState::Running {
            return Err(MonitorError::Supervisor(
                "supervisor is already running".to_owned(),
            ));
        }

        let sources = self.snapshot_tx.borrow().config.sources.clone();
        for source_id in sources {
            self.spawn_tailer(&source_id).await;
        }
        self.state = SupervisorState::Running;
        info!(tailers = self.tailers.len(), "monitor supervisor started");
        Ok(())
    }

    /// 새 설정으로 스냅샷을 교체하고 테일러 집합을 조정합니다.
    ///
    /// 스냅샷 생성에 실패하면 이전 스냅샷과 테일러 집합을 그대로
    /// 유지하고 에러를 반환합니다. 교체 자체는 원자적이며, 진행 중인
    /// 라인 처리는 이전 스냅샷으로 완료되고 다음 라인부터 새 스냅샷이
    /// 적용됩니다.
    pub async fn reconcile(&mut self, config: MonitorConfig) -> Result<(), MonitorError> {
        let snapshot = RuntimeSnapshot::build(config)?;
        let new_sources: Vec<String> = snapshot.config.sources.clone();
        self.snapshot_tx.send_replace(Arc::new(snapshot));

        if self.state != SupervisorState::Running {
            return Ok(());
        }

        // 제거된 소스의 테일러를 정지
        let removed: Vec<String> = self
            .tailers
            .keys()
            .filter(|id| !new_sources.contains(id))
            .cloned()
            .collect();
        for id in removed {
            if let Some(handle) = self.tailers.remove(&id) {
                handle.cancel.cancel();
                if let Err(e) = handle.task.await {
                    error!(source = id.as_str(), error = %e, "tailer task panicked");
                }
                info!(source = id.as_str(), "tailer stopped after reconcile");
            }
        }

        // 추가된 소스의 테일러를 시작
        for id in new_sources {
            if !self.tailers.contains_key(&id) {
                self.spawn_tailer(&id).await;
            }
        }

        info!(tailers = self.tailers.len(), "monitor supervisor reconciled");
        Ok(())
    }

    /// 모든 테일러를 정지하고 체크포인트를 마지막으로 한 번 더 기록합니다.
    pub async fn stop(&mut self) {
        if self.state != SupervisorState::Running {
            return;
        }
        info!("stopping monitor supervisor");
        self.cancel.cancel();
        for (id, handle) in self.tailers.drain() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                error!(source = id.as_str(), error = %e, "tailer task panicked");
            }
        }
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "failed to flush positions on shutdown");
        }
        self.state = SupervisorState::Stopped;
        info!("monitor supervisor stopped");
    }

    /// 소스 하나의 테일러 태스크를 띄웁니다.
    async fn spawn_tailer(&mut self, source_id: &str) {
        if self.tailers.contains_key(source_id) {
            warn!(source = source_id, "duplicate source id, skipping");
            return;
        }
        let start = match self.store.get(source_id).await {
            Some(position) => StartFrom::Position(position),
            None => StartFrom::End,
        };
        let source = match open_source(source_id, start).await {
            Ok(source) => source,
            Err(e) => {
                error!(source = source_id, error = %e, "failed to open source, skipping");
                return;
            }
        };

        let cancel = self.cancel.child_token();
        let tailer = SourceTailer::new(
            source,
            self.snapshot_tx.subscribe(),
            Arc::clone(&self.store),
            cancel.clone(),
        );
        let task = tokio::spawn(tailer.run());
        self.tailers
            .insert(source_id.to_owned(), TailerHandle { cancel, task });
        info!(source = source_id, "tailer started");
    }
}

/// [`MonitorSupervisor`] 빌더
#[derive(Default)]
pub struct MonitorSupervisorBuilder {
    config: Option<MonitorConfig>,
    store: Option<Arc<PositionStore>>,
}

impl MonitorSupervisorBuilder {
    /// 초기 설정을 지정합니다.
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 체크포인트 저장소를 지정합니다.
    ///
    /// 지정하지 않으면 설정의 `general.state_file` 경로로 로드합니다.
    pub fn position_store(mut self, store: Arc<PositionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 수퍼바이저를 생성합니다.
    pub async fn build(self) -> Result<MonitorSupervisor, MonitorError> {
        let config = self.config.unwrap_or_default();
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(PositionStore::load(&config.general.state_file).await),
        };
        let snapshot = RuntimeSnapshot::build(config)?;
        let (snapshot_tx, _) = watch::channel(Arc::new(snapshot));
        Ok(MonitorSupervisor {
            store,
            snapshot_tx,
            tailers: HashMap::new(),
            cancel: CancellationToken::new(),
            state: SupervisorState::Created,
        })
    }
}
