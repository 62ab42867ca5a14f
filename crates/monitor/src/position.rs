//! 체크포인트 상태 저장 -- 소스별 위치를 JSON 파일로 영속화
//!
//! [`PositionStore`]는 소스 식별자 -> [`SourcePosition`] 맵을 단일 JSON
//! 파일로 관리합니다. 쓰기는 항상 전체 상태 재작성입니다. 파일이 없거나
//! 손상된 경우 빈 상태로 시작하며, 이는 위치 추적을 처음부터 다시
//! 시작한다는 뜻입니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use logwarden_core::types::SourcePosition;

use crate::error::MonitorError;

/// 소스별 체크포인트 위치 저장소
///
/// 내부 맵은 비동기 뮤텍스로 보호되어 여러 테일러 태스크가
/// 공유할 수 있습니다.
pub struct PositionStore {
    path: PathBuf,
    positions: Mutex<HashMap<String, SourcePosition>>,
}

impl PositionStore {
    /// 상태 파일을 읽어 저장소를 생성합니다.
    ///
    /// 파일이 없으면 빈 상태로 시작합니다. 파일이 손상되어 파싱에
    /// 실패하면 경고를 남기고 빈 상태로 시작합니다.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let positions = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, SourcePosition>>(&bytes) {
                Ok(map) => {
                    debug!(path = %path.display(), entries = map.len(), "loaded position state");
                    map
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "position state file is corrupt, starting fresh"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no position state file, starting fresh");
                HashMap::new()
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read position state file, starting fresh"
                );
                HashMap::new()
            }
        };
        Self {
            path,
            positions: Mutex::new(positions),
        }
    }

    /// 소스의 현재 체크포인트 위치를 반환합니다.
    pub async fn get(&self, source: &str) -> Option<SourcePosition> {
        self.positions.lock().await.get(source).cloned()
    }

    /// 소스가 추적 중인지 여부를 반환합니다.
    pub async fn is_tracked(&self, source: &str) -> bool {
        self.positions.lock().await.contains_key(source)
    }

    /// 메모리 상태만 갱신합니다. 디스크에는 쓰지 않습니다.
    pub async fn set(&self, source: &str, position: SourcePosition) {
        self.positions
            .lock()
            .await
            .insert(source.to_owned(), position);
    }

    /// 현재 전체 상태를 디스크에 재작성합니다.
    pub async fn flush(&self) -> Result<(), MonitorError> {
        let guard = self.positions.lock().await;
        let bytes = serde_json::to_vec_pretty(&*guard).map_err(|e| MonitorError::Persistence {
            path: self.path.display().to_string(),
            reason: format!("failed to serialize position state: {e}"),
        })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| MonitorError::Persistence {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// 위치 갱신과 전체 상태 재작성을 한 번에 수행합니다.
    pub async fn commit(&self, source: &str, position: SourcePosition) -> Result<(), MonitorError> {
        self.set(source, position).await;
        self.flush().await
    }

    /// 추적 중인 소스 수를 반환합니다.
    pub async fn len(&self) -> usize {
        self.positions.lock().await.len()
    }

    /// 추적 중인 소스가 없는지 여부
    pub async fn is_empty(&self) -> bool {
        self.positions.lock().await.is_empty()
    }
}
