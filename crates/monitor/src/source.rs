//! 로그 소스 -- 평문 파일 및 journald 유닛 읽기
//!
//! [`LogSource`]는 소스에서 새 라인 묶음을 읽는 trait입니다.
//! 각 [`SourceUnit`]은 라인 텍스트와 그 라인을 소비한 직후의
//! 체크포인트 위치를 함께 담아, 테일러가 라인 단위로 정확히
//! 체크포인트를 기록할 수 있게 합니다.
//!
//! 소스 식별자 규칙:
//! - `journal:<unit>` 접두사는 journald 유닛 (예: `journal:sshd`)
//! - 그 외는 평문 파일 경로 (예: `/var/log/syslog`)

use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use logwarden_core::types::SourcePosition;

use crate::error::MonitorError;

/// journald 소스 식별자 접두사
pub const JOURNAL_PREFIX: &str = "journal:";

/// 소스에서 읽은 단위 하나
///
/// `position`은 이 단위를 소비한 직후의 체크포인트 위치입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    /// 라인 텍스트 (개행 제외)
    pub text: String,
    /// 소비 직후 체크포인트 위치
    pub position: SourcePosition,
}

/// 소스를 열 때의 시작 위치
#[derive(Debug, Clone)]
pub enum StartFrom {
    /// 기존 내용을 건너뛰고 현재 끝부터 시작
    End,
    /// 저장된 체크포인트 위치에서 재개
    Position(SourcePosition),
}

/// 로그 소스 trait
///
/// 구현체는 내부에 읽기 진행 상태를 유지하며, `read_batch` 호출마다
/// 마지막 호출 이후 새로 나타난 라인을 반환합니다.
#[allow(async_fn_in_trait)]
pub trait LogSource {
    /// 소스 식별자
    fn id(&self) -> &str;

    /// 새 라인 묶음을 읽습니다. 새 데이터가 없으면 빈 벡터를 반환합니다.
    async fn read_batch(&mut self) -> Result<Vec<SourceUnit>, MonitorError>;
}

/// 평문 파일 소스
///
/// 소비한 라인 수와 바이트 오프셋을 함께 추적합니다. 체크포인트는
/// 라인 수로 기록하고, 바이트 오프셋은 다음 읽기의 시작점과
/// 파일 잘림 감지에 사용합니다. 읽기는 항상 오프셋에서 seek 후
/// 새로 추가된 꼬리만 읽습니다.
///
/// 파일이 사라지거나 다른 파일로 교체되면(inode 변경) 복구하지 않고
/// `Source` 에러를 반환합니다. 테일러는 이 에러로 정지합니다.
#[derive(Debug)]
pub struct FileSource {
    id: String,
    path: PathBuf,
    byte_offset: u64,
    line_count: u64,
    #[cfg(unix)]
    inode: Option<u64>,
}

impl FileSource {
    /// 파일 소스를 엽니다. 파일이 없으면 에러입니다.
    ///
    /// `StartFrom::End`는 현재 파일 내용 전체를 건너뜁니다.
    /// `StartFrom::Position(Line(n))`은 앞의 n개 라인을 건너뛰고
    /// 재개합니다. 파일이 체크포인트보다 짧으면 회전된 것으로 보고
    /// 처음부터 다시 시작합니다.
    pub async fn open(
        id: impl Into<String>,
        start: StartFrom,
    ) -> Result<Self, MonitorError> {
        let id = id.into();
        let path = PathBuf::from(&id);
        let mut source = Self {
            id,
            path,
            byte_offset: 0,
            line_count: 0,
            #[cfg(unix)]
            inode: None,
        };

        let target = match start {
            StartFrom::End => None,
            StartFrom::Position(SourcePosition::Line(n)) => Some(n),
            StartFrom::Position(SourcePosition::Cursor(_)) => {
                // 파일 소스에 커서 체크포인트가 남아 있으면 소스 종류가
                // 바뀐 것이므로 처음부터 다시 시작
                warn!(
                    source = source.id.as_str(),
                    "cursor checkpoint for a file source, starting from the beginning"
                );
                Some(0)
            }
        };

        let file = tokio::fs::File::open(&source.path)
            .await
            .map_err(|e| MonitorError::Source {
                id: source.id.clone(),
                reason: match e.kind() {
                    std::io::ErrorKind::NotFound => "log file not found".to_owned(),
                    _ => e.to_string(),
                },
            })?;
        #[cfg(unix)]
        {
            let meta = file.metadata().await.map_err(|e| MonitorError::Source {
                id: source.id.clone(),
                reason: e.to_string(),
            })?;
            source.inode = Some(std::os::unix::fs::MetadataExt::ino(&meta));
        }

        let (lines, consumed) =
            scan_complete_lines(file, target)
                .await
                .map_err(|e| MonitorError::Source {
                    id: source.id.clone(),
                    reason: e.to_string(),
                })?;
        match target {
            Some(n) if lines < n => {
                warn!(
                    source = source.id.as_str(),
                    checkpoint = n,
                    available = lines,
                    "file is shorter than checkpoint, assuming rotation and starting over"
                );
            }
            _ => {
                source.line_count = lines;
                source.byte_offset = consumed;
            }
        }

        Ok(source)
    }
}

impl LogSource for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_batch(&mut self) -> Result<Vec<SourceUnit>, MonitorError> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MonitorError::Source {
                    id: self.id.clone(),
                    reason: "log file no longer exists".to_owned(),
                });
            }
            Err(e) => {
                return Err(MonitorError::Source {
                    id: self.id.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let meta = file.metadata().await.map_err(|e| MonitorError::Source {
            id: self.id.clone(),
            reason: e.to_string(),
        })?;

        // 경로는 같아도 inode가 다르면 원래 소스는 사라진 것이므로
        // 묵은 오프셋으로 새 파일을 읽지 않음
        #[cfg(unix)]
        {
            let inode = std::os::unix::fs::MetadataExt::ino(&meta);
            if let Some(previous) = self.inode
                && inode != previous
            {
                return Err(MonitorError::Source {
                    id: self.id.clone(),
                    reason: "log file was replaced by a different file".to_owned(),
                });
            }
            self.inode = Some(inode);
        }

        // 파일이 줄어들었으면 잘림으로 보고 처음부터 다시 읽음
        if meta.len() < self.byte_offset {
            warn!(
                source = self.id.as_str(),
                previous_offset = self.byte_offset,
                current_len = meta.len(),
                "file truncated, resetting position to the beginning"
            );
            self.byte_offset = 0;
            self.line_count = 0;
        }
        if meta.len() == self.byte_offset {
            return Ok(Vec::new());
        }

        // 소비한 오프셋 이후의 꼬리만 읽음
        file.seek(SeekFrom::Start(self.byte_offset))
            .await
            .map_err(|e| MonitorError::Source {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        let mut tail = Vec::with_capacity((meta.len() - self.byte_offset) as usize);
        file.read_to_end(&mut tail)
            .await
            .map_err(|e| MonitorError::Source {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        let mut units = Vec::new();
        let mut consumed = 0usize;
        while let Some(rel) = tail[consumed..].iter().position(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(&tail[consumed..consumed + rel])
                .trim_end_matches('\r')
                .to_owned();
            consumed += rel + 1;
            self.line_count += 1;
            units.push(SourceUnit {
                text: line,
                position: SourcePosition::Line(self.line_count),
            });
        }
        // 개행으로 끝나지 않은 꼬리는 아직 쓰는 중이므로 소비하지 않음
        self.byte_offset += consumed as u64;

        Ok(units)
    }
}

/// 완결된 라인(개행으로 끝나는)을 앞에서부터 세고 소비한 바이트 수를
/// 반환합니다. `limit`이 주어지면 그 개수까지만 셉니다.
///
/// 파일 전체를 메모리에 올리지 않고 버퍼 단위로 읽습니다.
async fn scan_complete_lines(
    file: tokio::fs::File,
    limit: Option<u64>,
) -> std::io::Result<(u64, u64)> {
    if limit == Some(0) {
        return Ok((0, 0));
    }
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut lines = 0u64;
    let mut consumed = 0u64;
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 || buf.last() != Some(&b'\n') {
            // EOF, 또는 개행 없는 꼬리는 완결된 라인이 아님
            break;
        }
        lines += 1;
        consumed += n as u64;
        if limit.is_some_and(|target| lines >= target) {
            break;
        }
    }
    Ok((lines, consumed))
}

/// journald 유닛 소스
///
/// `journalctl`을 하위 프로세스로 실행하여 JSON 출력 레코드를 읽습니다.
/// 체크포인트는 journald의 불투명 레코드 커서입니다.
#[derive(Debug)]
pub struct JournalSource {
    id: String,
    unit: String,
    cursor: Option<String>,
}

impl JournalSource {
    /// journald 소스를 엽니다.
    ///
    /// `StartFrom::End`는 커서 없이 시작하며, 첫 읽기에서 현재 마지막
    /// 레코드의 커서를 기준선으로 잡습니다. 기준선 이전의 레코드는
    /// 전송하지 않습니다.
    pub fn open(id: impl Into<String>, start: StartFrom) -> Result<Self, MonitorError> {
        let id = id.into();
        let unit = id
            .strip_prefix(JOURNAL_PREFIX)
            .unwrap_or_default()
            .to_owned();
        if unit.is_empty() {
            return Err(MonitorError::Source {
                id,
                reason: "journal source requires a unit name after 'journal:'".to_owned(),
            });
        }

        let cursor = match start {
            StartFrom::End => None,
            StartFrom::Position(SourcePosition::Cursor(c)) => Some(c),
            StartFrom::Position(SourcePosition::Line(_)) => {
                // 라인 체크포인트가 남아 있으면 소스 종류가 바뀐 것
                warn!(
                    source = id.as_str(),
                    "line checkpoint for a journal source, starting from the current end"
                );
                None
            }
        };

        Ok(Self { id, unit, cursor })
    }

    /// journalctl을 실행하고 표준 출력 라인들을 반환합니다.
    async fn run_journalctl(&self, extra_args: &[&str]) -> Result<Vec<String>, MonitorError> {
        let mut cmd = Command::new("journalctl");
        cmd.arg("-u")
            .arg(&self.unit)
            .arg("-o")
            .arg("json")
            .arg("--quiet")
            .arg("--no-pager");
        for arg in extra_args {
            cmd.arg(arg);
        }

        let output = cmd.output().await.map_err(|e| MonitorError::Source {
            id: self.id.clone(),
            reason: format!("failed to run journalctl: {e}"),
        })?;
        if !output.status.success() {
            return Err(MonitorError::Source {
                id: self.id.clone(),
                reason: format!(
                    "journalctl exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_owned)
            .collect())
    }

    /// JSON 레코드 라인 하나를 파싱합니다. 파싱 불가 라인은 None.
    fn parse_record(&self, line: &str) -> Option<(String, String)> {
        let record: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    source = self.id.as_str(),
                    error = %e,
                    "skipping unparsable journalctl output line"
                );
                return None;
            }
        };
        let cursor = record.get("__CURSOR")?.as_str()?.to_owned();
        // MESSAGE는 바이너리 데이터일 때 문자열이 아닐 수 있음
        let message = record
            .get("MESSAGE")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_owned();
        Some((message, cursor))
    }
}

impl LogSource for JournalSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_batch(&mut self) -> Result<Vec<SourceUnit>, MonitorError> {
        match self.cursor.clone() {
            // 커서가 없으면 마지막 레코드로 기준선만 잡고 아무것도 내보내지 않음
            None => {
                let lines = self.run_journalctl(&["-n", "1"]).await?;
                if let Some((_, cursor)) = lines.iter().rev().find_map(|l| self.parse_record(l)) {
                    debug!(source = self.id.as_str(), "established journal baseline cursor");
                    self.cursor = Some(cursor);
                }
                Ok(Vec::new())
            }
            Some(cursor) => {
                let lines = self.run_journalctl(&["--after-cursor", &cursor]).await?;
                let mut units = Vec::new();
                for line in &lines {
                    if let Some((message, cursor)) = self.parse_record(line) {
                        self.cursor = Some(cursor.clone());
                        units.push(SourceUnit {
                            text: message,
                            position: SourcePosition::Cursor(cursor),
                        });
                    }
                }
                Ok(units)
            }
        }
    }
}

/// 소스 종류를 가리지 않는 구체 디스패치 타입
pub enum AnySource {
    /// 평문 파일
    File(FileSource),
    /// journald 유닛
    Journal(JournalSource),
}

impl LogSource for AnySource {
    fn id(&self) -> &str {
        match self {
            Self::File(s) => s.id(),
            Self::Journal(s) => s.id(),
        }
    }

    async fn read_batch(&mut self) -> Result<Vec<SourceUnit>, MonitorError> {
        match self {
            Self::File(s) => s.read_batch().await,
            Self::Journal(s) => s.read_batch().await,
        }
    }
}

/// 소스 식별자로부터 알맞은 소스를 엽니다.
///
/// `journal:` 접두사면 journald 소스, 아니면 파일 소스입니다.
pub async fn open_source(id: &str, start: StartFrom) -> Result<AnySource, MonitorError> {
    if id.starts_with(JOURNAL_PREFIX) {
        Ok(AnySource::Journal(JournalSource::open(id, start)?))
    } else {
        Ok(AnySource::File(FileSource::open(id, start).await?))
    }
}
