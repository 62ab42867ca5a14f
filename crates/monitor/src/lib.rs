//! # logwarden-monitor
//!
//! 로그 소스 추적, 규칙 매칭, 알림 전송 파이프라인입니다.
//!
//! # 모듈 구성
//!
//! - [`source`]: 로그 소스 읽기 (평문 파일, journald 유닛)
//! - [`pattern`]: 정규식 규칙 컴파일 및 라인 평가
//! - [`notify`]: 알림 전송 (console, email, webhook, push)
//! - [`position`]: 소스별 체크포인트 위치의 JSON 영속화
//! - [`tailer`]: 소스 하나를 따라 읽는 폴링 루프
//! - [`supervisor`]: 테일러 수명주기 관리와 설정 리로드
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Sources -> SourceTailer -> PatternSet -> AlertDispatcher -> channels
//!    |            |                             |
//! File/journald   +-> PositionStore         console/email/webhook/push
//! ```

pub mod error;
pub mod notify;
pub mod pattern;
pub mod position;
pub mod source;
pub mod supervisor;
pub mod tailer;

// --- 주요 타입 re-export ---

// 수퍼바이저
pub use supervisor::{MonitorSupervisor, MonitorSupervisorBuilder, RuntimeSnapshot, SupervisorState};

// 테일러
pub use tailer::{SourceTailer, TailerState};

// 소스
pub use source::{AnySource, FileSource, JournalSource, LogSource, SourceUnit, StartFrom};

// 규칙 매칭
pub use pattern::PatternSet;

// 알림
pub use notify::{AlertDispatcher, DispatchReport};

// 체크포인트
pub use position::PositionStore;

// 에러
pub use error::MonitorError;
