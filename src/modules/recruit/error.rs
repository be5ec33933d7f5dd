use thiserror::Error;

/// Everything that can go wrong while acting on a recruitment session.
///
/// Apart from `DeliveryDegraded` these are rule violations by the acting user;
/// they're reported back to that user only and never affect other sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecruitError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("capacity {requested} outside of {min}..={max}")]
    InvalidCapacity { requested: u8, min: u8, max: u8 },
    #[error("session not found")]
    NotFound,
    #[error("the host can't join their own session")]
    AlreadyHost,
    #[error("participant already joined")]
    AlreadyJoined,
    #[error("session is full")]
    Full,
    #[error("the host can't leave, only cancel")]
    IsHost,
    #[error("participant hasn't joined")]
    NotJoined,
    #[error("only the host can cancel")]
    NotHost,
    #[error("{failed} of {attempted} direct messages failed")]
    DeliveryDegraded { failed: usize, attempted: usize },
}

impl RecruitError {
    /// Short explanation shown privately to whoever triggered the error
    pub(crate) fn user_message(&self) -> String {
        match self {
            Self::InvalidSchedule(reason) => format!("⏰ 모집 시간이 올바르지 않습니다: {}", reason),
            Self::InvalidCapacity { min, max, .. } => {
                format!("👥 모집 인원은 {}명에서 {}명 사이로 정해주세요.", min, max)
            }
            Self::NotFound => "이미 끝났거나 없는 모집입니다.".into(),
            Self::AlreadyHost => "니는 모집자잖아! 모집자는 이미 참가 중입니다.".into(),
            Self::AlreadyJoined => "이미 참가했습니다.".into(),
            Self::Full => "꽉 찼다! 늦었습니다.".into(),
            Self::IsHost => "모집자는 도망갈 수 없습니다. 대신 모집을 취소하세요.".into(),
            Self::NotJoined => "참가하고 눌러주세요.".into(),
            Self::NotHost => "니가 만든 모집이 아닙니다. 모집자만 취소할 수 있습니다.".into(),
            Self::DeliveryDegraded { failed, attempted } => format!(
                "📭 참가자 {}명 중 {}명에게 DM을 보내지 못했습니다. DM 수신 설정을 확인해주세요.",
                attempted, failed
            ),
        }
    }
}
