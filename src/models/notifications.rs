use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    Welcome,
    PositionUpdate,
    FollowUp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub email: String,
    pub referral_code: String,
    /// Zero-based number of people ahead.
    pub people_ahead: u64,
    /// Ranks gained with one more referral. Follow-ups carry none.
    pub jump: Option<u64>,
}
