pub mod entries;
pub mod notifications;
