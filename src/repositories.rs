pub mod entries;
pub mod mail;
