pub mod client;
pub mod config;
pub mod humanize;
pub mod observability;
pub mod ocr;
pub mod worker;
