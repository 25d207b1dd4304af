pub mod canonical;
pub mod encoding;
