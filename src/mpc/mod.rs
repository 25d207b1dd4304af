pub mod cosigner;
pub mod frost;
pub mod grant;
pub mod key_strategy;
pub mod scalar;
