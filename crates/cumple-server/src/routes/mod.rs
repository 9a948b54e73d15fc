pub mod health;
pub mod qr;
pub mod run;
pub mod warmup;
