pub mod build_queue;
pub mod certificate;
pub mod health;
pub mod redis;
pub mod subscription;
