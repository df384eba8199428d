//! HTTP handler layer (C11): one module per endpoint group, mirroring the
//! teacher's `handlers::{traces,query,services,...}` split.

pub mod config;
pub mod dashboard;
pub mod export;
pub mod geofences;
pub mod health;
pub mod logs;
pub mod service;
pub mod status;
pub mod stream;
pub mod sync;
pub mod token;
pub mod webhooks;
pub mod widgets;
