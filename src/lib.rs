//! Huddle Server - call orchestration for the Huddle messenger
//!
//! The server owns call and participant state, resolves concurrent
//! lifecycle requests into one consistent call outcome, issues media join
//! credentials, and mirrors call outcomes into conversation history.

pub mod chatlog;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod media;
pub mod models;
pub mod notify;
pub mod storage;

use std::sync::Arc;

use crate::config::Config;
use crate::controller::CallController;
use crate::media::MediaProvider;
use crate::notify::WebSocketManager;
use crate::storage::Storage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub ws_manager: Arc<WebSocketManager>,
    pub media: Arc<dyn MediaProvider>,
    pub controller: Arc<CallController>,
}
