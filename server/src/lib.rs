//! Realtime collaboration core for the Huddle event-management app.
//!
//! Speaks JSON over WebSocket for live traffic (messages, typing, presence,
//! reactions, notifications) with a small REST surface for history and
//! notification management. Durable state lives in SQLite; everything
//! in-memory (sessions, rooms, presence, typing) is rebuilt as clients
//! reconnect.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod routes;
pub mod state;
pub mod ws;
