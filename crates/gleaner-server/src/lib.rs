//! REST API server: routes, authentication, DTOs and SSE streaming.

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;
