//! Authentication core for the rides SDK: flow routing, credential storage, and the
//! companion-app single sign-on checks shared by every front-end.

pub mod auth;
pub mod config;
pub mod context;
pub mod host;

pub use context::SdkContext;
pub use host::{DesktopHost, HostEnvironment, StaticHost};
