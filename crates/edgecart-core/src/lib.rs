//! Per-request storefront context for edge workers: cache, session, storefront client and
//! cart helpers, plus the handler surface hosts drive.

pub mod body;
pub mod cache;
pub mod cart;
pub mod commerce;
pub mod context;
pub mod env;
pub mod error;
pub mod fragments;
pub mod handler;
pub mod http;
pub mod i18n;
pub mod load_context;
pub mod manifest;
pub mod proxy;
pub mod response;
pub mod session;
pub mod storefront;
pub mod wait_until;

#[cfg(test)]
mod testing;

pub use load_context::{
    create_app_load_context, AppLoadContext, ContextError, ContextServices, ContextSettings,
};
