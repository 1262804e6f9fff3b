// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "platform/chat_platform.rs"]
pub mod platform;

#[path = "classify/mod.rs"]
pub mod classify;

#[path = "enforcement/mod.rs"]
pub mod enforcement;

#[path = "promote/promotion_service.rs"]
pub mod promote;
