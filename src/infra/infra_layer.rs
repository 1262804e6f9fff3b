// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "stores/sqlite_store.rs"]
pub mod stores;

#[path = "classify/http_classifiers.rs"]
pub mod classify;

#[path = "media/frame_decoders.rs"]
pub mod media;

pub mod bootstrap;
