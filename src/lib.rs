// Per-chat moderation enforcement engine.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (database, classifiers, decoders)
//
// The messaging-platform client itself is an external collaborator: embedders
// implement `core::platform::ChatPlatform` over their transport and hand
// events to `core::enforcement::EnforcementEngine`. `infra::bootstrap` wires
// the rest.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;
