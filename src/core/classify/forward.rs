// Forward-origin classification.

use crate::core::platform::ForwardOrigin;

/// What a forwarded message was forwarded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardClass {
    FromUser,
    FromChannel,
    FromBot,
    /// Linked-channel post mirrored by the platform; exempt from forward
    /// locks.
    Automatic,
}

pub fn classify_forward(origin: &ForwardOrigin) -> ForwardClass {
    match origin {
        ForwardOrigin::User(_) => ForwardClass::FromUser,
        ForwardOrigin::Channel(_) => ForwardClass::FromChannel,
        ForwardOrigin::Bot(_) => ForwardClass::FromBot,
        ForwardOrigin::AutomaticChannel => ForwardClass::Automatic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_map_to_their_class() {
        assert_eq!(classify_forward(&ForwardOrigin::User(5)), ForwardClass::FromUser);
        assert_eq!(classify_forward(&ForwardOrigin::Channel(-10)), ForwardClass::FromChannel);
        assert_eq!(classify_forward(&ForwardOrigin::Bot(9)), ForwardClass::FromBot);
        assert_eq!(
            classify_forward(&ForwardOrigin::AutomaticChannel),
            ForwardClass::Automatic
        );
    }
}
