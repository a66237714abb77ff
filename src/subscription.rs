//! Subscription-to-transport binding.

use crate::transport::DeliveryPattern;

/// The pipe/funnel/pattern a subscription string resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionBinding {
    pub pattern: DeliveryPattern,
    pub pipe: String,
    pub funnel: String,
}

/// Compute the transport binding for one subscription string.
/// `fanout_funnel` is `<client-name>-<agent-version>-<start-epoch>`,
/// computed once per process (see [`crate::agent::fanout_funnel_name`]).
pub fn bind(subscription: &str, fanout_funnel: &str) -> SubscriptionBinding {
    if subscription.starts_with("direct:") || subscription.starts_with("roundrobin:") {
        SubscriptionBinding {
            pattern: DeliveryPattern::Direct,
            pipe: subscription.to_string(),
            funnel: subscription.to_string(),
        }
    } else {
        SubscriptionBinding {
            pattern: DeliveryPattern::Fanout,
            pipe: subscription.to_string(),
            funnel: fanout_funnel.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_prefix_binds_to_itself() {
        let b = bind("direct:web", "unused");
        assert_eq!(b.pattern, DeliveryPattern::Direct);
        assert_eq!(b.pipe, "direct:web");
        assert_eq!(b.funnel, "direct:web");
    }

    #[test]
    fn roundrobin_prefix_binds_like_direct() {
        let b = bind("roundrobin:web", "unused");
        assert_eq!(b.pattern, DeliveryPattern::Direct);
        assert_eq!(b.pipe, "roundrobin:web");
        assert_eq!(b.funnel, "roundrobin:web");
    }

    #[test]
    fn bare_subscription_binds_to_fanout() {
        let b = bind("web", "h1-1.0.0-1700000000");
        assert_eq!(b.pattern, DeliveryPattern::Fanout);
        assert_eq!(b.pipe, "web");
        assert_eq!(b.funnel, "h1-1.0.0-1700000000");
    }
}
