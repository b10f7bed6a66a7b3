// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::v5::RetainHandling;
use codec::{PacketId, QoS, SubTopic};

use crate::error::{Error, ErrorKind};

/// One active or in-flight subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    topic: String,
    qos: QoS,
    no_local: bool,
    retain_as_published: bool,
    retain_handling: RetainHandling,
    subscription_identifier: Option<usize>,

    /// Packet id of the SUBSCRIBE currently in flight, cleared once the
    /// SUBACK arrives.
    packet_id: Option<PacketId>,

    /// Set from SUBACK. An acknowledged subscription's `qos` holds the
    /// granted level, which never exceeds the requested one.
    acknowledged: bool,
}

impl Subscription {
    /// Create a new subscription record.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `topic` is not a valid filter.
    pub fn new(topic: &str, qos: QoS) -> Result<Self, Error> {
        SubTopic::new(topic).map_err(|_| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("invalid topic filter: {topic}"),
            )
        })?;
        Ok(Self {
            topic: topic.to_string(),
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::Send,
            subscription_identifier: None,
            packet_id: None,
            acknowledged: false,
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_no_local(&mut self, no_local: bool) -> &mut Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn set_retain_as_published(&mut self, retain_as_published: bool) -> &mut Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    pub fn set_retain_handling(&mut self, retain_handling: RetainHandling) -> &mut Self {
        self.retain_handling = retain_handling;
        self
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    pub fn set_subscription_identifier(&mut self, identifier: usize) -> &mut Self {
        self.subscription_identifier = Some(identifier);
        self
    }

    #[must_use]
    pub const fn subscription_identifier(&self) -> Option<usize> {
        self.subscription_identifier
    }

    pub(crate) fn set_packet_id(&mut self, packet_id: Option<PacketId>) {
        self.packet_id = packet_id;
    }

    #[must_use]
    pub const fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    pub(crate) fn set_acknowledged(&mut self, acknowledged: bool) {
        self.acknowledged = acknowledged;
    }

    #[must_use]
    pub const fn acknowledged(&self) -> bool {
        self.acknowledged
    }
}

/// Ordered collection of the client's subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, replacing any previous record with the
    /// same filter.
    pub fn add(&mut self, subscription: Subscription) {
        self.remove_topic(subscription.topic());
        self.subscriptions.push(subscription);
    }

    /// Subscriptions whose SUBSCRIBE carries `packet_id`, in insertion
    /// order. Several filters share one id when subscribed as a batch.
    pub fn by_packet_id_mut(
        &mut self,
        packet_id: PacketId,
    ) -> impl Iterator<Item = &mut Subscription> {
        self.subscriptions
            .iter_mut()
            .filter(move |s| s.packet_id() == Some(packet_id))
    }

    /// Look up a subscription by its subscription identifier.
    #[must_use]
    pub fn by_subscription_identifier(&self, identifier: usize) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.subscription_identifier() == Some(identifier))
    }

    /// Look up a subscription by its topic filter.
    #[must_use]
    pub fn by_topic(&self, topic: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.topic() == topic)
    }

    /// Drop the record for `topic`, e.g. on unsubscribe.
    pub fn remove_topic(&mut self, topic: &str) {
        self.subscriptions.retain(|s| s.topic() != topic);
    }

    /// Forget the in-flight packet id once its SUBACK was handled.
    pub fn clear_packet_id(&mut self, packet_id: PacketId) {
        for subscription in &mut self.subscriptions {
            if subscription.packet_id() == Some(packet_id) {
                subscription.set_packet_id(None);
            }
        }
    }

    #[must_use]
    pub fn all(&self) -> &[Subscription] {
        &self.subscriptions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter() {
        let err = Subscription::new("a/#/b", QoS::AtMostOnce).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConfigError);
    }

    #[test]
    fn test_add_replaces_same_topic() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Subscription::new("a/b", QoS::AtMostOnce).unwrap());
        registry.add(Subscription::new("a/b", QoS::ExactOnce).unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.by_topic("a/b").unwrap().qos(), QoS::ExactOnce);
    }

    #[test]
    fn test_by_packet_id() {
        let mut registry = SubscriptionRegistry::new();
        let mut first = Subscription::new("a/b", QoS::AtLeastOnce).unwrap();
        first.set_packet_id(Some(PacketId::new(7)));
        let mut second = Subscription::new("c/d", QoS::ExactOnce).unwrap();
        second.set_packet_id(Some(PacketId::new(7)));
        registry.add(first);
        registry.add(second);

        let topics: Vec<String> = registry
            .by_packet_id_mut(PacketId::new(7))
            .map(|s| s.topic().to_string())
            .collect();
        assert_eq!(topics, ["a/b", "c/d"]);

        registry.clear_packet_id(PacketId::new(7));
        assert_eq!(registry.by_packet_id_mut(PacketId::new(7)).count(), 0);
    }

    #[test]
    fn test_by_subscription_identifier() {
        let mut registry = SubscriptionRegistry::new();
        let mut subscription = Subscription::new("a/d", QoS::ExactOnce).unwrap();
        subscription.set_subscription_identifier(21);
        registry.add(subscription);
        assert!(registry.by_subscription_identifier(21).is_some());
        assert!(registry.by_subscription_identifier(42).is_none());
    }
}
