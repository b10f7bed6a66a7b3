// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Inbound packet dispatch and the QoS 0/1/2 state machines.

use codec::v5::{self, ReasonCode};
use codec::{v3, ByteArray, DecodeError, DecodePacket, FixedHeader, PacketId, PacketType,
    ProtocolLevel, QoS};

use super::{encode_packet, Client, ClientHandler, ConnackInfo};
use crate::error::{Error, ErrorKind};
use crate::message::Message;
use crate::status::ClientStatus;

impl<H: ClientHandler> Client<H> {
    /// Split complete packets off the accumulation buffer and dispatch
    /// them. Trailing partial data stays in the buffer for the next
    /// read.
    pub(super) async fn process_buffer(&mut self) -> Result<(), Error> {
        loop {
            let Some(total) = packet_length(&self.read_buf)? else {
                return Ok(());
            };
            if self.read_buf.len() < total {
                return Ok(());
            }
            let packet: Vec<u8> = self.read_buf.drain(..total).collect();
            self.handle_packet(&packet).await?;
        }
    }

    async fn handle_packet(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.keep_alive.mark_in();

        let mut ba = ByteArray::new(buf);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        if !fixed_header.is_valid_header(self.protocol_level) {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "packet type not valid for this protocol version",
            ));
        }
        log::debug!("recv packet: {:?}", fixed_header.packet_type());

        match fixed_header.packet_type() {
            PacketType::ConnectAck => self.handle_connack(buf),
            PacketType::Publish { .. } => self.handle_publish(buf).await,
            PacketType::PublishAck => self.handle_puback(buf),
            PacketType::PublishReceived => self.handle_pubrec(buf).await,
            PacketType::PublishRelease => self.handle_pubrel(buf).await,
            PacketType::PublishComplete => self.handle_pubcomp(buf),
            PacketType::SubscribeAck => self.handle_suback(buf),
            PacketType::UnsubscribeAck => self.handle_unsuback(buf),
            PacketType::PingResponse => {
                log::debug!("recv ping response");
                Ok(())
            }
            PacketType::Disconnect => self.handle_disconnect(buf).await,
            t => {
                log::warn!("unhandled packet: {t:?}");
                Ok(())
            }
        }
    }

    fn handle_connack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let info = match self.protocol_level {
            ProtocolLevel::V5 => {
                // An old broker may answer a 5.0 CONNECT with a bare
                // 3.1.1 return code; read the raw code ahead of strict
                // decoding so refusals (and the version downgrade on
                // code 1) are reported from any CONNACK shape.
                let raw_code = raw_connack_code(buf)?;
                let valid_v5_code = ReasonCode::try_from(raw_code)
                    .map(|code| v5::CONNECT_REASONS.contains(&code))
                    .unwrap_or(false);
                if raw_code != 0 && !valid_v5_code {
                    log::warn!("connack refused: {raw_code:#x}");
                    return Err(Error::connect_error(raw_code));
                }
                let mut ba = ByteArray::new(buf);
                let packet = v5::ConnectAckPacket::decode(&mut ba)?;
                ConnackInfo::from_v5(&packet)
            }
            _ => {
                let mut ba = ByteArray::new(buf);
                let packet = v3::ConnectAckPacket::decode(&mut ba)?;
                ConnackInfo::from_v3(&packet)
            }
        };

        if info.reason_code != 0 {
            log::warn!("connack refused: {:#x}", info.reason_code);
            return Err(Error::connect_error(info.reason_code));
        }

        self.failed_connections = 0;
        // The server may select its own keepalive value
        // [MQTT-3.2.2-21]; the run loop rearms its timer from this.
        if let Some(keep_alive) = info.server_keep_alive {
            log::info!("connack: server keep alive {keep_alive}");
            self.keep_alive.set_keep_alive(keep_alive);
        }
        self.status = ClientStatus::Connected;
        self.connack = Some(info.clone());
        if let Some(mut handler) = self.handler.take() {
            handler.on_connect(self, &info);
            self.handler = Some(handler);
        }
        Ok(())
    }

    /// Run the message callback with the client handed back to it.
    fn invoke_on_message(&mut self, message: &Message) -> ReasonCode {
        match self.handler.take() {
            Some(mut handler) => {
                let reason = handler.on_message(self, message);
                self.handler = Some(handler);
                reason
            }
            None => ReasonCode::Success,
        }
    }

    async fn handle_publish(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        match self.protocol_level {
            ProtocolLevel::V5 => {
                let packet = v5::PublishPacket::decode(&mut ba)?;
                let mut topic = packet.topic().to_string();

                // A PUBLISH may establish or use a topic alias. An
                // empty topic with no known alias is a protocol error.
                if let Some(alias) = packet.properties().topic_alias() {
                    if topic.is_empty() {
                        match self.topic_aliases.resolve(alias) {
                            Some(resolved) => topic = resolved.to_string(),
                            None => {
                                return Err(Error::from_string(
                                    ErrorKind::ProtocolError,
                                    format!("unknown topic alias: {alias}"),
                                ));
                            }
                        }
                    } else {
                        self.topic_aliases.set(alias, &topic);
                    }
                }
                if topic.is_empty() {
                    return Err(Error::new(
                        ErrorKind::ProtocolError,
                        "publish without topic name or alias",
                    ));
                }

                log::debug!("recv publish on {topic:?}, qos {:?}", packet.qos());
                let message = Message::from_publish(
                    &topic,
                    packet.message(),
                    packet.qos(),
                    packet.retain(),
                    packet.dup(),
                    packet.properties(),
                );
                self.dispatch_inbound(&message, packet.packet_id()).await
            }
            _ => {
                let packet = v3::PublishPacket::decode(&mut ba)?;
                log::debug!("recv publish on {:?}, qos {:?}", packet.topic(), packet.qos());
                let message = Message::from_v3_publish(
                    packet.topic(),
                    packet.message(),
                    packet.qos(),
                    packet.retain(),
                    packet.dup(),
                );
                self.dispatch_inbound(&message, packet.packet_id()).await
            }
        }
    }

    /// Run the receiver side of the QoS state machine and invoke the
    /// message callback.
    async fn dispatch_inbound(
        &mut self,
        message: &Message,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        // 3.1.1 acknowledgements carry no reason code, so there is
        // nothing to wait for from the callback.
        let optimistic = self.connect_options().optimistic_acknowledgement()
            || self.protocol_level != ProtocolLevel::V5;

        match message.qos() {
            QoS::AtMostOnce => {
                self.invoke_on_message(message);
                Ok(())
            }
            QoS::AtLeastOnce => {
                if optimistic {
                    self.send_puback(packet_id, ReasonCode::Success).await?;
                    self.invoke_on_message(message);
                } else {
                    let reason = self.invoke_on_message(message);
                    if !v5::PUBLISH_ACK_REASONS.contains(&reason) {
                        return Err(Error::from_string(
                            ErrorKind::ProtocolError,
                            format!("invalid PUBACK reason code from callback: {reason:?}"),
                        ));
                    }
                    self.send_puback(packet_id, reason).await?;
                }
                self.id_pool.free_id(packet_id);
                Ok(())
            }
            QoS::ExactOnce => {
                if optimistic {
                    self.send_pubrec(packet_id, ReasonCode::Success).await?;
                    self.invoke_on_message(message);
                } else {
                    let reason = self.invoke_on_message(message);
                    if !v5::PUBLISH_RECEIVED_REASONS.contains(&reason) {
                        return Err(Error::from_string(
                            ErrorKind::ProtocolError,
                            format!("invalid PUBREC reason code from callback: {reason:?}"),
                        ));
                    }
                    self.send_pubrec(packet_id, reason).await?;
                }
                // The id is released when PUBREL arrives.
                Ok(())
            }
        }
    }

    fn handle_puback(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet_id = match self.protocol_level {
            ProtocolLevel::V5 => {
                let packet = v5::PublishAckPacket::decode(&mut ba)?;
                if packet.reason_code().is_error() {
                    log::warn!(
                        "puback {} with reason {:?}",
                        packet.packet_id(),
                        packet.reason_code()
                    );
                }
                packet.packet_id()
            }
            _ => v3::PublishAckPacket::decode(&mut ba)?.packet_id(),
        };

        log::info!("recv puback for {packet_id}");
        self.id_pool.free_id(packet_id);
        self.pending.remove(packet_id);
        Ok(())
    }

    async fn handle_pubrec(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let (packet_id, failed) = match self.protocol_level {
            ProtocolLevel::V5 => {
                let packet = v5::PublishReceivedPacket::decode(&mut ba)?;
                (packet.packet_id(), packet.reason_code().is_error())
            }
            _ => (v3::PublishReceivedPacket::decode(&mut ba)?.packet_id(), false),
        };

        log::info!("recv pubrec for {packet_id}");
        self.id_pool.free_id(packet_id);
        self.pending.remove(packet_id);

        // A failure code ends the exchange; no PUBREL follows.
        if failed {
            log::warn!("pubrec {packet_id} reported failure");
            return Ok(());
        }

        self.send_pubrel(packet_id).await?;
        self.releasing.insert(packet_id.value());
        Ok(())
    }

    /// Receiver side of QoS 2: the broker releases the message.
    async fn handle_pubrel(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet_id = match self.protocol_level {
            ProtocolLevel::V5 => v5::PublishReleasePacket::decode(&mut ba)?.packet_id(),
            _ => v3::PublishReleasePacket::decode(&mut ba)?.packet_id(),
        };

        log::info!("recv pubrel for {packet_id}");
        self.send_pubcomp(packet_id).await?;
        self.id_pool.free_id(packet_id);
        Ok(())
    }

    fn handle_pubcomp(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet_id = match self.protocol_level {
            ProtocolLevel::V5 => v5::PublishCompletePacket::decode(&mut ba)?.packet_id(),
            _ => v3::PublishCompletePacket::decode(&mut ba)?.packet_id(),
        };

        log::info!("recv pubcomp for {packet_id}");
        self.releasing.remove(&packet_id.value());
        Ok(())
    }

    fn handle_suback(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let (packet_id, reasons, properties) = match self.protocol_level {
            ProtocolLevel::V5 => {
                let packet = v5::SubscribeAckPacket::decode(&mut ba)?;
                (
                    packet.packet_id(),
                    packet.reasons().to_vec(),
                    packet.properties().clone(),
                )
            }
            _ => {
                let packet = v3::SubscribeAckPacket::decode(&mut ba)?;
                let reasons = packet
                    .acks()
                    .iter()
                    .map(|ack| match ack {
                        v3::SubscribeAck::QoS(QoS::AtMostOnce) => ReasonCode::Success,
                        v3::SubscribeAck::QoS(QoS::AtLeastOnce) => ReasonCode::GrantedQoS1,
                        v3::SubscribeAck::QoS(QoS::ExactOnce) => ReasonCode::GrantedQoS2,
                        v3::SubscribeAck::Failed => ReasonCode::UnspecifiedError,
                    })
                    .collect();
                (packet.packet_id(), reasons, v5::Properties::new())
            }
        };

        log::info!("recv suback for {packet_id}: {reasons:?}");

        // Several filters share one packet id when subscribed as a
        // batch; the reason codes line up with them in order.
        let mut matched = self.subscriptions.by_packet_id_mut(packet_id);
        for reason in &reasons {
            let Some(subscription) = matched.next() else {
                break;
            };
            match granted_qos(*reason) {
                Some(qos) => {
                    subscription.set_acknowledged(true);
                    subscription.set_qos(qos);
                }
                None => subscription.set_acknowledged(false),
            }
        }
        drop(matched);

        if let Some(mut handler) = self.handler.take() {
            handler.on_subscribe(self, packet_id, &reasons, &properties);
            self.handler = Some(handler);
        }
        self.subscriptions.clear_packet_id(packet_id);
        self.id_pool.free_id(packet_id);
        Ok(())
    }

    fn handle_unsuback(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let (packet_id, reasons) = match self.protocol_level {
            ProtocolLevel::V5 => {
                let packet = v5::UnsubscribeAckPacket::decode(&mut ba)?;
                (packet.packet_id(), packet.reasons().to_vec())
            }
            _ => (v3::UnsubscribeAckPacket::decode(&mut ba)?.packet_id(), Vec::new()),
        };

        log::info!("recv unsuback for {packet_id}: {reasons:?}");

        if let Some(topics) = self.unsubscribing.remove(&packet_id.value()) {
            for topic in topics {
                self.subscriptions.remove_topic(&topic);
            }
        }

        if let Some(mut handler) = self.handler.take() {
            handler.on_unsubscribe(self, packet_id, &reasons);
            self.handler = Some(handler);
        }
        self.id_pool.free_id(packet_id);
        Ok(())
    }

    /// The broker is closing the session.
    async fn handle_disconnect(&mut self, buf: &[u8]) -> Result<(), Error> {
        let reason = if self.protocol_level == ProtocolLevel::V5 {
            let mut ba = ByteArray::new(buf);
            let packet = v5::DisconnectPacket::decode(&mut ba)?;
            Some(packet.reason_code())
        } else {
            None
        };
        log::warn!("recv disconnect from broker: {reason:?}");

        self.stream.close().await;
        self.topic_aliases.clear();
        if let Some(mut handler) = self.handler.take() {
            handler.on_disconnect(reason, None);
            self.handler = Some(handler);
        }
        self.status = if self.is_active {
            ClientStatus::Reconnecting
        } else {
            ClientStatus::Disconnected
        };
        Ok(())
    }

    // ---- acknowledgement send paths ----

    async fn send_puback(&mut self, packet_id: PacketId, reason: ReasonCode) -> Result<(), Error> {
        let buf = match self.protocol_level {
            ProtocolLevel::V5 => {
                let mut packet = v5::PublishAckPacket::new(packet_id);
                packet.set_reason_code(reason)?;
                encode_packet(&packet)?
            }
            _ => encode_packet(&v3::PublishAckPacket::new(packet_id))?,
        };
        self.send_raw(&buf).await
    }

    async fn send_pubrec(&mut self, packet_id: PacketId, reason: ReasonCode) -> Result<(), Error> {
        let buf = match self.protocol_level {
            ProtocolLevel::V5 => {
                let mut packet = v5::PublishReceivedPacket::new(packet_id);
                packet.set_reason_code(reason)?;
                encode_packet(&packet)?
            }
            _ => encode_packet(&v3::PublishReceivedPacket::new(packet_id))?,
        };
        self.send_raw(&buf).await
    }

    pub(super) async fn send_pubrel(&mut self, packet_id: PacketId) -> Result<(), Error> {
        let buf = match self.protocol_level {
            ProtocolLevel::V5 => encode_packet(&v5::PublishReleasePacket::new(packet_id))?,
            _ => encode_packet(&v3::PublishReleasePacket::new(packet_id))?,
        };
        self.send_raw(&buf).await
    }

    async fn send_pubcomp(&mut self, packet_id: PacketId) -> Result<(), Error> {
        let buf = match self.protocol_level {
            ProtocolLevel::V5 => encode_packet(&v5::PublishCompletePacket::new(packet_id))?,
            _ => encode_packet(&v3::PublishCompletePacket::new(packet_id))?,
        };
        self.send_raw(&buf).await
    }
}

/// Raw reason byte of a CONNACK packet, before any version-specific
/// validation.
fn raw_connack_code(buf: &[u8]) -> Result<u8, Error> {
    let mut ba = ByteArray::new(buf);
    let fixed_header = FixedHeader::decode(&mut ba)?;
    if fixed_header.remaining_length() < 2 {
        return Err(Error::from(DecodeError::InvalidRemainingLength));
    }
    let _ack_flags = ba.read_byte().map_err(DecodeError::from)?;
    let code = ba.read_byte().map_err(DecodeError::from)?;
    Ok(code)
}

/// Total byte length of the first packet in `buf`, or `None` when more
/// data is needed.
fn packet_length(buf: &[u8]) -> Result<Option<usize>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut ba = ByteArray::new(buf);
    match FixedHeader::decode(&mut ba) {
        Ok(fixed_header) => Ok(Some(fixed_header.bytes() + fixed_header.remaining_length())),
        // An incomplete header is not an error; wait for more bytes.
        Err(DecodeError::OutOfRange) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Granted QoS level of a SUBACK reason code, `None` for failures.
const fn granted_qos(reason: ReasonCode) -> Option<QoS> {
    match reason {
        ReasonCode::Success => Some(QoS::AtMostOnce),
        ReasonCode::GrantedQoS1 => Some(QoS::AtLeastOnce),
        ReasonCode::GrantedQoS2 => Some(QoS::ExactOnce),
        _ => None,
    }
}
