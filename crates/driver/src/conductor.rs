// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The driver conductor: single-threaded control plane.
//!
//! The conductor owns every registry and is the only mutator. One
//! [`Conductor::do_work`] tick drains a bounded slice of the client
//! command ring, services internal commands from the data-plane agents,
//! and runs timer maintenance when the interval has elapsed. Nothing in a
//! tick blocks; a bad command is converted into an error event and the
//! tick continues.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::broadcast::Broadcast;
use crate::client::ClientRegistry;
use crate::clock::{Clock, DeadlineTimer};
use crate::command::{correlation_hint, ClientCommand};
use crate::counters::{CounterInfo, CountersManager, SystemCounters};
use crate::endpoint::{ReceiveEndpoints, SendEndpoints};
use crate::error::DriverError;
use crate::event::SubscriberPosition;
use crate::image::{ImageState, ImageTransition, PublicationImage};
use crate::proxy::{
    ClientProxy, ConductorCmd, MailboxRx, MailboxTx, ReceiverCmd, ReceiverProxy, SenderCmd,
    SenderProxy,
};
use crate::publication::{
    replay_position, IpcPublication, NetworkPublication, PubState, PubTransition,
};
use crate::raw_log::LogFactory;
use crate::registry::{Registry, Token};
use crate::ring::CommandRing;
use crate::subscription::{Subscription, SubscriptionLink};
use crate::uri::ChannelUri;

/// Construction-time driver parameters.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub client_liveness_timeout_ns: u64,
    pub publication_linger_ns: u64,
    pub publication_connection_timeout_ns: u64,
    pub image_liveness_timeout_ns: u64,
    pub timer_interval_ns: u64,
    pub default_term_length: u32,
    pub default_mtu: u32,
    pub command_drain_limit: usize,
    /// Fixed seed for session-id assignment; `None` seeds from the OS.
    pub session_id_seed: Option<u64>,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            client_liveness_timeout_ns: 10_000_000_000,
            publication_linger_ns: 5_000_000_000,
            publication_connection_timeout_ns: 5_000_000_000,
            image_liveness_timeout_ns: 10_000_000_000,
            timer_interval_ns: 1_000_000_000,
            default_term_length: 16 * 1024 * 1024,
            default_mtu: 1408,
            command_drain_limit: 10,
            session_id_seed: None,
        }
    }
}

/// The conductor's ends of the shared buffers and mailboxes.
pub struct ConductorChannels {
    pub command_ring: Arc<CommandRing>,
    pub broadcast: Broadcast,
    pub sender: MailboxTx<SenderCmd>,
    pub receiver: MailboxTx<ReceiverCmd>,
    pub inbound: MailboxRx<ConductorCmd>,
}

/// What a registration id resolves to.
#[derive(Debug, Clone, Copy)]
enum RegTarget {
    NetworkPublication(Token),
    IpcPublication(Token),
    Subscription(Token),
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    client_id: i64,
    target: RegTarget,
}

pub struct Conductor {
    ctx: DriverContext,
    clock: Arc<dyn Clock>,
    log_factory: Box<dyn LogFactory>,
    counters: Arc<CountersManager>,
    system: SystemCounters,

    command_ring: Arc<CommandRing>,
    client_proxy: ClientProxy,
    sender: SenderProxy,
    receiver: ReceiverProxy,
    inbound: MailboxRx<ConductorCmd>,
    timer: DeadlineTimer,

    clients: ClientRegistry,
    network_pubs: Registry<NetworkPublication>,
    ipc_pubs: Registry<IpcPublication>,
    subscriptions: Registry<Subscription>,
    images: Registry<PublicationImage>,
    send_endpoints: SendEndpoints,
    receive_endpoints: ReceiveEndpoints,

    /// Shared network publications by (endpoint key, stream); entries only
    /// while ACTIVE, so a fresh add after release creates a new one.
    shared_network_index: HashMap<(String, i32), Token>,
    shared_ipc_index: HashMap<i32, Token>,
    network_pub_index: HashMap<i64, Token>,
    ipc_pub_index: HashMap<i64, Token>,
    image_index: HashMap<i64, Token>,
    recv_endpoint_by_id: HashMap<i64, Token>,
    registrations: HashMap<i64, Registration>,

    next_driver_id: i64,
    rng: StdRng,
    error_hook: Box<dyn FnMut(&DriverError) + Send>,
}

impl Conductor {
    pub fn new(
        ctx: DriverContext,
        clock: Arc<dyn Clock>,
        log_factory: Box<dyn LogFactory>,
        counters: Arc<CountersManager>,
        channels: ConductorChannels,
    ) -> Self {
        let system = SystemCounters::new(&counters);
        let rng = match ctx.session_id_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let now_ns = clock.now_ns();
        Self {
            timer: DeadlineTimer::new(ctx.timer_interval_ns, now_ns),
            ctx,
            clock,
            log_factory,
            client_proxy: ClientProxy::new(channels.broadcast, system.errors.clone()),
            sender: SenderProxy::new(channels.sender, system.errors.clone()),
            receiver: ReceiverProxy::new(channels.receiver, system.errors.clone()),
            inbound: channels.inbound,
            command_ring: channels.command_ring,
            counters,
            system,
            clients: ClientRegistry::new(),
            network_pubs: Registry::new(),
            ipc_pubs: Registry::new(),
            subscriptions: Registry::new(),
            images: Registry::new(),
            send_endpoints: SendEndpoints::new(),
            receive_endpoints: ReceiveEndpoints::new(),
            shared_network_index: HashMap::new(),
            shared_ipc_index: HashMap::new(),
            network_pub_index: HashMap::new(),
            ipc_pub_index: HashMap::new(),
            image_index: HashMap::new(),
            recv_endpoint_by_id: HashMap::new(),
            registrations: HashMap::new(),
            next_driver_id: 1,
            rng,
            error_hook: Box::new(|error| error!(%error, "driver error")),
        }
    }

    /// Replace the error handler; the default logs at error level.
    pub fn set_error_hook(&mut self, hook: Box<dyn FnMut(&DriverError) + Send>) {
        self.error_hook = hook;
    }

    /// One conductor tick. Returns the amount of work done so the idle
    /// strategy can back off when the driver is quiet.
    pub fn do_work(&mut self) -> usize {
        let mut work = 0;

        for frame in self.command_ring.drain(self.ctx.command_drain_limit) {
            work += 1;
            self.on_command_frame(frame);
        }

        for cmd in self.inbound.drain(self.ctx.command_drain_limit) {
            work += 1;
            self.on_conductor_cmd(cmd);
        }

        let now_ns = self.clock.now_ns();
        if self.timer.poll(now_ns) {
            work += self.on_timer(now_ns);
        }
        work
    }

    fn on_command_frame(&mut self, frame: Bytes) {
        let hint = correlation_hint(&frame);
        match ClientCommand::decode(frame) {
            Ok(command) => {
                self.clients.on_activity(command.client_id(), self.clock.now_ns());
                self.dispatch(command);
            }
            Err(error) => self.record_error(hint, error),
        }
    }

    fn dispatch(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::AddPublication {
                client_id,
                correlation_id,
                stream_id,
                channel,
                exclusive,
            } => self.on_add_publication(client_id, correlation_id, stream_id, &channel, exclusive),
            ClientCommand::RemovePublication { correlation_id, registration_id, .. } => {
                match self.do_remove_publication(registration_id) {
                    Ok(()) => self.client_proxy.on_operation_success(correlation_id),
                    Err(error) => self.record_error(correlation_id, error),
                }
            }
            ClientCommand::AddSubscription {
                client_id,
                correlation_id,
                stream_id,
                channel,
                ..
            } => self.on_add_subscription(client_id, correlation_id, stream_id, &channel),
            ClientCommand::RemoveSubscription { correlation_id, registration_id, .. } => {
                match self.do_remove_subscription(registration_id) {
                    Ok(()) => self.client_proxy.on_operation_success(correlation_id),
                    Err(error) => self.record_error(correlation_id, error),
                }
            }
            ClientCommand::ClientKeepalive { .. } => {
                // Activity was already stamped on receipt; no reply.
            }
            ClientCommand::AddDestination { correlation_id, registration_id, channel, .. } => {
                self.on_destination(true, correlation_id, registration_id, &channel);
            }
            ClientCommand::RemoveDestination { correlation_id, registration_id, channel, .. } => {
                self.on_destination(false, correlation_id, registration_id, &channel);
            }
        }
    }

    // ---- publications ----

    fn on_add_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel_uri: &str,
        exclusive: bool,
    ) {
        let result = self.do_add_publication(client_id, correlation_id, stream_id, channel_uri, exclusive);
        if let Err(error) = result {
            self.record_error(correlation_id, error);
        }
    }

    fn do_add_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel_uri: &str,
        exclusive: bool,
    ) -> Result<(), DriverError> {
        let channel = ChannelUri::parse(channel_uri)?;
        if channel.spy {
            return Err(DriverError::invalid_channel("cannot publish on a spy channel"));
        }
        if channel.has_replay_params() && !exclusive {
            return Err(DriverError::generic("replay params require an exclusive publication"));
        }
        if channel.session_id.is_some() && !exclusive {
            return Err(DriverError::generic("session-id is exclusive-only"));
        }

        if channel.is_ipc() {
            self.add_ipc_publication(client_id, correlation_id, stream_id, channel, exclusive)
        } else {
            self.add_network_publication(
                client_id,
                correlation_id,
                stream_id,
                channel,
                channel_uri,
                exclusive,
            )
        }
    }

    fn add_network_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: ChannelUri,
        channel_uri: &str,
        exclusive: bool,
    ) -> Result<(), DriverError> {
        let key = (channel.endpoint_key(), stream_id);

        if !exclusive {
            if let Some(&token) = self.shared_network_index.get(&key) {
                if let Some(publication) = self.network_pubs.get_mut(token) {
                    check_param_compat(&channel, publication.log.mtu(), publication.log.term_length())?;
                    publication.add_ref();
                    let ready = PublicationReadyArgs::from_network(correlation_id, publication);
                    self.registrations.insert(
                        correlation_id,
                        Registration { client_id, target: RegTarget::NetworkPublication(token) },
                    );
                    self.emit_publication_ready(ready);
                    return Ok(());
                }
            }
        }

        // Validate the session id before allocating anything.
        if let Some(session_id) = channel.session_id {
            if self.network_session_in_use(&key.0, stream_id, session_id) {
                return Err(DriverError::generic(format!("session-id {session_id} already in use")));
            }
        }

        let endpoint_id = self.next_id();
        let (endpoint, created) = self.send_endpoints.ensure(&channel, endpoint_id);
        if created {
            let endpoint_key = key.0.clone();
            self.sender.register_endpoint(endpoint_id, endpoint_key);
        }

        let session_id = match channel.session_id {
            Some(session_id) => session_id,
            None => self.assign_session_id(&key.0, stream_id),
        };
        let term_length = channel.term_length.unwrap_or(self.ctx.default_term_length);
        let mtu = channel.mtu.unwrap_or(self.ctx.default_mtu);
        let init_term_id = channel.init_term_id.unwrap_or_else(|| self.rng.random::<i32>());

        let log = match self.log_factory.create_log(correlation_id, term_length, mtu, init_term_id) {
            Ok(log) => log,
            Err(error) => {
                // Roll back the endpoint if this command created it.
                if created {
                    if let Some(id) = self.send_endpoints.release(endpoint) {
                        self.sender.close_endpoint(id);
                    }
                }
                return Err(error);
            }
        };

        let mut position = 0;
        if channel.has_replay_params() {
            position = replay_position(
                term_length,
                init_term_id,
                channel.term_id.unwrap_or(init_term_id),
                channel.term_offset.unwrap_or(0),
            );
            log.set_initial_position(position);
        }

        let pub_lmt = self
            .counters
            .allocate(format!("pub-lmt: {correlation_id} {session_id} {stream_id}"));
        pub_lmt.set(position as i64 + (term_length / 2) as i64);

        let now_ns = self.clock.now_ns();
        let publication = NetworkPublication::new(
            correlation_id,
            stream_id,
            session_id,
            channel,
            channel_uri.to_string(),
            endpoint,
            self.send_endpoints.get(endpoint).map(|e| e.id).unwrap_or(endpoint_id),
            Arc::clone(&log),
            pub_lmt,
            exclusive,
            now_ns,
        );
        let sender_endpoint_id = publication.endpoint_id;
        let ready = PublicationReadyArgs::from_network(correlation_id, &publication);

        let token = self.network_pubs.insert(publication);
        self.send_endpoints.attach(endpoint);
        self.network_pub_index.insert(correlation_id, token);
        if !exclusive {
            self.shared_network_index.insert(key, token);
        }
        self.registrations.insert(
            correlation_id,
            Registration { client_id, target: RegTarget::NetworkPublication(token) },
        );

        self.sender.new_publication(correlation_id, stream_id, session_id, sender_endpoint_id, log);
        info!(correlation_id, stream_id, session_id, exclusive, "network publication added");
        self.emit_publication_ready(ready);
        self.link_spies_to_publication(token);
        Ok(())
    }

    fn add_ipc_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: ChannelUri,
        exclusive: bool,
    ) -> Result<(), DriverError> {
        if !exclusive {
            if let Some(&token) = self.shared_ipc_index.get(&stream_id) {
                if let Some(publication) = self.ipc_pubs.get_mut(token) {
                    check_param_compat(&channel, publication.log.mtu(), publication.log.term_length())?;
                    publication.add_ref();
                    let ready = PublicationReadyArgs::from_ipc(correlation_id, publication);
                    self.registrations.insert(
                        correlation_id,
                        Registration { client_id, target: RegTarget::IpcPublication(token) },
                    );
                    self.emit_publication_ready(ready);
                    return Ok(());
                }
            }
        }

        if let Some(session_id) = channel.session_id {
            if self.ipc_session_in_use(stream_id, session_id) {
                return Err(DriverError::generic(format!("session-id {session_id} already in use")));
            }
        }

        let session_id = match channel.session_id {
            Some(session_id) => session_id,
            None => self.assign_ipc_session_id(stream_id),
        };
        let term_length = channel.term_length.unwrap_or(self.ctx.default_term_length);
        let mtu = channel.mtu.unwrap_or(self.ctx.default_mtu);
        let init_term_id = channel.init_term_id.unwrap_or_else(|| self.rng.random::<i32>());

        let log = self.log_factory.create_log(correlation_id, term_length, mtu, init_term_id)?;

        let mut position = 0;
        if channel.has_replay_params() {
            position = replay_position(
                term_length,
                init_term_id,
                channel.term_id.unwrap_or(init_term_id),
                channel.term_offset.unwrap_or(0),
            );
            log.set_initial_position(position);
        }

        let pub_lmt = self
            .counters
            .allocate(format!("pub-lmt: {correlation_id} {session_id} {stream_id}"));
        pub_lmt.set(position as i64 + (term_length / 2) as i64);

        let now_ns = self.clock.now_ns();
        let publication = IpcPublication::new(
            correlation_id,
            stream_id,
            session_id,
            "aeron:ipc".to_string(),
            log,
            pub_lmt,
            exclusive,
            now_ns,
        );
        let ready = PublicationReadyArgs::from_ipc(correlation_id, &publication);

        let token = self.ipc_pubs.insert(publication);
        self.ipc_pub_index.insert(correlation_id, token);
        if !exclusive {
            self.shared_ipc_index.insert(stream_id, token);
        }
        self.registrations.insert(
            correlation_id,
            Registration { client_id, target: RegTarget::IpcPublication(token) },
        );

        info!(correlation_id, stream_id, session_id, exclusive, "ipc publication added");
        self.emit_publication_ready(ready);
        self.link_ipc_subscribers_to_publication(token);
        Ok(())
    }

    fn do_remove_publication(&mut self, registration_id: i64) -> Result<(), DriverError> {
        let registration = self
            .registrations
            .get(&registration_id)
            .copied()
            .ok_or_else(|| DriverError::unknown_publication(registration_id))?;

        let now_ns = self.clock.now_ns();
        match registration.target {
            RegTarget::NetworkPublication(token) => {
                self.registrations.remove(&registration_id);
                let mut left_active = None;
                if let Some(publication) = self.network_pubs.get_mut(token) {
                    publication.remove_ref(now_ns);
                    if !publication.is_active() {
                        left_active =
                            Some((publication.channel.endpoint_key(), publication.stream_id));
                    }
                }
                // Guarded on the token: an exclusive publication must not
                // evict a shared one that shares its key.
                if let Some(key) = left_active {
                    if self.shared_network_index.get(&key) == Some(&token) {
                        self.shared_network_index.remove(&key);
                    }
                }
                Ok(())
            }
            RegTarget::IpcPublication(token) => {
                self.registrations.remove(&registration_id);
                let mut transition = None;
                let mut left_active = None;
                if let Some(publication) = self.ipc_pubs.get_mut(token) {
                    transition = publication.remove_ref(now_ns);
                    if !publication.is_active() {
                        left_active = Some(publication.stream_id);
                    }
                }
                if let Some(stream_id) = left_active {
                    if self.shared_ipc_index.get(&stream_id) == Some(&token) {
                        self.shared_ipc_index.remove(&stream_id);
                    }
                }
                if transition == Some(PubTransition::ToClosing) {
                    self.close_ipc_publication(token);
                }
                Ok(())
            }
            RegTarget::Subscription(_) => Err(DriverError::unknown_publication(registration_id)),
        }
    }

    /// Publication entered CLOSING: instruct teardown and release what it
    /// held. The slot stays until the sender acks.
    fn close_network_publication(&mut self, token: Token) {
        let Some(publication) = self.network_pubs.get_mut(token) else {
            return;
        };
        let registration_id = publication.registration_id;
        let stream_id = publication.stream_id;
        let channel_uri = publication.channel_uri.clone();
        let endpoint = publication.endpoint;
        let owes_unavailable = publication.spies_notified;
        publication.spies_notified = false;

        let spy_positions = std::mem::take(&mut publication.spy_positions);
        let pub_lmt_id = publication.pub_lmt.id();

        self.sender.remove_publication(registration_id);
        if owes_unavailable {
            self.client_proxy.on_unavailable_image(registration_id, stream_id, channel_uri);
        }
        for (_, counter) in spy_positions {
            self.counters.free(counter.id());
        }
        self.counters.free(pub_lmt_id);
        if let Some(endpoint_id) = self.send_endpoints.release(endpoint) {
            self.sender.close_endpoint(endpoint_id);
        }
        debug!(registration_id, "network publication closing, awaiting sender ack");
    }

    /// IPC publications have no data-plane owner to ack; free immediately.
    fn close_ipc_publication(&mut self, token: Token) {
        let Some(publication) = self.ipc_pubs.remove(token) else {
            return;
        };
        self.ipc_pub_index.remove(&publication.registration_id);
        if self.shared_ipc_index.get(&publication.stream_id) == Some(&token) {
            self.shared_ipc_index.remove(&publication.stream_id);
        }
        if publication.subscribers_notified {
            self.client_proxy.on_unavailable_image(
                publication.registration_id,
                publication.stream_id,
                publication.channel_uri.clone(),
            );
        }
        for (_, counter) in &publication.subscriber_positions {
            self.counters.free(counter.id());
        }
        self.counters.free(publication.pub_lmt.id());
        debug!(registration_id = publication.registration_id, "ipc publication closed");
    }

    // ---- subscriptions ----

    fn on_add_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel_uri: &str,
    ) {
        let result = self.do_add_subscription(client_id, correlation_id, stream_id, channel_uri);
        if let Err(error) = result {
            self.record_error(correlation_id, error);
        }
    }

    fn do_add_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel_uri: &str,
    ) -> Result<(), DriverError> {
        let channel = ChannelUri::parse(channel_uri)?;

        if channel.spy {
            return self.add_spy_subscription(client_id, correlation_id, stream_id, channel, channel_uri);
        }
        if channel.is_ipc() {
            return self.add_ipc_subscription(client_id, correlation_id, stream_id, channel, channel_uri);
        }
        self.add_network_subscription(client_id, correlation_id, stream_id, channel, channel_uri)
    }

    fn add_network_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: ChannelUri,
        channel_uri: &str,
    ) -> Result<(), DriverError> {
        let reliable = channel.reliable();

        // Reliability must match across the (endpoint, stream) before any
        // state is touched.
        if let Some(existing) = self
            .receive_endpoints
            .find(&channel)
            .and_then(|token| self.receive_endpoints.get(token))
            .and_then(|endpoint| endpoint.stream_reliability(stream_id))
        {
            if existing != reliable {
                return Err(DriverError::generic(format!(
                    "reliable={reliable} conflicts with existing subscriptions (reliable={existing})"
                )));
            }
        }

        let endpoint_id = self.next_id();
        let (endpoint, created) = self.receive_endpoints.ensure(&channel, endpoint_id);
        let endpoint_id = self.receive_endpoints.get(endpoint).map(|e| e.id).unwrap_or(endpoint_id);
        if created {
            self.recv_endpoint_by_id.insert(endpoint_id, endpoint);
            self.receiver.register_endpoint(endpoint_id, channel.endpoint_key());
        }
        if self.receive_endpoints.add_stream(endpoint, stream_id, reliable) {
            self.receiver.add_subscription(endpoint_id, stream_id);
        }

        let subscription = Subscription {
            registration_id: correlation_id,
            client_id,
            stream_id,
            channel,
            channel_uri: channel_uri.to_string(),
            reliable,
            link: SubscriptionLink::Network { endpoint, endpoint_id },
        };
        let token = self.subscriptions.insert(subscription);
        self.registrations
            .insert(correlation_id, Registration { client_id, target: RegTarget::Subscription(token) });

        info!(correlation_id, stream_id, reliable, "network subscription added");
        self.client_proxy.on_subscription_ready(correlation_id, endpoint_id as i32);

        // Images already live on this endpoint and stream become visible
        // to the new subscriber, after its ready event.
        let image_tokens = self
            .images
            .tokens_where(|image| image.endpoint == endpoint && image.stream_id == stream_id && image.is_active());
        for image_token in image_tokens {
            self.link_subscriber_to_image(image_token, correlation_id);
        }
        Ok(())
    }

    fn add_spy_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: ChannelUri,
        channel_uri: &str,
    ) -> Result<(), DriverError> {
        let endpoint_key = channel.endpoint_key();
        let subscription = Subscription {
            registration_id: correlation_id,
            client_id,
            stream_id,
            channel,
            channel_uri: channel_uri.to_string(),
            // Spies read the publisher's log directly; always reliable.
            reliable: true,
            link: SubscriptionLink::Spy,
        };
        let token = self.subscriptions.insert(subscription);
        self.registrations
            .insert(correlation_id, Registration { client_id, target: RegTarget::Subscription(token) });

        info!(correlation_id, stream_id, "spy subscription added");
        self.client_proxy.on_operation_success(correlation_id);

        let publication_tokens = self.network_pubs.tokens_where(|publication| {
            publication.is_active()
                && publication.stream_id == stream_id
                && publication.channel.endpoint_key() == endpoint_key
        });
        for publication_token in publication_tokens {
            self.link_spy_to_publication(publication_token, correlation_id);
        }
        Ok(())
    }

    fn add_ipc_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: ChannelUri,
        channel_uri: &str,
    ) -> Result<(), DriverError> {
        let subscription = Subscription {
            registration_id: correlation_id,
            client_id,
            stream_id,
            channel,
            channel_uri: channel_uri.to_string(),
            reliable: true,
            link: SubscriptionLink::Ipc,
        };
        let token = self.subscriptions.insert(subscription);
        self.registrations
            .insert(correlation_id, Registration { client_id, target: RegTarget::Subscription(token) });

        info!(correlation_id, stream_id, "ipc subscription added");
        self.client_proxy.on_operation_success(correlation_id);

        let publication_tokens = self
            .ipc_pubs
            .tokens_where(|publication| publication.is_active() && publication.stream_id == stream_id);
        for publication_token in publication_tokens {
            self.link_subscriber_to_ipc_publication(publication_token, correlation_id);
        }
        Ok(())
    }

    fn do_remove_subscription(&mut self, registration_id: i64) -> Result<(), DriverError> {
        let registration = self
            .registrations
            .get(&registration_id)
            .copied()
            .ok_or_else(|| DriverError::unknown_subscription(registration_id))?;
        let RegTarget::Subscription(token) = registration.target else {
            return Err(DriverError::unknown_subscription(registration_id));
        };
        self.registrations.remove(&registration_id);

        let Some(subscription) = self.subscriptions.remove(token) else {
            return Err(DriverError::unknown_subscription(registration_id));
        };

        let counters = Arc::clone(&self.counters);
        let detach = |positions: &mut Vec<(i64, crate::counters::Counter)>| {
            positions.retain(|(sub_id, counter)| {
                if *sub_id == registration_id {
                    counters.free(counter.id());
                    false
                } else {
                    true
                }
            });
        };

        match subscription.link {
            SubscriptionLink::Network { endpoint, endpoint_id } => {
                // Detach position counters from images on this stream.
                for (_, image) in self.images.iter_mut() {
                    if image.endpoint == endpoint && image.stream_id == subscription.stream_id {
                        detach(&mut image.subscriber_positions);
                    }
                }
                let release = self.receive_endpoints.remove_stream(endpoint, subscription.stream_id);
                if release.last_for_stream {
                    self.receiver.remove_subscription(endpoint_id, subscription.stream_id);
                }
                if let Some(closed_id) = release.endpoint_closed {
                    self.recv_endpoint_by_id.remove(&closed_id);
                    self.receiver.close_endpoint(closed_id);
                }
            }
            SubscriptionLink::Spy => {
                for (_, publication) in self.network_pubs.iter_mut() {
                    detach(&mut publication.spy_positions);
                }
            }
            SubscriptionLink::Ipc => {
                for (_, publication) in self.ipc_pubs.iter_mut() {
                    detach(&mut publication.subscriber_positions);
                }
            }
        }
        info!(registration_id, "subscription removed");
        Ok(())
    }

    // ---- destinations ----

    fn on_destination(&mut self, add: bool, correlation_id: i64, registration_id: i64, channel_uri: &str) {
        let result = self.do_destination(add, registration_id, channel_uri);
        match result {
            Ok(()) => self.client_proxy.on_operation_success(correlation_id),
            Err(error) => self.record_error(correlation_id, error),
        }
    }

    fn do_destination(
        &mut self,
        add: bool,
        registration_id: i64,
        channel_uri: &str,
    ) -> Result<(), DriverError> {
        ChannelUri::parse(channel_uri)?;
        let registration = self
            .registrations
            .get(&registration_id)
            .copied()
            .ok_or_else(|| DriverError::generic(format!("unknown registration: {registration_id}")))?;

        match registration.target {
            RegTarget::NetworkPublication(_) => {
                if add {
                    self.sender.add_destination(registration_id, channel_uri.to_string());
                } else {
                    self.sender.remove_destination(registration_id, channel_uri.to_string());
                }
                Ok(())
            }
            RegTarget::Subscription(token) => {
                let is_network = self
                    .subscriptions
                    .get(token)
                    .map(Subscription::is_network)
                    .unwrap_or(false);
                if !is_network {
                    return Err(DriverError::generic("destinations require a network subscription"));
                }
                if add {
                    self.receiver.add_destination(registration_id, channel_uri.to_string());
                } else {
                    self.receiver.remove_destination(registration_id, channel_uri.to_string());
                }
                Ok(())
            }
            RegTarget::IpcPublication(_) => {
                Err(DriverError::generic("destinations require a network publication"))
            }
        }
    }

    // ---- internal commands ----

    fn on_conductor_cmd(&mut self, cmd: ConductorCmd) {
        match cmd {
            ConductorCmd::CreateImage {
                session_id,
                stream_id,
                endpoint_id,
                init_term_id,
                active_term_id,
                term_offset,
                term_length,
                mtu,
                source_identity,
            } => {
                self.on_create_image(
                    session_id,
                    stream_id,
                    endpoint_id,
                    init_term_id,
                    active_term_id,
                    term_offset,
                    term_length,
                    mtu,
                    source_identity,
                );
            }
            ConductorCmd::ImageActive { correlation_id } => self.on_image_active(correlation_id),
            ConductorCmd::ImageInactive { correlation_id } => self.on_image_inactive(correlation_id),
            ConductorCmd::PublicationClosed { registration_id } => {
                if let Some(token) = self.network_pub_index.remove(&registration_id) {
                    self.network_pubs.remove(token);
                    debug!(registration_id, "network publication deleted");
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_create_image(
        &mut self,
        session_id: i32,
        stream_id: i32,
        endpoint_id: i64,
        init_term_id: i32,
        active_term_id: i32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        source_identity: String,
    ) {
        let Some(&endpoint) = self.recv_endpoint_by_id.get(&endpoint_id) else {
            // Endpoint torn down while the command was in flight.
            debug!(endpoint_id, "image for unknown endpoint dropped");
            return;
        };
        let interested = self
            .receive_endpoints
            .get(endpoint)
            .map(|e| e.has_stream(stream_id))
            .unwrap_or(false);
        if !interested {
            debug!(endpoint_id, stream_id, "image without subscribers dropped");
            return;
        }
        // A live image for the key means a duplicate setup message.
        let duplicate = self.images.iter().any(|(_, image)| {
            image.endpoint == endpoint
                && image.session_id == session_id
                && image.stream_id == stream_id
                && image.state() != ImageState::Closing
        });
        if duplicate {
            return;
        }

        let correlation_id = self.next_id();
        let log = match self.log_factory.create_log(correlation_id, term_length, mtu, init_term_id) {
            Ok(log) => log,
            Err(error) => {
                self.system.errors.increment();
                (self.error_hook)(&error);
                return;
            }
        };
        log.set_initial_position(replay_position(term_length, init_term_id, active_term_id, term_offset));

        let channel_uri = self
            .subscriptions
            .iter()
            .find(|(_, s)| {
                matches!(s.link, SubscriptionLink::Network { endpoint: e, .. } if e == endpoint)
                    && s.stream_id == stream_id
            })
            .map(|(_, s)| s.channel_uri.clone())
            .unwrap_or_default();

        let now_ns = self.clock.now_ns();
        let mut image = PublicationImage::new(
            correlation_id,
            session_id,
            stream_id,
            endpoint,
            endpoint_id,
            channel_uri,
            source_identity,
            Arc::clone(&log),
            now_ns,
        );

        // Wire position counters for current subscribers now; availability
        // events wait for activation.
        let subscriber_ids: Vec<i64> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| {
                matches!(s.link, SubscriptionLink::Network { endpoint: e, .. } if e == endpoint)
                    && s.stream_id == stream_id
            })
            .map(|(_, s)| s.registration_id)
            .collect();
        for subscription_id in subscriber_ids {
            let counter = self.counters.allocate(format!(
                "sub-pos: {subscription_id} {correlation_id} {session_id} {stream_id}"
            ));
            image.subscriber_positions.push((subscription_id, counter));
        }

        let token = self.images.insert(image);
        self.image_index.insert(correlation_id, token);
        self.receiver.new_image(correlation_id, log);
        info!(correlation_id, session_id, stream_id, "image created");
    }

    fn on_image_active(&mut self, correlation_id: i64) {
        let Some(&token) = self.image_index.get(&correlation_id) else {
            return;
        };
        let now_ns = self.clock.now_ns();
        let Some(image) = self.images.get_mut(token) else {
            return;
        };
        if !image.activate(now_ns) {
            return;
        }
        if image.subscriber_positions.is_empty() {
            return;
        }
        let positions: Vec<SubscriberPosition> = image
            .subscriber_positions
            .iter()
            .map(|(subscription_id, counter)| SubscriberPosition {
                counter_id: counter.id(),
                subscription_registration_id: *subscription_id,
            })
            .collect();
        image.mark_notified();
        let (session_id, stream_id) = (image.session_id, image.stream_id);
        let (log_file, source) = (image.log.file_name(), image.source_identity.clone());
        self.client_proxy
            .on_available_image(correlation_id, session_id, stream_id, positions, log_file, source);
    }

    fn on_image_inactive(&mut self, correlation_id: i64) {
        let Some(&token) = self.image_index.get(&correlation_id) else {
            return;
        };
        let now_ns = self.clock.now_ns();
        let Some(image) = self.images.get_mut(token) else {
            return;
        };
        if !image.if_active_go_inactive(now_ns) {
            return;
        }
        if image.owes_unavailable() {
            image.mark_unavailable_sent();
            let (stream_id, channel_uri) = (image.stream_id, image.channel_uri.clone());
            self.client_proxy.on_unavailable_image(correlation_id, stream_id, channel_uri);
        }
    }

    fn close_image(&mut self, token: Token) {
        let Some(image) = self.images.remove(token) else {
            return;
        };
        self.image_index.remove(&image.correlation_id);
        self.receiver.remove_image(image.correlation_id);
        // INACTIVE already paired the unavailable; this is the backstop.
        if image.owes_unavailable() {
            self.client_proxy.on_unavailable_image(
                image.correlation_id,
                image.stream_id,
                image.channel_uri.clone(),
            );
        }
        for (_, counter) in &image.subscriber_positions {
            self.counters.free(counter.id());
        }
        debug!(correlation_id = image.correlation_id, "image deleted");
    }

    // ---- availability links ----

    fn link_spies_to_publication(&mut self, token: Token) {
        let Some(publication) = self.network_pubs.get(token) else {
            return;
        };
        let endpoint_key = publication.channel.endpoint_key();
        let stream_id = publication.stream_id;
        let spy_ids: Vec<i64> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.is_spy() && s.stream_id == stream_id && s.channel.endpoint_key() == endpoint_key)
            .map(|(_, s)| s.registration_id)
            .collect();
        for subscription_id in spy_ids {
            self.link_spy_to_publication(token, subscription_id);
        }
    }

    fn link_spy_to_publication(&mut self, token: Token, subscription_id: i64) {
        let Some(publication) = self.network_pubs.get_mut(token) else {
            return;
        };
        let counter = self.counters.allocate(format!(
            "spy-pos: {subscription_id} {} {} {}",
            publication.registration_id, publication.session_id, publication.stream_id
        ));
        let position = SubscriberPosition {
            counter_id: counter.id(),
            subscription_registration_id: subscription_id,
        };
        publication.spy_positions.push((subscription_id, counter));
        publication.spies_notified = true;
        let (correlation_id, session_id, stream_id) =
            (publication.registration_id, publication.session_id, publication.stream_id);
        let log_file = publication.log.file_name();
        self.client_proxy.on_available_image(
            correlation_id,
            session_id,
            stream_id,
            vec![position],
            log_file,
            "ipc".to_string(),
        );
    }

    fn link_ipc_subscribers_to_publication(&mut self, token: Token) {
        let Some(publication) = self.ipc_pubs.get(token) else {
            return;
        };
        let stream_id = publication.stream_id;
        let subscriber_ids: Vec<i64> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| matches!(s.link, SubscriptionLink::Ipc) && s.stream_id == stream_id)
            .map(|(_, s)| s.registration_id)
            .collect();
        for subscription_id in subscriber_ids {
            self.link_subscriber_to_ipc_publication(token, subscription_id);
        }
    }

    fn link_subscriber_to_ipc_publication(&mut self, token: Token, subscription_id: i64) {
        let Some(publication) = self.ipc_pubs.get_mut(token) else {
            return;
        };
        let counter = self.counters.allocate(format!(
            "sub-pos: {subscription_id} {} {} {}",
            publication.registration_id, publication.session_id, publication.stream_id
        ));
        let position = SubscriberPosition {
            counter_id: counter.id(),
            subscription_registration_id: subscription_id,
        };
        publication.subscriber_positions.push((subscription_id, counter));
        publication.subscribers_notified = true;
        let (correlation_id, session_id, stream_id) =
            (publication.registration_id, publication.session_id, publication.stream_id);
        let log_file = publication.log.file_name();
        self.client_proxy.on_available_image(
            correlation_id,
            session_id,
            stream_id,
            vec![position],
            log_file,
            "ipc".to_string(),
        );
    }

    fn link_subscriber_to_image(&mut self, token: Token, subscription_id: i64) {
        let Some(image) = self.images.get_mut(token) else {
            return;
        };
        let counter = self.counters.allocate(format!(
            "sub-pos: {subscription_id} {} {} {}",
            image.correlation_id, image.session_id, image.stream_id
        ));
        let position = SubscriberPosition {
            counter_id: counter.id(),
            subscription_registration_id: subscription_id,
        };
        image.subscriber_positions.push((subscription_id, counter));
        image.mark_notified();
        let (correlation_id, session_id, stream_id) =
            (image.correlation_id, image.session_id, image.stream_id);
        let (log_file, source) = (image.log.file_name(), image.source_identity.clone());
        self.client_proxy
            .on_available_image(correlation_id, session_id, stream_id, vec![position], log_file, source);
    }

    // ---- timer maintenance ----

    fn on_timer(&mut self, now_ns: u64) -> usize {
        let mut work = 0;
        work += self.check_clients(now_ns);
        work += self.check_network_publications(now_ns);
        work += self.check_ipc_publications(now_ns);
        work += self.check_images(now_ns);
        work
    }

    fn check_clients(&mut self, now_ns: u64) -> usize {
        let expired = self.clients.timed_out(now_ns, self.ctx.client_liveness_timeout_ns);
        let mut work = 0;
        for client_id in expired {
            self.system.client_timeouts.increment();
            work += self.release_client(client_id);
        }
        work
    }

    /// Release every registration a dead client owned, publications before
    /// subscriptions, each as if explicitly removed (without reply events,
    /// the client is gone).
    fn release_client(&mut self, client_id: i64) -> usize {
        let mut publications: Vec<i64> = Vec::new();
        let mut subscriptions: Vec<i64> = Vec::new();
        for (&registration_id, registration) in &self.registrations {
            if registration.client_id != client_id {
                continue;
            }
            match registration.target {
                RegTarget::NetworkPublication(_) | RegTarget::IpcPublication(_) => {
                    publications.push(registration_id)
                }
                RegTarget::Subscription(_) => subscriptions.push(registration_id),
            }
        }
        publications.sort_unstable();
        subscriptions.sort_unstable();

        let work = publications.len() + subscriptions.len();
        for registration_id in publications {
            let _ = self.do_remove_publication(registration_id);
        }
        for registration_id in subscriptions {
            let _ = self.do_remove_subscription(registration_id);
        }
        work
    }

    fn check_network_publications(&mut self, now_ns: u64) -> usize {
        let linger_ns = self.ctx.publication_linger_ns;
        let connection_timeout_ns = self.ctx.publication_connection_timeout_ns;
        let mut work = 0;
        let tokens: Vec<Token> = self.network_pubs.iter().map(|(token, _)| token).collect();
        for token in tokens {
            let transition = self
                .network_pubs
                .get_mut(token)
                .and_then(|publication| publication.on_time_event(now_ns, linger_ns, connection_timeout_ns));
            if let Some(transition) = transition {
                work += 1;
                if transition == PubTransition::ToClosing {
                    self.close_network_publication(token);
                }
            }
        }
        work
    }

    fn check_ipc_publications(&mut self, now_ns: u64) -> usize {
        let linger_ns = self.ctx.publication_linger_ns;
        let mut work = 0;
        let tokens: Vec<Token> = self.ipc_pubs.iter().map(|(token, _)| token).collect();
        for token in tokens {
            let transition = self
                .ipc_pubs
                .get_mut(token)
                .and_then(|publication| publication.on_time_event(now_ns, linger_ns));
            if let Some(transition) = transition {
                work += 1;
                if transition == PubTransition::ToClosing {
                    self.close_ipc_publication(token);
                }
            }
        }
        work
    }

    fn check_images(&mut self, now_ns: u64) -> usize {
        let liveness_ns = self.ctx.image_liveness_timeout_ns;
        let mut work = 0;
        let tokens: Vec<Token> = self.images.iter().map(|(token, _)| token).collect();
        for token in tokens {
            let transition = self
                .images
                .get_mut(token)
                .and_then(|image| image.on_time_event(now_ns, liveness_ns));
            if let Some(transition) = transition {
                work += 1;
                if transition == ImageTransition::ToClosing {
                    self.close_image(token);
                }
            }
        }
        work
    }

    // ---- helpers ----

    fn record_error(&mut self, correlation_id: i64, error: DriverError) {
        self.system.errors.increment();
        (self.error_hook)(&error);
        self.client_proxy.on_error(correlation_id, error.code, error.detail);
    }

    fn emit_publication_ready(&mut self, args: PublicationReadyArgs) {
        self.client_proxy.on_publication_ready(
            args.correlation_id,
            args.registration_id,
            args.stream_id,
            args.session_id,
            args.position_limit_counter_id,
            args.is_exclusive,
            args.log_file,
        );
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_driver_id;
        self.next_driver_id += 1;
        id
    }

    /// Session ids must be unique across network and IPC publications on
    /// a stream, so each check also scans the other registry (IPC carries
    /// no endpoint, so the key there is the stream alone).
    fn network_session_in_use(&self, endpoint_key: &str, stream_id: i32, session_id: i32) -> bool {
        self.network_pubs.iter().any(|(_, publication)| {
            publication.holds_key()
                && publication.stream_id == stream_id
                && publication.session_id == session_id
                && publication.channel.endpoint_key() == endpoint_key
        }) || self.ipc_stream_session_taken(stream_id, session_id)
    }

    fn ipc_session_in_use(&self, stream_id: i32, session_id: i32) -> bool {
        self.ipc_stream_session_taken(stream_id, session_id)
            || self.network_stream_session_taken(stream_id, session_id)
    }

    fn ipc_stream_session_taken(&self, stream_id: i32, session_id: i32) -> bool {
        self.ipc_pubs.iter().any(|(_, publication)| {
            publication.holds_key()
                && publication.stream_id == stream_id
                && publication.session_id == session_id
        })
    }

    fn network_stream_session_taken(&self, stream_id: i32, session_id: i32) -> bool {
        self.network_pubs.iter().any(|(_, publication)| {
            publication.holds_key()
                && publication.stream_id == stream_id
                && publication.session_id == session_id
        })
    }

    /// Driver-assigned session ids start from a random 31-bit value, then
    /// probe linearly (wrapping within 31 bits) past collisions with live
    /// publications on the key.
    fn assign_session_id(&mut self, endpoint_key: &str, stream_id: i32) -> i32 {
        let mut candidate = (self.rng.random::<u32>() & 0x7FFF_FFFF) as i32;
        while self.network_session_in_use(endpoint_key, stream_id, candidate) {
            candidate = candidate.wrapping_add(1) & 0x7FFF_FFFF;
        }
        candidate
    }

    fn assign_ipc_session_id(&mut self, stream_id: i32) -> i32 {
        let mut candidate = (self.rng.random::<u32>() & 0x7FFF_FFFF) as i32;
        while self.ipc_session_in_use(stream_id, candidate) {
            candidate = candidate.wrapping_add(1) & 0x7FFF_FFFF;
        }
        candidate
    }

    // ---- observability ----

    pub fn error_count(&self) -> i64 {
        self.system.errors.get()
    }

    pub fn client_timeout_count(&self) -> i64 {
        self.system.client_timeouts.get()
    }

    pub fn has_send_endpoint(&self, channel: &ChannelUri) -> bool {
        self.send_endpoints.find(channel).is_some()
    }

    pub fn has_receive_endpoint(&self, channel: &ChannelUri) -> bool {
        self.receive_endpoints.find(channel).is_some()
    }

    pub fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            clients: self.clients.len(),
            network_publications: self
                .network_pubs
                .iter()
                .map(|(_, p)| PublicationSnapshot {
                    registration_id: p.registration_id,
                    stream_id: p.stream_id,
                    session_id: p.session_id,
                    state: p.state(),
                    refs: p.refs(),
                    is_exclusive: p.is_exclusive,
                })
                .collect(),
            ipc_publications: self
                .ipc_pubs
                .iter()
                .map(|(_, p)| PublicationSnapshot {
                    registration_id: p.registration_id,
                    stream_id: p.stream_id,
                    session_id: p.session_id,
                    state: p.state(),
                    refs: p.refs(),
                    is_exclusive: p.is_exclusive,
                })
                .collect(),
            subscriptions: self.subscriptions.len(),
            images: self
                .images
                .iter()
                .map(|(_, i)| ImageSnapshot {
                    correlation_id: i.correlation_id,
                    session_id: i.session_id,
                    stream_id: i.stream_id,
                    state: i.state(),
                })
                .collect(),
            send_endpoints: self.send_endpoints.len(),
            receive_endpoints: self.receive_endpoints.len(),
            counters: self.counters.snapshot(),
        }
    }
}

/// A channel reusing an existing publication cannot re-specify stream
/// params with different values.
fn check_param_compat(channel: &ChannelUri, mtu: u32, term_length: u32) -> Result<(), DriverError> {
    if let Some(requested) = channel.mtu {
        if requested != mtu {
            return Err(DriverError::generic(format!(
                "mtu {requested} does not match existing publication ({mtu})"
            )));
        }
    }
    if let Some(requested) = channel.term_length {
        if requested != term_length {
            return Err(DriverError::generic(format!(
                "term-length {requested} does not match existing publication ({term_length})"
            )));
        }
    }
    Ok(())
}

/// Flat args bundle so ready events outlive registry borrows.
struct PublicationReadyArgs {
    correlation_id: i64,
    registration_id: i64,
    stream_id: i32,
    session_id: i32,
    position_limit_counter_id: i32,
    is_exclusive: bool,
    log_file: String,
}

impl PublicationReadyArgs {
    fn from_network(correlation_id: i64, publication: &NetworkPublication) -> Self {
        Self {
            correlation_id,
            registration_id: publication.registration_id,
            stream_id: publication.stream_id,
            session_id: publication.session_id,
            position_limit_counter_id: publication.pub_lmt.id(),
            is_exclusive: publication.is_exclusive,
            log_file: publication.log.file_name(),
        }
    }

    fn from_ipc(correlation_id: i64, publication: &IpcPublication) -> Self {
        Self {
            correlation_id,
            registration_id: publication.registration_id,
            stream_id: publication.stream_id,
            session_id: publication.session_id,
            position_limit_counter_id: publication.pub_lmt.id(),
            is_exclusive: publication.is_exclusive,
            log_file: publication.log.file_name(),
        }
    }
}

/// Serializable summary of the driver's state for diagnostics.
#[derive(Debug, Serialize)]
pub struct DriverSnapshot {
    pub clients: usize,
    pub network_publications: Vec<PublicationSnapshot>,
    pub ipc_publications: Vec<PublicationSnapshot>,
    pub subscriptions: usize,
    pub images: Vec<ImageSnapshot>,
    pub send_endpoints: usize,
    pub receive_endpoints: usize,
    pub counters: Vec<CounterInfo>,
}

#[derive(Debug, Serialize)]
pub struct PublicationSnapshot {
    pub registration_id: i64,
    pub stream_id: i32,
    pub session_id: i32,
    pub state: PubState,
    pub refs: u32,
    pub is_exclusive: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageSnapshot {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub state: ImageState,
}

#[cfg(test)]
#[path = "conductor_tests.rs"]
mod tests;
