// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The RTSP session state machine, without I/O.
//!
//! [`Session`] turns caller operations and server responses into [`Action`]s
//! for the driver in `client/mod.rs` to carry out. Keeping sockets out of here
//! lets the whole `OPTIONS` → `DESCRIBE` → `SETUP`… → `PLAY` sequence be tested
//! with canned responses.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use bytes::Bytes;
use log::{debug, info, warn};
use rtsp_types::{headers, Method, Request, Response, StatusCode, Version};
use url::Url;

use super::auth::AuthCache;
use super::sdp::{self, NegotiatedStream};
use super::transport::{self, ReplyTransport, TransportDescriptor};
use super::url::ResolvedUrl;
use super::{MediaKind, TransportMode};
use crate::error::ErrorInt;
use crate::{ConnectionContext, Error, RtspMessageContext};

/// Where a set-up stream's packets arrive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Channels {
    /// Interleaved channel ids on the RTSP connection.
    Interleaved { rtp: u8, rtcp: u8 },

    /// Local UDP ports.
    Udp { rtp_port: u16, rtcp_port: u16 },
}

/// A stream whose `SETUP` succeeded. Immutable from then on.
#[derive(Clone, Debug)]
pub(crate) struct SetupStream {
    pub(crate) kind: MediaKind,
    pub(crate) codec: String,
    pub(crate) payload_type: u8,
    pub(crate) channels: Channels,

    /// The server's RTCP port from `server_port=`, for unicast UDP receiver reports.
    pub(crate) server_rtcp_port: Option<u16>,
    pub(crate) multicast: bool,
}

/// Something for the driver to do.
#[derive(Debug)]
pub(crate) enum Action {
    /// Write this request to the RTSP connection.
    Send(Request<Bytes>),

    /// Start sending keepalives.
    StartKeepalive,

    /// H.264 parameter sets from the SDP are ready for the caller.
    ParameterSets { sps: Bytes, pps: Bytes },

    /// Replace the video UDP pair with one joined to this multicast group.
    BindMulticast {
        group: IpAddr,
        rtp_port: u16,
        rtcp_port: u16,
    },

    /// Publish the finalized stream table to the demultiplexer.
    Publish(Vec<SetupStream>),

    /// The session can't continue.
    Fail(Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    AwaitingOptions,
    AwaitingDescribe,
    SettingUp,
    AwaitingPlay,
    Playing,
    Paused,
    Stopped,
    Failed,
}

/// What a request with a given `CSeq` was, for routing its response.
#[derive(Debug)]
struct Pending {
    method: Method,
    kind: Option<MediaKind>,
    had_authorization: bool,
}

pub(crate) struct Session {
    url: ResolvedUrl,
    mode: TransportMode,
    user_agent: String,
    conn_ctx: ConnectionContext,

    /// In UDP mode, the even local port already bound for each kind.
    udp_ports: HashMap<MediaKind, u16>,

    /// The next `CSeq` header value to use when sending an RTSP request.
    next_cseq: u32,

    /// `CSeq` of the first `OPTIONS`, whose reply starts the session proper.
    first_cseq: Option<u32>,
    pending: HashMap<u32, Pending>,
    auth: AuthCache,
    session_id: Option<String>,
    state: State,

    /// Streams awaiting `SETUP`. These are sent one at a time so later ones can
    /// carry the session id assigned by the first.
    setup_queue: VecDeque<(NegotiatedStream, TransportDescriptor)>,
    in_flight: HashMap<MediaKind, (NegotiatedStream, TransportDescriptor)>,
    last_setup_error: Option<Error>,
    streams: Vec<SetupStream>,
}

impl Session {
    pub(crate) fn new(
        url: ResolvedUrl,
        mode: TransportMode,
        user_agent: String,
        conn_ctx: ConnectionContext,
        udp_ports: HashMap<MediaKind, u16>,
    ) -> Self {
        Self {
            url,
            mode,
            user_agent,
            conn_ctx,
            udp_ports,
            next_cseq: 1,
            first_cseq: None,
            pending: HashMap::new(),
            auth: AuthCache::default(),
            session_id: None,
            state: State::Idle,
            setup_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            last_setup_error: None,
            streams: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Sends the initial `OPTIONS`.
    pub(crate) fn start(&mut self) -> Vec<Action> {
        self.state = State::AwaitingOptions;
        self.first_cseq = Some(self.next_cseq);
        let req = self.request(Method::Options, self.url.url.clone(), None);
        vec![Action::Send(req)]
    }

    /// Returns a keepalive `OPTIONS` request.
    pub(crate) fn keepalive(&mut self) -> Request<Bytes> {
        self.request(Method::Options, self.url.url.clone(), None)
    }

    /// Returns a `PLAY` to resume, or `None` if there's no session to play.
    pub(crate) fn play(&mut self) -> Option<Request<Bytes>> {
        if !matches!(
            self.state,
            State::AwaitingPlay | State::Playing | State::Paused
        ) {
            debug!("PLAY suppressed in state {:?}", self.state);
            return None;
        }
        self.session_id.as_ref()?;
        Some(self.request(Method::Play, self.url.url.clone(), None))
    }

    /// Returns a `PAUSE`, or `None` unless `PLAY` has been sent.
    pub(crate) fn pause(&mut self) -> Option<Request<Bytes>> {
        if !matches!(self.state, State::AwaitingPlay | State::Playing) {
            debug!("PAUSE suppressed in state {:?}", self.state);
            return None;
        }
        self.session_id.as_ref()?;
        Some(self.request(Method::Pause, self.url.url.clone(), None))
    }

    /// Moves to `Stopped` and returns a `TEARDOWN` if there's a session id.
    pub(crate) fn teardown(&mut self) -> Option<Request<Bytes>> {
        self.state = State::Stopped;
        if self.session_id.is_none() {
            debug!("TEARDOWN suppressed: no session id");
            return None;
        }
        Some(self.request(Method::Teardown, self.url.url.clone(), None))
    }

    /// Builds a request with `CSeq`, `User-Agent`, and as applicable `Session`
    /// and `Authorization` headers, and records it for response routing.
    fn request(&mut self, method: Method, uri: Url, kind: Option<MediaKind>) -> Request<Bytes> {
        let cseq = self.next_cseq;
        self.next_cseq = self.next_cseq.wrapping_add(1);
        let method_str: &str = (&method).into();
        let authorization = self
            .auth
            .authorization(self.url.creds.as_ref(), method_str, uri.as_str());
        let mut req = Request::builder(method.clone(), Version::V1_0)
            .request_uri(uri)
            .build(Bytes::new());
        req.insert_header(headers::CSEQ, cseq.to_string());
        req.insert_header(headers::USER_AGENT, self.user_agent.clone());
        if let Some(id) = &self.session_id {
            if matches!(
                method,
                Method::Setup | Method::Play | Method::Pause | Method::Teardown
            ) {
                req.insert_header(headers::SESSION, id.clone());
            }
        }
        if method == Method::Describe {
            req.insert_header(headers::ACCEPT, "application/sdp");
        }
        let had_authorization = authorization.is_some();
        if let Some(a) = authorization {
            req.insert_header(headers::AUTHORIZATION, a);
        }
        self.pending.insert(
            cseq,
            Pending {
                method,
                kind,
                had_authorization,
            },
        );
        req
    }

    fn fail(&mut self, e: Error) -> Vec<Action> {
        self.state = State::Failed;
        vec![Action::Fail(e)]
    }

    fn response_error(
        &self,
        msg_ctx: RtspMessageContext,
        method: Method,
        cseq: u32,
        resp: &Response<Bytes>,
        description: String,
    ) -> Error {
        wrap!(ErrorInt::RtspResponseError {
            conn_ctx: self.conn_ctx,
            msg_ctx,
            method,
            cseq,
            status: resp.status(),
            description,
        })
    }

    fn protocol_error(&self, msg_ctx: RtspMessageContext, description: String) -> Error {
        wrap!(ErrorInt::RtspProtocolError {
            conn_ctx: self.conn_ctx,
            msg_ctx,
            description,
        })
    }

    /// Handles a response, routed by the method of the request with its `CSeq`.
    pub(crate) fn handle_response(
        &mut self,
        msg_ctx: RtspMessageContext,
        resp: Response<Bytes>,
    ) -> Vec<Action> {
        if let Some(h) = resp.header(&headers::WWW_AUTHENTICATE) {
            self.auth.update(h.as_str());
        }
        let Some(cseq) = get_cseq(&resp) else {
            warn!("ignoring response with missing or bad CSeq at {}", msg_ctx);
            return Vec::new();
        };
        let Some(pending) = self.pending.remove(&cseq) else {
            warn!("ignoring response to unknown CSeq={} at {}", cseq, msg_ctx);
            return Vec::new();
        };
        if matches!(self.state, State::Failed | State::Stopped) {
            debug!(
                "ignoring {} response in state {:?}",
                Into::<&str>::into(&pending.method),
                self.state
            );
            return Vec::new();
        }
        match pending.method {
            Method::Options => self.on_options(cseq, &resp),
            Method::Describe => self.on_describe(msg_ctx, cseq, &pending, &resp),
            Method::Setup => self.on_setup(msg_ctx, cseq, &pending, &resp),
            Method::Play => self.on_play(msg_ctx, cseq, &resp),
            Method::Pause => {
                if resp.status().is_success() {
                    self.state = State::Paused;
                } else {
                    warn!("PAUSE failed: {}", resp.status());
                }
                Vec::new()
            }
            Method::Teardown => {
                debug!("TEARDOWN response: {}", resp.status());
                Vec::new()
            }
            ref m => {
                debug!("ignoring response to {}", Into::<&str>::into(m));
                Vec::new()
            }
        }
    }

    fn on_options(&mut self, cseq: u32, resp: &Response<Bytes>) -> Vec<Action> {
        if !resp.status().is_success() {
            debug!("OPTIONS CSeq={} returned {}", cseq, resp.status());
        }
        if Some(cseq) != self.first_cseq {
            return Vec::new(); // keepalive.
        }
        self.state = State::AwaitingDescribe;
        let req = self.request(Method::Describe, self.url.url.clone(), None);
        vec![Action::StartKeepalive, Action::Send(req)]
    }

    fn on_describe(
        &mut self,
        msg_ctx: RtspMessageContext,
        cseq: u32,
        pending: &Pending,
        resp: &Response<Bytes>,
    ) -> Vec<Action> {
        if resp.status() == StatusCode::Unauthorized {
            let description = if pending.had_authorization {
                Some("credentials rejected")
            } else if self.url.creds.is_none() {
                Some("authentication required; no credentials supplied")
            } else if !self.auth.is_challenged()
                || self
                    .auth
                    .authorization(self.url.creds.as_ref(), "DESCRIBE", self.url.as_str())
                    .is_none()
            {
                Some("401 without a usable Digest challenge")
            } else {
                None
            };
            if let Some(description) = description {
                return self.fail(wrap!(ErrorInt::AuthError {
                    conn_ctx: self.conn_ctx,
                    msg_ctx,
                    method: Method::Describe,
                    cseq,
                    description: description.to_owned(),
                }));
            }
            info!("retrying DESCRIBE with Digest authorization");
            let req = self.request(Method::Describe, self.url.url.clone(), None);
            return vec![Action::Send(req)];
        }
        if !resp.status().is_success() {
            let e = self.response_error(
                msg_ctx,
                Method::Describe,
                cseq,
                resp,
                "DESCRIBE failed".to_owned(),
            );
            return self.fail(e);
        }

        let negotiation = match sdp::negotiate(self.url.as_str(), resp.body()) {
            Ok(n) => n,
            Err(description) => {
                let e = self.response_error(msg_ctx, Method::Describe, cseq, resp, description);
                return self.fail(e);
            }
        };
        let mut actions = Vec::new();
        if let Some((sps, pps)) = negotiation
            .video
            .as_ref()
            .and_then(|v| v.parameter_sets.as_ref())
        {
            actions.push(Action::ParameterSets {
                sps: sps.clone(),
                pps: pps.clone(),
            });
        }
        for s in negotiation.streams() {
            let udp_port = self.udp_ports.get(&s.kind).copied();
            match transport::plan(s.kind, self.mode, udp_port) {
                Ok(d) => self.setup_queue.push_back((s.clone(), d)),
                Err(e) => warn!("not setting up {} stream: {}", s.kind, e),
            }
        }
        if self.setup_queue.is_empty() {
            let mut description = "no supported media streams".to_owned();
            for (kind, reason) in &negotiation.rejected {
                description.push_str(&format!("; {kind}: {reason}"));
            }
            actions.extend(self.fail(wrap!(ErrorInt::UnsupportedMedia(description))));
            return actions;
        }
        self.state = State::SettingUp;
        actions.extend(self.next_setup_or_play(msg_ctx));
        actions
    }

    /// Sends the next queued `SETUP`, or once none remain, publishes the
    /// stream table and sends `PLAY`.
    fn next_setup_or_play(&mut self, msg_ctx: RtspMessageContext) -> Vec<Action> {
        if let Some((stream, descriptor)) = self.setup_queue.pop_front() {
            let kind = stream.kind;
            debug!(
                "setting up {} stream: {} payload type {} fmtp={:?}",
                kind, &stream.codec, stream.payload_type, &stream.fmtp
            );
            let mut req = self.request(Method::Setup, stream.control_url.clone(), Some(kind));
            req.insert_header(headers::TRANSPORT, descriptor.header());
            self.in_flight.insert(kind, (stream, descriptor));
            return vec![Action::Send(req)];
        }
        if self.streams.is_empty() {
            let e = self.last_setup_error.take().unwrap_or_else(|| {
                self.protocol_error(msg_ctx, "no stream was set up".to_owned())
            });
            return self.fail(e);
        }
        if self.session_id.is_none() {
            let e = self.protocol_error(msg_ctx, "SETUP replies carried no session id".to_owned());
            return self.fail(e);
        }
        self.state = State::AwaitingPlay;
        let play = self.request(Method::Play, self.url.url.clone(), None);
        vec![Action::Publish(self.streams.clone()), Action::Send(play)]
    }

    fn on_setup(
        &mut self,
        msg_ctx: RtspMessageContext,
        cseq: u32,
        pending: &Pending,
        resp: &Response<Bytes>,
    ) -> Vec<Action> {
        let Some((stream, descriptor)) = pending.kind.and_then(|k| self.in_flight.remove(&k))
        else {
            warn!("ignoring unexpected SETUP response CSeq={}", cseq);
            return Vec::new();
        };
        let kind = stream.kind;
        let mut actions = Vec::new();
        if !resp.status().is_success() {
            let e = self.response_error(
                msg_ctx,
                Method::Setup,
                cseq,
                resp,
                format!("SETUP of {kind} stream failed"),
            );
            warn!("{}", e);
            self.last_setup_error = Some(e);
        } else {
            match self.accept_setup(stream, descriptor, resp, &mut actions) {
                Ok(s) => {
                    info!("{} stream set up: {:?}", kind, &s.channels);
                    self.streams.push(s);
                }
                Err(description) => {
                    let e = self.response_error(msg_ctx, Method::Setup, cseq, resp, description);
                    warn!("{}", e);
                    self.last_setup_error = Some(e);
                }
            }
        }
        actions.extend(self.next_setup_or_play(msg_ctx));
        actions
    }

    /// Records the session id and works out where the stream's packets arrive.
    fn accept_setup(
        &mut self,
        stream: NegotiatedStream,
        descriptor: TransportDescriptor,
        resp: &Response<Bytes>,
        actions: &mut Vec<Action>,
    ) -> Result<SetupStream, String> {
        let kind = stream.kind;
        match resp.header(&headers::SESSION) {
            Some(v) => {
                let session = transport::parse_session(v.as_str())?;
                if let Some(t) = session.timeout_sec {
                    debug!("session {} has timeout {}s", &session.id, t);
                }
                match &self.session_id {
                    Some(old) if *old != session.id => {
                        warn!("session id changed from {} to {}", old, &session.id)
                    }
                    _ => {}
                }
                self.session_id = Some(session.id);
            }
            None if self.session_id.is_none() => {
                return Err("SETUP reply has no Session header".to_owned())
            }
            None => {}
        }
        let reply = match resp.header(&headers::TRANSPORT) {
            Some(v) => transport::parse_transport(v.as_str())?,
            None => ReplyTransport::default(),
        };
        if let Some(ssrc) = reply.ssrc {
            debug!("{} stream ssrc={:08x} source={:?}", kind, ssrc, reply.source);
        }
        let (channels, server_rtcp_port, multicast) = match descriptor {
            TransportDescriptor::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => {
                let (rtp, rtcp) = reply.interleaved.unwrap_or((rtp_channel, rtcp_channel));
                (Channels::Interleaved { rtp, rtcp }, None, false)
            }
            TransportDescriptor::Unicast {
                client_rtp_port,
                client_rtcp_port,
            } => {
                if let Some(p) = reply.client_port {
                    if p != (client_rtp_port, client_rtcp_port) {
                        warn!(
                            "server replied with client_port={}-{}; still receiving on {}-{}",
                            p.0, p.1, client_rtp_port, client_rtcp_port
                        );
                    }
                }
                (
                    Channels::Udp {
                        rtp_port: client_rtp_port,
                        rtcp_port: client_rtcp_port,
                    },
                    reply.server_port.map(|p| p.1),
                    false,
                )
            }
            TransportDescriptor::Multicast => {
                if !reply.multicast {
                    return Err("requested multicast; server replied with unicast".to_owned());
                }
                let group = reply
                    .destination
                    .ok_or_else(|| "multicast reply has no destination".to_owned())?;
                let (rtp_port, rtcp_port) = reply
                    .port
                    .ok_or_else(|| "multicast reply has no port".to_owned())?;
                if kind == MediaKind::Video {
                    actions.push(Action::BindMulticast {
                        group,
                        rtp_port,
                        rtcp_port,
                    });
                } else {
                    warn!(
                        "multicast {} on {}:{} won't be received; only the video pair is bound",
                        kind, group, rtp_port
                    );
                }
                (Channels::Udp { rtp_port, rtcp_port }, None, true)
            }
        };
        Ok(SetupStream {
            kind,
            codec: stream.codec,
            payload_type: stream.payload_type,
            channels,
            server_rtcp_port,
            multicast,
        })
    }

    fn on_play(
        &mut self,
        msg_ctx: RtspMessageContext,
        cseq: u32,
        resp: &Response<Bytes>,
    ) -> Vec<Action> {
        if !resp.status().is_success() {
            let e = self.response_error(msg_ctx, Method::Play, cseq, resp, "PLAY failed".to_owned());
            return self.fail(e);
        }
        info!("playing session {}", self.session_id.as_deref().unwrap_or(""));
        self.state = State::Playing;
        Vec::new()
    }
}

pub(crate) fn get_cseq(response: &Response<Bytes>) -> Option<u32> {
    response
        .header(&headers::CSEQ)
        .and_then(|cseq| u32::from_str_radix(cseq.as_str().trim(), 10).ok())
}
